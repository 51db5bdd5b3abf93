use serde::{Deserialize, Serialize};

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Lifecycle of an order the engine created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Active,
    PendingCancel,
    Done,
    Failed,
    Canceled,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Done | OrderState::Failed | OrderState::Canceled)
    }
}

// Resting order owned by a ladder slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveOrder {
    pub id: OrderId,
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub volume: f64,
    /// Unfilled part of `volume`, reduced by fill reports.
    pub balance: f64,
    pub state: OrderState,
}

// Limit order as handed to the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrder {
    pub id: OrderId,
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderReport {
    Accepted,
    Filled { volume: f64, price: f64 },
    Done,
    Failed { reason: String },
    Canceled,
}

// Asynchronous report coming back from the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub id: OrderId,
    pub report: OrderReport,
}

impl OrderUpdate {
    pub fn new(id: OrderId, report: OrderReport) -> Self {
        Self { id, report }
    }
}

/// Order entry as seen by the engine. Both calls are fire-and-forget: the
/// outcome arrives later as an [`OrderUpdate`]. Implementations must not
/// call back into the engine from inside these methods.
pub trait OrderGateway: Send + Sync {
    fn place_limit(&self, order: &PlaceOrder);
    fn cancel(&self, id: OrderId);
}
