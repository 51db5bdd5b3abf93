use serde::Serialize;
use smallvec::SmallVec;
use thiserror::Error;

use crate::config::{ConfigError, QuoteConfig};
use crate::engine::types::{OrderId, OrderUpdate, PlaceOrder, Side};
use crate::market_data::reference::MarketTick;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("invalid quote configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load settings: {0}")]
    Settings(#[from] ::config::ConfigError),
    #[error("failed to create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),
}

// One rung of the target ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuoteLevel {
    pub side: Side,
    pub level_index: usize, // 1 = nearest the reference price
    pub target_price: f64,
    pub target_volume: f64,
}

impl QuoteLevel {
    /// A level the engine should keep an order on.
    pub fn is_quotable(&self) -> bool {
        self.target_volume > 0.0 && self.target_price > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Ladder {
    pub reference: Option<f64>,
    pub buys: Vec<QuoteLevel>,  // index 0 = level 1
    pub sells: Vec<QuoteLevel>,
}

impl Ladder {
    pub fn side(&self, side: Side) -> &[QuoteLevel] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    pub fn level(&self, side: Side, level_index: usize) -> Option<&QuoteLevel> {
        level_index.checked_sub(1).and_then(|i| self.side(side).get(i))
    }

    /// Every slot has zero volume.
    pub fn is_flat(&self) -> bool {
        !self.buys.iter().chain(self.sells.iter()).any(QuoteLevel::is_quotable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteAction {
    Place(PlaceOrder),
    Cancel { id: OrderId, side: Side, level_index: usize },
}

pub type Actions = SmallVec<[QuoteAction; 8]>;

// Everything that can trigger a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Market(MarketTick),
    PositionDelta(f64),
    PositionSnapshot(f64),
    Order(OrderUpdate),
    Reconfigure(QuoteConfig),
    Reconcile,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SideStatus {
    pub active: usize,
    pub pending_cancel: usize,
    pub active_volume: f64,
    /// Unfilled volume across active and pending-cancel orders.
    pub open_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub reference: Option<f64>,
    pub net_position: f64,
    pub buys: SideStatus,
    pub sells: SideStatus,
    pub passes: u64,
    pub rejects: u64,
    pub fault: Option<String>,
}
