//! In-process paper venue.
//!
//! Rests the engine's limit orders, fills them when the simulated tape trades
//! through their price and reports back the same way a real gateway would:
//! asynchronously, through [`GatewayCommand`]s in and [`EngineEvent`]s out.

use std::collections::{BTreeMap, VecDeque};

use ahash::AHashMap;
use ordered_float::OrderedFloat;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::engine::types::{OrderGateway, OrderId, OrderReport, OrderUpdate, PlaceOrder, Side};
use crate::quoting::types::EngineEvent;

type Px = OrderedFloat<f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct Resting {
    pub id: OrderId,
    pub price: f64,
    pub volume: f64,
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCommand {
    Place(PlaceOrder),
    Cancel(OrderId),
}

/// Non-blocking gateway handle: commands are queued for the paper book.
#[derive(Debug, Clone)]
pub struct PaperGateway {
    tx: mpsc::UnboundedSender<GatewayCommand>,
}

impl PaperGateway {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GatewayCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OrderGateway for PaperGateway {
    fn place_limit(&self, order: &PlaceOrder) {
        if self.tx.send(GatewayCommand::Place(order.clone())).is_err() {
            warn!(id = order.id, "Paper book gone, dropping placement");
        }
    }

    fn cancel(&self, id: OrderId) {
        if self.tx.send(GatewayCommand::Cancel(id)).is_err() {
            warn!(id, "Paper book gone, dropping cancel");
        }
    }
}

#[derive(Debug, Default)]
pub struct PaperBook {
    pub bids: BTreeMap<Px, VecDeque<Resting>>,
    pub asks: BTreeMap<Px, VecDeque<Resting>>,
    pub id_index: AHashMap<OrderId, (Side, Px)>,
    reject_next: usize,
}

impl PaperBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` placements, to exercise the retry path.
    pub fn reject_next(&mut self, n: usize) {
        self.reject_next = n;
    }

    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids.iter().rev().find_map(|(px, q)| level_size(q).map(|s| (px.0, s)))
    }

    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks.iter().find_map(|(px, q)| level_size(q).map(|s| (px.0, s)))
    }

    pub fn resting(&self, id: OrderId) -> Option<&Resting> {
        let (side, px) = self.id_index.get(&id)?;
        self.side(*side).get(px)?.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.id_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_index.is_empty()
    }

    pub fn apply(&mut self, command: GatewayCommand) -> Vec<EngineEvent> {
        match command {
            GatewayCommand::Place(order) => self.submit(&order),
            GatewayCommand::Cancel(id) => self.cancel(id),
        }
    }

    #[instrument(level = "trace", skip(self), fields(order_id = order.id))]
    pub fn submit(&mut self, order: &PlaceOrder) -> Vec<EngineEvent> {
        let invalid = !(order.price > 0.0 && order.volume > 0.0);
        let duplicate = self.id_index.contains_key(&order.id);
        let forced = !invalid && !duplicate && self.reject_next > 0;
        if forced {
            self.reject_next -= 1;
        }
        if invalid || duplicate || forced {
            let reason = match (invalid, duplicate) {
                (true, _) => "invalid price or volume",
                (_, true) => "duplicate order id",
                _ => "rejected by venue",
            };
            debug!(id = order.id, reason, "Rejecting order");
            return vec![report(order.id, OrderReport::Failed { reason: reason.to_string() })];
        }

        let px = OrderedFloat(order.price);
        let resting = Resting { id: order.id, price: order.price, volume: order.volume, remaining: order.volume };
        self.side_mut(order.side).entry(px).or_default().push_back(resting);
        self.id_index.insert(order.id, (order.side, px));
        trace!(id = order.id, side = %order.side, price = order.price, volume = order.volume, "Order resting");

        vec![report(order.id, OrderReport::Accepted)]
    }

    /// Unknown ids (already filled or never placed) produce no report.
    pub fn cancel(&mut self, id: OrderId) -> Vec<EngineEvent> {
        let Some((side, px)) = self.id_index.remove(&id) else {
            debug!(id, "Cancel for unknown order ignored");
            return Vec::new();
        };
        let levels = self.side_mut(side);
        if let Some(queue) = levels.get_mut(&px) {
            queue.retain(|r| r.id != id);
            if queue.is_empty() {
                levels.remove(&px);
            }
        }
        vec![report(id, OrderReport::Canceled)]
    }

    /// A print on the tape at `price`: every resting order at or through
    /// that price trades, best price first, up to `size` in total.
    pub fn trade(&mut self, price: f64, size: f64) -> Vec<EngineEvent> {
        let mut events = self.cross(Side::Buy, price, size);
        let used: f64 = filled_volume(&events);
        events.extend(self.cross(Side::Sell, price, size - used));
        events
    }

    /// Fill resting `side` orders priced at or through `price`, up to `size`.
    pub fn cross(&mut self, side: Side, price: f64, size: f64) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let crossed: Vec<Px> = match side {
            Side::Buy => self.bids.range(OrderedFloat(price)..).rev().map(|(px, _)| *px).collect(),
            Side::Sell => self.asks.range(..=OrderedFloat(price)).map(|(px, _)| *px).collect(),
        };
        let mut left = size;
        for px in crossed {
            if left <= 0.0 {
                break;
            }
            left = self.fill_level(side, px, left, &mut events);
        }
        events
    }

    fn fill_level(&mut self, side: Side, px: Px, mut left: f64, events: &mut Vec<EngineEvent>) -> f64 {
        let mut done = Vec::new();
        if let Some(queue) = self.side_mut(side).get_mut(&px) {
            for resting in queue.iter_mut() {
                if left <= 0.0 {
                    break;
                }
                let qty = left.min(resting.remaining);
                resting.remaining -= qty;
                left -= qty;
                debug!(id = resting.id, %side, price = px.0, qty, "Paper fill");

                events.push(report(resting.id, OrderReport::Filled { volume: qty, price: px.0 }));
                if resting.remaining <= 1e-12 {
                    events.push(report(resting.id, OrderReport::Done));
                    done.push(resting.id);
                }
                let delta = match side {
                    Side::Buy => qty,
                    Side::Sell => -qty,
                };
                events.push(EngineEvent::PositionDelta(delta));
            }
            queue.retain(|r| r.remaining > 1e-12);
            if queue.is_empty() {
                self.side_mut(side).remove(&px);
            }
        }
        for id in done {
            self.id_index.remove(&id);
        }
        left
    }

    fn side(&self, side: Side) -> &BTreeMap<Px, VecDeque<Resting>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Px, VecDeque<Resting>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}

fn level_size(queue: &VecDeque<Resting>) -> Option<f64> {
    let total: f64 = queue.iter().map(|r| r.remaining).sum();
    (total > 0.0).then_some(total)
}

fn filled_volume(events: &[EngineEvent]) -> f64 {
    events
        .iter()
        .map(|e| match e {
            EngineEvent::Order(OrderUpdate { report: OrderReport::Filled { volume, .. }, .. }) => *volume,
            _ => 0.0,
        })
        .sum()
}

fn report(id: OrderId, report: OrderReport) -> EngineEvent {
    EngineEvent::Order(OrderUpdate::new(id, report))
}
