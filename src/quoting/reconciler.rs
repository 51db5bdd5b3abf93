//! Ladder order reconciliation.
//!
//! [`OrderReconciler`] is a reducer: every [`EngineEvent`] mutates the slot
//! table and returns the cancel/place actions the host must send. Each
//! (side, level) slot holds at most one order and moves through
//!
//! ```text
//!   Empty --place--> Active --stale/flat--> PendingCancel --terminal--> Empty
//!     ^                |
//!     +---terminal-----+
//! ```
//!
//! A stale order is never replaced in one step: the cancel goes out first and
//! the replacement only once the gateway reports the old order terminal, so a
//! slot never has two resting orders.

use ahash::AHashMap;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigError, QuoteConfig};
use crate::engine::types::{LiveOrder, OrderId, OrderReport, OrderState, OrderUpdate, PlaceOrder, Side};
use crate::market_data::reference::{CurrentPrice, ReferencePriceFeed};
use crate::quoting::exposure::ExposureTracker;
use crate::quoting::ladder::LadderPlanner;
use crate::quoting::types::{Actions, EngineEvent, EngineStatus, Ladder, QuoteAction, QuoteLevel, SideStatus};

pub const FIRST_ORDER_ID: OrderId = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Empty,
    Active(LiveOrder),
    PendingCancel(LiveOrder),
}

impl SlotState {
    pub fn order(&self) -> Option<&LiveOrder> {
        match self {
            SlotState::Active(o) | SlotState::PendingCancel(o) => Some(o),
            SlotState::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SlotState::Empty)
    }
}

enum Step {
    Keep,
    Place(QuoteLevel),
    Cancel,
}

pub struct OrderReconciler<P = ReferencePriceFeed> {
    config: QuoteConfig,
    planner: LadderPlanner,
    exposure: ExposureTracker,
    price: P,
    bids: Vec<SlotState>, // index 0 = level 1
    asks: Vec<SlotState>,
    index: AHashMap<OrderId, (Side, usize)>,
    next_order_id: OrderId,
    fault: Option<ConfigError>,
    passes: u64,
    rejects: u64,
}

impl OrderReconciler<ReferencePriceFeed> {
    pub fn new(config: QuoteConfig) -> Self {
        let feed = ReferencePriceFeed::new(config.price_source, &config.security, config.lead_security.as_deref());
        Self::with_price_source(config, feed)
    }
}

impl<P: CurrentPrice> OrderReconciler<P> {
    /// Build around any price capability. An invalid config leaves the
    /// engine idle until a valid one arrives through `Reconfigure`.
    pub fn with_price_source(config: QuoteConfig, price: P) -> Self {
        let mut engine = Self {
            planner: LadderPlanner::from_config(&config),
            exposure: ExposureTracker::new(config.max_volume_per_level, config.level_count),
            config: config.clone(),
            price,
            bids: Vec::new(),
            asks: Vec::new(),
            index: AHashMap::new(),
            next_order_id: FIRST_ORDER_ID,
            fault: None,
            passes: 0,
            rejects: 0,
        };
        engine.apply_config(config);
        engine
    }

    pub fn config(&self) -> &QuoteConfig {
        &self.config
    }

    pub fn fault(&self) -> Option<&ConfigError> {
        self.fault.as_ref()
    }

    pub fn net_position(&self) -> f64 {
        self.exposure.net_position
    }

    pub fn reference(&self) -> Option<f64> {
        self.price.current_price()
    }

    pub fn price_source(&self) -> &P {
        &self.price
    }

    pub fn price_source_mut(&mut self) -> &mut P {
        &mut self.price
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn slot(&self, side: Side, level_index: usize) -> Option<&SlotState> {
        level_index.checked_sub(1).and_then(|i| self.slots(side).get(i))
    }

    pub fn live_orders(&self) -> impl Iterator<Item = &LiveOrder> {
        self.bids.iter().chain(self.asks.iter()).filter_map(SlotState::order)
    }

    /// Target ladder for the current state, without touching any slot.
    /// A faulted engine targets no levels at all; its level count is not
    /// trusted.
    pub fn target(&self) -> Ladder {
        match self.fault {
            Some(_) => Ladder::default(),
            None => self.planner.plan(self.price.current_price(), &self.exposure),
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            reference: self.price.current_price(),
            net_position: self.exposure.net_position,
            buys: side_status(&self.bids),
            sells: side_status(&self.asks),
            passes: self.passes,
            rejects: self.rejects,
            fault: self.fault.as_ref().map(ToString::to_string),
        }
    }

    /// Apply one event and return the orders to send. Never fails: bad
    /// configuration, missing prices and rejected orders all end up as a
    /// (possibly flat) ladder.
    #[instrument(level = "debug", skip_all)]
    pub fn handle(&mut self, event: EngineEvent) -> Actions {
        match event {
            EngineEvent::Market(tick) => {
                if self.price.observe(&tick) {
                    self.pass(None)
                } else {
                    Actions::new()
                }
            }
            EngineEvent::PositionDelta(delta) => {
                self.exposure.apply_delta(delta);
                debug!(delta, net_position = self.exposure.net_position, "Position delta");
                self.pass(None)
            }
            EngineEvent::PositionSnapshot(net_position) => {
                self.exposure.set_position(net_position);
                debug!(net_position = self.exposure.net_position, "Position snapshot");
                self.pass(None)
            }
            EngineEvent::Order(update) => self.on_order(update),
            EngineEvent::Reconfigure(config) => {
                self.apply_config(config);
                self.pass(None)
            }
            EngineEvent::Reconcile => self.pass(None),
        }
    }

    fn apply_config(&mut self, config: QuoteConfig) {
        self.fault = config.validate().err();
        match &self.fault {
            Some(err) => error!(%err, security = %config.security, "Quote configuration rejected, engine idle"),
            None => info!(
                security = %config.security,
                levels = config.level_count,
                shift = config.shift_coefficient,
                max_volume = config.max_volume_per_level,
                source = ?config.price_source,
                "Quote configuration applied"
            ),
        }

        self.planner = LadderPlanner::from_config(&config);
        self.exposure.max_volume_per_level = config.max_volume_per_level;
        self.exposure.level_count = config.level_count;
        self.price.reconfigure(&config);

        if self.fault.is_none() {
            for slots in [&mut self.bids, &mut self.asks] {
                if slots.len() < config.level_count {
                    slots.resize(config.level_count, SlotState::Empty);
                }
            }
        }
        self.config = config;
    }

    fn on_order(&mut self, update: OrderUpdate) -> Actions {
        let Some(&(side, level_index)) = self.index.get(&update.id) else {
            debug!(id = update.id, "Ignoring report for an order this engine does not own");
            return Actions::new();
        };

        match update.report {
            OrderReport::Accepted => {
                debug!(id = update.id, %side, level_index, "Order accepted");
                self.pass(None)
            }
            OrderReport::Filled { volume, price } => {
                if let Some(SlotState::Active(o) | SlotState::PendingCancel(o)) = self.slot_mut(side, level_index) {
                    o.balance = (o.balance - volume).max(0.0);
                }
                debug!(id = update.id, %side, level_index, volume, price, "Order fill");
                self.pass(None)
            }
            OrderReport::Canceled => {
                self.release(update.id, side, level_index, OrderState::Canceled);
                self.pass(None)
            }
            OrderReport::Done => {
                // refill waits for the position change this fill produces
                self.release(update.id, side, level_index, OrderState::Done);
                self.pass(Some((side, level_index)))
            }
            OrderReport::Failed { reason } => {
                warn!(id = update.id, %side, level_index, %reason, "Order rejected, slot will retry on next trigger");
                self.rejects += 1;
                metrics::counter!("ladder_orders_rejected_total", "side" => side.as_str()).increment(1);
                self.release(update.id, side, level_index, OrderState::Failed);
                self.pass(Some((side, level_index)))
            }
        }
    }

    fn release(&mut self, id: OrderId, side: Side, level_index: usize, terminal: OrderState) {
        debug_assert!(terminal.is_terminal());
        self.index.remove(&id);
        let Some(slot) = self.slot_mut(side, level_index) else {
            return;
        };
        if slot.order().map(|o| o.id) == Some(id) {
            debug!(id, %side, level_index, state = ?terminal, "Slot released");
            *slot = SlotState::Empty;
        }
    }

    /// One full reconciliation pass. `hold` names a slot that must not be
    /// refilled during this pass.
    fn pass(&mut self, hold: Option<(Side, usize)>) -> Actions {
        self.passes += 1;
        let ladder = self.target();
        let mut actions = Actions::new();

        for side in [Side::Buy, Side::Sell] {
            for i in 0..self.slots(side).len() {
                let level_index = i + 1;
                let target = ladder.level(side, level_index).copied().filter(QuoteLevel::is_quotable);
                let held = hold == Some((side, level_index));
                if let Some(action) = self.reconcile_slot(side, level_index, target, ladder.reference, held) {
                    actions.push(action);
                }
            }
        }

        self.trim_slots();
        if !actions.is_empty() {
            debug!(pass = self.passes, actions = actions.len(), reference = ?ladder.reference, "Reconciliation pass");
        }
        actions
    }

    fn reconcile_slot(
        &mut self,
        side: Side,
        level_index: usize,
        target: Option<QuoteLevel>,
        reference: Option<f64>,
        held: bool,
    ) -> Option<QuoteAction> {
        let step = match (self.slot(side, level_index)?, target) {
            (SlotState::PendingCancel(_), _) => Step::Keep,
            (SlotState::Empty, None) => Step::Keep,
            (SlotState::Empty, Some(_)) if held => Step::Keep,
            (SlotState::Empty, Some(level)) => Step::Place(level),
            (SlotState::Active(_), None) => Step::Cancel,
            (SlotState::Active(order), Some(level)) => {
                if self.within_tolerance(order, &level, reference) {
                    Step::Keep
                } else {
                    debug!(
                        id = order.id, %side, level_index,
                        live_price = order.price, target_price = level.target_price,
                        live_volume = order.volume, target_volume = level.target_volume,
                        "Order outside tolerance"
                    );
                    Step::Cancel
                }
            }
        };

        match step {
            Step::Keep => None,
            Step::Place(level) => Some(self.place(level)),
            Step::Cancel => self.cancel(side, level_index),
        }
    }

    fn within_tolerance(&self, order: &LiveOrder, level: &QuoteLevel, reference: Option<f64>) -> bool {
        let Some(reference) = reference else {
            return false;
        };
        let drift = (order.price - level.target_price).abs() / reference;
        drift < self.config.price_tolerance.max(f64::EPSILON)
            && self.planner.normaliser.same_volume(order.volume, level.target_volume)
    }

    fn place(&mut self, level: QuoteLevel) -> QuoteAction {
        let id = self.next_order_id;
        self.next_order_id += 1;

        let order = LiveOrder {
            id,
            side: level.side,
            level_index: level.level_index,
            price: level.target_price,
            volume: level.target_volume,
            balance: level.target_volume,
            state: OrderState::Active,
        };
        self.index.insert(id, (level.side, level.level_index));
        if let Some(slot) = self.slot_mut(level.side, level.level_index) {
            *slot = SlotState::Active(order);
        }
        info!(id, side = %level.side, level = level.level_index, price = level.target_price, volume = level.target_volume, "Placing quote");

        QuoteAction::Place(PlaceOrder {
            id,
            side: level.side,
            level_index: level.level_index,
            price: level.target_price,
            volume: level.target_volume,
        })
    }

    fn cancel(&mut self, side: Side, level_index: usize) -> Option<QuoteAction> {
        let slot = self.slot_mut(side, level_index)?;
        match std::mem::replace(slot, SlotState::Empty) {
            SlotState::Active(mut order) => {
                let id = order.id;
                order.state = OrderState::PendingCancel;
                *slot = SlotState::PendingCancel(order);
                info!(id, %side, level = level_index, "Cancelling quote");
                Some(QuoteAction::Cancel { id, side, level_index })
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    // Drop empty slots left over from a larger level count.
    fn trim_slots(&mut self) {
        let keep = self.config.level_count;
        for slots in [&mut self.bids, &mut self.asks] {
            while slots.len() > keep && slots.last().is_some_and(SlotState::is_empty) {
                slots.pop();
            }
        }
    }

    fn slots(&self, side: Side) -> &[SlotState] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn slot_mut(&mut self, side: Side, level_index: usize) -> Option<&mut SlotState> {
        let slots = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        level_index.checked_sub(1).and_then(move |i| slots.get_mut(i))
    }
}

fn side_status(slots: &[SlotState]) -> SideStatus {
    slots.iter().fold(SideStatus::default(), |mut acc, slot| {
        match slot {
            SlotState::Active(o) => {
                acc.active += 1;
                acc.active_volume += o.volume;
                acc.open_volume += o.balance;
            }
            SlotState::PendingCancel(o) => {
                acc.pending_cancel += 1;
                acc.open_volume += o.balance;
            }
            SlotState::Empty => {}
        }
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::reference::{FixedPrice, MarketTick, TickKind};

    fn config() -> QuoteConfig {
        QuoteConfig::new("BTC", 1.0, 0.001, 3)
    }

    fn mid(price: f64) -> EngineEvent {
        let half = 0.5;
        EngineEvent::Market(MarketTick::new(
            "BTC",
            TickKind::TopOfBook { bid: Some(price - half), ask: Some(price + half) },
            0,
        ))
    }

    fn report(id: OrderId, report: OrderReport) -> EngineEvent {
        EngineEvent::Order(OrderUpdate::new(id, report))
    }

    fn places(actions: &Actions) -> Vec<&PlaceOrder> {
        actions
            .iter()
            .filter_map(|a| match a {
                QuoteAction::Place(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn cancels(actions: &Actions) -> Vec<OrderId> {
        actions
            .iter()
            .filter_map(|a| match a {
                QuoteAction::Cancel { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn started() -> (OrderReconciler, Actions) {
        let mut engine = OrderReconciler::new(config());
        let actions = engine.handle(mid(100.0));
        (engine, actions)
    }

    fn id_at(engine: &OrderReconciler, side: Side, level: usize) -> OrderId {
        engine.slot(side, level).and_then(SlotState::order).map(|o| o.id).unwrap()
    }

    #[test]
    fn test_first_price_places_full_ladder() {
        let (engine, actions) = started();
        let placed = places(&actions);
        assert_eq!(placed.len(), 6);
        let buys: Vec<f64> = placed.iter().filter(|p| p.side == Side::Buy).map(|p| p.price).collect();
        let sells: Vec<f64> = placed.iter().filter(|p| p.side == Side::Sell).map(|p| p.price).collect();
        assert_eq!(buys, vec![99.9, 99.8, 99.7]);
        assert_eq!(sells, vec![100.1, 100.2, 100.3]);
        assert!(placed.iter().all(|p| p.volume == 1.0));
        assert_eq!(engine.status().buys.active, 3);
        assert_eq!(engine.status().sells.active, 3);
    }

    #[test]
    fn test_no_reference_no_orders() {
        let mut engine = OrderReconciler::new(config());
        assert!(engine.handle(EngineEvent::Reconcile).is_empty());
        assert!(engine.handle(EngineEvent::PositionDelta(1.0)).is_empty());
        assert_eq!(engine.live_orders().count(), 0);
    }

    #[test]
    fn test_repeated_passes_are_idempotent() {
        let (mut engine, _) = started();
        assert!(engine.handle(EngineEvent::Reconcile).is_empty());
        assert!(engine.handle(EngineEvent::Reconcile).is_empty());
    }

    #[test]
    fn test_jitter_inside_tolerance_is_ignored() {
        let (mut engine, _) = started();
        // 0.02 on 100 is 2 bps, under the 5 bps band
        assert!(engine.handle(mid(100.02)).is_empty());
        assert!(engine.handle(mid(99.98)).is_empty());
    }

    #[test]
    fn test_large_move_cancels_before_replacing() {
        let (mut engine, _) = started();
        let old = id_at(&engine, Side::Buy, 1);

        let actions = engine.handle(mid(101.0));
        assert!(places(&actions).is_empty());
        assert_eq!(cancels(&actions).len(), 6);
        assert!(matches!(engine.slot(Side::Buy, 1), Some(SlotState::PendingCancel(o)) if o.id == old));

        // more ticks while the cancel is in flight change nothing
        assert!(engine.handle(mid(101.5)).is_empty());

        let actions = engine.handle(report(old, OrderReport::Canceled));
        let placed = places(&actions);
        assert_eq!(placed.len(), 1);
        assert_eq!((placed[0].side, placed[0].level_index, placed[0].price), (Side::Buy, 1, 101.4));
        assert!(cancels(&actions).is_empty());
    }

    #[test]
    fn test_long_position_exhausts_buy_side_only() {
        let (mut engine, _) = started();
        let actions = engine.handle(EngineEvent::PositionSnapshot(3.0));
        assert_eq!(cancels(&actions).len(), 3);
        assert!(places(&actions).is_empty());
        assert!(actions.iter().all(|a| matches!(a, QuoteAction::Cancel { side: Side::Buy, .. })));
        assert_eq!(engine.status().sells.active, 3);
    }

    #[test]
    fn test_partial_capacity_cancels_nearest_levels_first() {
        let (mut engine, _) = started();
        let actions = engine.handle(EngineEvent::PositionDelta(2.0));
        let cancelled: Vec<usize> = actions
            .iter()
            .filter_map(|a| match a {
                QuoteAction::Cancel { side: Side::Buy, level_index, .. } => Some(*level_index),
                _ => None,
            })
            .collect();
        assert_eq!(cancelled, vec![1, 2]);
        assert!(matches!(engine.slot(Side::Buy, 3), Some(SlotState::Active(_))));
    }

    #[test]
    fn test_rejected_order_retried_on_next_trigger() {
        let (mut engine, _) = started();
        let id = id_at(&engine, Side::Sell, 2);
        let actions = engine.handle(report(id, OrderReport::Failed { reason: "post-only".into() }));
        assert!(actions.is_empty());
        assert_eq!(engine.slot(Side::Sell, 2), Some(&SlotState::Empty));

        let actions = engine.handle(EngineEvent::Reconcile);
        let placed = places(&actions);
        assert_eq!(placed.len(), 1);
        assert_eq!((placed[0].side, placed[0].level_index), (Side::Sell, 2));
        assert_ne!(placed[0].id, id);
    }

    #[test]
    fn test_fill_during_cancel_resolves_through_position() {
        let (mut engine, _) = started();
        let id = id_at(&engine, Side::Buy, 1);
        engine.handle(mid(101.0));

        // the stale bid fills before the cancel lands
        engine.handle(report(id, OrderReport::Filled { volume: 1.0, price: 99.9 }));
        let actions = engine.handle(report(id, OrderReport::Done));
        assert!(actions.is_empty());
        assert_eq!(engine.slot(Side::Buy, 1), Some(&SlotState::Empty));

        // a late cancel ack for the same id is ignored
        assert!(engine.handle(report(id, OrderReport::Canceled)).is_empty());

        let actions = engine.handle(EngineEvent::PositionDelta(1.0));
        // long 1: buy level 1 is starved, nothing to refill there
        assert!(places(&actions).iter().all(|p| !(p.side == Side::Buy && p.level_index == 1)));
        assert_eq!(engine.net_position(), 1.0);
    }

    #[test]
    fn test_foreign_orders_ignored() {
        let (mut engine, _) = started();
        assert!(engine.handle(report(42, OrderReport::Canceled)).is_empty());
        assert!(engine.handle(report(42, OrderReport::Done)).is_empty());
        assert!(engine.handle(report(42, OrderReport::Failed { reason: "unknown".into() })).is_empty());
        assert_eq!(engine.live_orders().count(), 6);
        assert_eq!(engine.status().rejects, 0);

        let own = id_at(&engine, Side::Buy, 1);
        engine.handle(report(own, OrderReport::Failed { reason: "post-only".into() }));
        assert_eq!(engine.status().rejects, 1);
    }

    #[test]
    fn test_partial_fill_tracks_balance() {
        let (mut engine, _) = started();
        let id = id_at(&engine, Side::Sell, 1);
        let actions = engine.handle(report(id, OrderReport::Filled { volume: 0.4, price: 100.1 }));
        assert!(actions.is_empty());

        let order = engine.slot(Side::Sell, 1).and_then(SlotState::order).unwrap();
        assert_eq!(order.volume, 1.0);
        assert!((order.balance - 0.6).abs() < 1e-12);
        let sells = engine.status().sells;
        assert_eq!(sells.active_volume, 3.0);
        assert!((sells.open_volume - 2.6).abs() < 1e-12);

        // overfill clamps at zero
        engine.handle(report(id, OrderReport::Filled { volume: 5.0, price: 100.1 }));
        assert_eq!(engine.slot(Side::Sell, 1).and_then(SlotState::order).map(|o| o.balance), Some(0.0));
    }

    #[test]
    fn test_oversized_level_count_idles_without_panic() {
        let (mut engine, _) = started();
        let actions = engine.handle(EngineEvent::Reconfigure(QuoteConfig::new("BTC", 1.0, 0.001, usize::MAX)));
        assert_eq!(engine.fault(), Some(&ConfigError::TooManyLevels(usize::MAX)));
        assert_eq!(cancels(&actions).len(), 6);
        assert!(engine.target().is_flat());
        assert!(engine.handle(mid(105.0)).is_empty());

        let actions = engine.handle(EngineEvent::Reconfigure(config()));
        assert!(engine.fault().is_none());
        assert!(cancels(&actions).is_empty());
    }

    #[test]
    fn test_invalid_config_idles_until_fixed() {
        let mut bad = config();
        bad.shift_coefficient = 0.0;
        let mut engine = OrderReconciler::new(bad);
        assert!(engine.fault().is_some());
        assert!(engine.handle(mid(100.0)).is_empty());

        let actions = engine.handle(EngineEvent::Reconfigure(config()));
        assert!(engine.fault().is_none());
        assert_eq!(places(&actions).len(), 6);
    }

    #[test]
    fn test_bad_reconfigure_flattens_ladder() {
        let (mut engine, _) = started();
        let mut bad = config();
        bad.max_volume_per_level = 0.0;
        let actions = engine.handle(EngineEvent::Reconfigure(bad));
        assert_eq!(cancels(&actions).len(), 6);
        assert!(engine.status().fault.is_some());
    }

    #[test]
    fn test_shrinking_level_count_drops_outer_slots() {
        let (mut engine, _) = started();
        let outer = id_at(&engine, Side::Sell, 3);
        let mut smaller = config();
        smaller.level_count = 2;
        let actions = engine.handle(EngineEvent::Reconfigure(smaller));
        assert_eq!(cancels(&actions).len(), 2);

        engine.handle(report(outer, OrderReport::Canceled));
        assert_eq!(engine.slot(Side::Sell, 3), None);
        assert!(engine.slot(Side::Buy, 3).is_some());
    }

    #[test]
    fn test_injected_price_source() {
        let mut engine = OrderReconciler::with_price_source(config(), FixedPrice(Some(50.0)));
        let actions = engine.handle(EngineEvent::Reconcile);
        assert_eq!(places(&actions).len(), 6);

        engine.price_source_mut().0 = None;
        let actions = engine.handle(EngineEvent::Reconcile);
        assert_eq!(cancels(&actions).len(), 6);
    }

    #[test]
    fn test_one_order_per_slot() {
        let (mut engine, _) = started();
        for px in [101.0, 99.0, 103.0] {
            let actions = engine.handle(mid(px));
            for id in cancels(&actions) {
                engine.handle(report(id, OrderReport::Canceled));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for o in engine.live_orders() {
            assert!(seen.insert((o.side, o.level_index)));
        }
    }
}
