use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::QuoteConfig;
use crate::engine::types::OrderGateway;
use crate::market_data::reference::{CurrentPrice, ReferencePriceFeed};
use crate::quoting::reconciler::OrderReconciler;
use crate::quoting::types::{EngineEvent, EngineStatus, QuoteAction, QuoteError};

struct Inner<P> {
    engine: OrderReconciler<P>,
    pass_latency_ns: Histogram<u64>,
}

/// Thread-safe host around [`OrderReconciler`].
///
/// Callbacks may arrive from any thread; one mutex serialises them so a
/// pass (read slots, decide, mutate, send) is atomic with respect to every
/// other pass. Actions are handed to the gateway under the lock so the
/// gateway sees them in decision order, which is why gateways must never
/// call back into `handle` synchronously.
pub struct MarketMaker<G, P = ReferencePriceFeed> {
    inner: Mutex<Inner<P>>,
    gateway: G,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketMakerStatus {
    #[serde(flatten)]
    pub engine: EngineStatus,
    pub pass_p50_us: f64,
    pub pass_p99_us: f64,
    pub pass_max_us: f64,
}

impl<G: OrderGateway> MarketMaker<G, ReferencePriceFeed> {
    /// Rejects an invalid configuration up front.
    pub fn new(config: QuoteConfig, gateway: G) -> Result<Self, QuoteError> {
        config.validate()?;
        Self::with_engine(OrderReconciler::new(config), gateway)
    }
}

impl<G: OrderGateway, P: CurrentPrice> MarketMaker<G, P> {
    pub fn with_engine(engine: OrderReconciler<P>, gateway: G) -> Result<Self, QuoteError> {
        let pass_latency_ns = Histogram::new(3)?;
        Ok(Self { inner: Mutex::new(Inner { engine, pass_latency_ns }), gateway })
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Run one event through the engine and send the resulting actions.
    /// Returns how many actions were sent.
    pub fn handle(&self, event: EngineEvent) -> usize {
        let mut inner = self.inner.lock();
        self.dispatch(&mut inner, event)
    }

    /// Apply a new configuration. An invalid one still takes effect (the
    /// ladder is flattened and the engine idles) and the error is returned.
    pub fn reconfigure(&self, config: QuoteConfig) -> Result<(), QuoteError> {
        let mut inner = self.inner.lock();
        self.dispatch(&mut inner, EngineEvent::Reconfigure(config));
        match inner.engine.fault().cloned() {
            Some(fault) => {
                error!(%fault, "Engine idle after reconfiguration");
                metrics::counter!("ladder_config_errors_total").increment(1);
                Err(fault.into())
            }
            None => Ok(()),
        }
    }

    // Caller holds the lock for the whole pass and its dispatch.
    fn dispatch(&self, inner: &mut Inner<P>, event: EngineEvent) -> usize {
        let started = Instant::now();
        let actions = inner.engine.handle(event);

        for action in &actions {
            match action {
                QuoteAction::Place(order) => {
                    metrics::counter!("ladder_orders_placed_total", "side" => order.side.as_str()).increment(1);
                    self.gateway.place_limit(order);
                }
                QuoteAction::Cancel { id, side, .. } => {
                    metrics::counter!("ladder_orders_cancelled_total", "side" => side.as_str()).increment(1);
                    self.gateway.cancel(*id);
                }
            }
        }

        let elapsed = started.elapsed().as_nanos() as u64;
        if let Err(e) = inner.pass_latency_ns.record(elapsed.max(1)) {
            debug!(error = %e, "Pass latency out of histogram range");
        }
        metrics::counter!("ladder_passes_total").increment(1);
        metrics::histogram!("ladder_pass_seconds").record(elapsed as f64 / 1e9);
        metrics::gauge!("ladder_net_position").set(inner.engine.net_position());
        if let Some(reference) = inner.engine.reference() {
            metrics::gauge!("ladder_reference_price").set(reference);
        }
        actions.len()
    }

    /// Read-only access to the engine under the lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&OrderReconciler<P>) -> R) -> R {
        f(&self.inner.lock().engine)
    }

    pub fn status(&self) -> MarketMakerStatus {
        let inner = self.inner.lock();
        let h = &inner.pass_latency_ns;
        let us = |ns: u64| ns as f64 / 1_000.0;
        MarketMakerStatus {
            engine: inner.engine.status(),
            pass_p50_us: us(h.value_at_quantile(0.5)),
            pass_p99_us: us(h.value_at_quantile(0.99)),
            pass_max_us: us(h.max()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ConfigError;
    use crate::engine::types::{OrderId, OrderReport, OrderUpdate, PlaceOrder, Side};
    use crate::market_data::reference::{MarketTick, TickKind};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<QuoteAction>>,
    }

    impl OrderGateway for Recorder {
        fn place_limit(&self, order: &PlaceOrder) {
            self.sent.lock().push(QuoteAction::Place(order.clone()));
        }

        fn cancel(&self, id: OrderId) {
            self.sent.lock().push(QuoteAction::Cancel { id, side: Side::Buy, level_index: 0 });
        }
    }

    fn tick(price: f64) -> EngineEvent {
        EngineEvent::Market(MarketTick::new("BTC", TickKind::LastTrade { price }, 0))
    }

    fn config() -> QuoteConfig {
        QuoteConfig::new("BTC", 1.0, 0.001, 2)
            .with_source(crate::market_data::reference::PriceSource::LeadMark, Some("BTC"))
    }

    #[test]
    fn test_invalid_config_rejected_at_start() {
        let mut bad = config();
        bad.level_count = 0;
        let err = MarketMaker::new(bad, Recorder::default()).err();
        assert!(matches!(err, Some(QuoteError::Config(ConfigError::LevelCount(0)))));
    }

    #[test]
    fn test_actions_reach_gateway_in_order() {
        let mm = MarketMaker::new(config(), Recorder::default()).unwrap();
        assert_eq!(mm.handle(tick(100.0)), 4);
        let sent = mm.gateway().sent.lock().clone();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|a| matches!(a, QuoteAction::Place(_))));
        assert_eq!(mm.status().engine.buys.active, 2);
        assert_eq!(mm.status().engine.passes, 1);
    }

    #[test]
    fn test_reconfigure_surfaces_error_and_flattens() {
        let mm = MarketMaker::new(config(), Recorder::default()).unwrap();
        mm.handle(tick(100.0));
        let mut bad = config();
        bad.shift_coefficient = -0.1;
        assert!(mm.reconfigure(bad).is_err());
        let cancels = mm.gateway().sent.lock().iter().filter(|a| matches!(a, QuoteAction::Cancel { .. })).count();
        assert_eq!(cancels, 4);
        assert!(mm.reconfigure(config()).is_ok());
    }

    #[test]
    fn test_concurrent_callbacks_keep_one_order_per_slot() {
        let mm = Arc::new(MarketMaker::new(config(), Recorder::default()).unwrap());
        mm.handle(tick(100.0));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mm = Arc::clone(&mm);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let px = 100.0 + ((t * 50 + i) % 7) as f64;
                        mm.handle(tick(px));
                        // ack whatever is pending so slots keep cycling
                        let pending: Vec<u64> = mm.inspect(|e| {
                            e.live_orders()
                                .filter(|o| o.state == crate::engine::types::OrderState::PendingCancel)
                                .map(|o| o.id)
                                .collect()
                        });
                        for id in pending {
                            mm.handle(EngineEvent::Order(OrderUpdate::new(id, OrderReport::Canceled)));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        mm.inspect(|e| {
            let mut seen = std::collections::HashSet::new();
            for o in e.live_orders() {
                assert!(seen.insert((o.side, o.level_index)));
            }
        });
        assert!(mm.status().pass_max_us >= 0.0);
    }

    #[test]
    fn test_concurrent_reconfigure_reports_own_result() {
        let mm = Arc::new(MarketMaker::new(config(), Recorder::default()).unwrap());
        mm.handle(tick(100.0));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mm = Arc::clone(&mm);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let mut next = config();
                        let invalid = (t + i) % 2 == 0;
                        if invalid {
                            next.shift_coefficient = 0.0;
                        }
                        assert_eq!(mm.reconfigure(next).is_err(), invalid);
                        mm.handle(tick(100.0 + (i % 5) as f64));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(mm.reconfigure(config()).is_ok());
        assert!(mm.status().engine.fault.is_none());
    }
}
