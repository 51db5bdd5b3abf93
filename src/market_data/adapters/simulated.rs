// Seeded random-walk venue used by the demo and tests.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::{MarketEvent, VenueAdapter};

#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    pub security: String,
    pub lead_security: Option<String>,
    pub start_price: f64,
    pub volatility: f64, // relative stdev-ish move per tick
    pub half_spread: f64,
    pub interval: Duration,
    pub ticks: Option<usize>, // None = run forever
    pub seed: u64,
}

impl SimulatedAdapter {
    pub fn new(security: &str, lead_security: Option<&str>, start_price: f64) -> Self {
        Self {
            security: security.to_string(),
            lead_security: lead_security.map(str::to_string),
            start_price,
            volatility: 0.0005,
            half_spread: 0.0002,
            interval: Duration::from_millis(250),
            ticks: None,
            seed: 7,
        }
    }

    pub fn with_ticks(mut self, ticks: usize) -> Self {
        self.ticks = Some(ticks);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    // Three-level depth around `mid`
    fn depth(&self, mid: f64) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let half = mid * self.half_spread;
        let bids = (0..3).map(|i| (mid - half * (1 + 2 * i) as f64, 5.0 + i as f64)).collect();
        let asks = (0..3).map(|i| (mid + half * (1 + 2 * i) as f64, 5.0 + i as f64)).collect();
        (bids, asks)
    }

    /// Deterministic event sequence for one step of the walk.
    pub fn step(&self, rng: &mut StdRng, mid: &mut f64, seq: u64) -> Vec<MarketEvent> {
        let shock: f64 = rng.gen_range(-1.0..1.0);
        *mid = (*mid * (1.0 + shock * self.volatility)).max(self.start_price * 0.01);
        let ts_ms = seq * self.interval.as_millis() as u64;

        let (bids, asks) = self.depth(*mid);
        let mut events = vec![MarketEvent::Snapshot {
            instrument: self.security.clone(),
            bids,
            asks,
            ts_ms,
        }];

        if let Some(lead) = &self.lead_security {
            // the lead trades slightly off our mid
            let basis: f64 = rng.gen_range(-0.5..0.5) * self.half_spread;
            let lead_px = *mid * (1.0 + basis);
            let (bids, asks) = self.depth(lead_px);
            events.push(MarketEvent::Snapshot { instrument: lead.clone(), bids, asks, ts_ms });
            events.push(MarketEvent::Trade {
                instrument: lead.clone(),
                price: lead_px,
                size: rng.gen_range(0.1..2.0),
                ts_ms,
            });
            events.push(MarketEvent::Mark { instrument: lead.clone(), price: lead_px, ts_ms });
            events.push(MarketEvent::Index { instrument: lead.clone(), price: *mid, ts_ms });
        }
        events
    }
}

#[async_trait::async_trait]
impl VenueAdapter for SimulatedAdapter {
    async fn spawn(&self, tx: tokio::sync::mpsc::Sender<MarketEvent>) {
        info!(security = %self.security, lead = ?self.lead_security, seed = self.seed, "Starting simulated feed");
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut mid = self.start_price;
        let mut interval = tokio::time::interval(self.interval);
        let mut seq = 0u64;

        loop {
            if self.ticks.is_some_and(|limit| seq as usize >= limit) {
                debug!(ticks = seq, "Simulated feed finished");
                return;
            }
            interval.tick().await;
            for event in self.step(&mut rng, &mut mid, seq) {
                if tx.send(event).await.is_err() {
                    debug!("Market event receiver dropped, stopping feed");
                    return;
                }
            }
            seq += 1;
        }
    }
}
