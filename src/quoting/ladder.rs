use tracing::trace;

use crate::config::QuoteConfig;
use crate::engine::types::Side;
use crate::market_data::normaliser::Normaliser;
use crate::quoting::exposure::ExposureTracker;
use crate::quoting::types::{Ladder, QuoteLevel};

/// Builds the target ladder from the reference price and remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderPlanner {
    pub shift_coefficient: f64,
    pub max_volume_per_level: f64,
    pub level_count: usize,
    pub normaliser: Normaliser,
}

impl LadderPlanner {
    pub fn new(shift_coefficient: f64, max_volume_per_level: f64, level_count: usize, normaliser: Normaliser) -> Self {
        Self { shift_coefficient, max_volume_per_level, level_count, normaliser }
    }

    pub fn from_config(config: &QuoteConfig) -> Self {
        Self::new(
            config.shift_coefficient,
            config.max_volume_per_level,
            config.level_count,
            Normaliser::new(config.price_step, config.volume_step, config.min_volume),
        )
    }

    /// Un-normalised price of a level.
    pub fn raw_price(&self, reference: f64, side: Side, level_index: usize) -> f64 {
        let offset = reference * self.shift_coefficient * level_index as f64;
        match side {
            Side::Buy => reference - offset,
            Side::Sell => reference + offset,
        }
    }

    /// Target ladder for both sides. An undefined reference or a non-positive
    /// shift/volume cap yields a flat ladder (all volumes zero).
    pub fn plan(&self, reference: Option<f64>, exposure: &ExposureTracker) -> Ladder {
        let reference = reference.filter(|p| p.is_finite() && *p > 0.0);
        let live = self.shift_coefficient > 0.0 && self.max_volume_per_level > 0.0;

        let ladder = Ladder {
            reference,
            buys: self.plan_side(Side::Buy, reference.filter(|_| live), exposure),
            sells: self.plan_side(Side::Sell, reference.filter(|_| live), exposure),
        };
        trace!(?reference, flat = ladder.is_flat(), "Planned ladder");
        ladder
    }

    fn plan_side(&self, side: Side, reference: Option<f64>, exposure: &ExposureTracker) -> Vec<QuoteLevel> {
        let Some(reference) = reference else {
            return (1..=self.level_count)
                .map(|level_index| QuoteLevel { side, level_index, target_price: 0.0, target_volume: 0.0 })
                .collect();
        };

        let tracker = ExposureTracker { max_volume_per_level: self.max_volume_per_level, level_count: self.level_count, ..*exposure };
        let mut allocation = tracker.allocate(side);
        allocation.resize(self.level_count, 0.0);

        // lot rounding may not push a side past its capacity; walk farthest first
        let mut left = tracker.remaining(side);
        let mut levels: Vec<QuoteLevel> = allocation
            .into_iter()
            .enumerate()
            .rev()
            .map(|(i, raw_volume)| {
                let level_index = i + 1;
                let target_price = self.normaliser.normalize_price(self.raw_price(reference, side, level_index));
                let mut target_volume = self.normaliser.normalize_volume(raw_volume);
                if target_volume > left + 1e-9 {
                    target_volume = self.normaliser.floor_volume(left);
                }
                left = (left - target_volume).max(0.0);
                QuoteLevel { side, level_index, target_price, target_volume }
            })
            .collect();
        levels.reverse();
        levels
    }
}
