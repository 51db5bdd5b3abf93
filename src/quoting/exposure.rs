use crate::engine::types::Side;

/// Turns the net position into per-side quoting capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureTracker {
    pub net_position: f64, // positive = long, negative = short
    pub max_volume_per_level: f64,
    pub level_count: usize,
}

impl ExposureTracker {
    pub fn new(max_volume_per_level: f64, level_count: usize) -> Self {
        Self { net_position: 0.0, max_volume_per_level, level_count }
    }

    pub fn set_position(&mut self, net_position: f64) {
        if net_position.is_finite() {
            self.net_position = net_position;
        }
    }

    pub fn apply_delta(&mut self, delta: f64) {
        if delta.is_finite() {
            self.net_position += delta;
        }
    }

    /// Symmetric per-side budget.
    pub fn budget(&self) -> f64 {
        (self.max_volume_per_level * self.level_count as f64).max(0.0)
    }

    pub fn remaining(&self, side: Side) -> f64 {
        let remaining = match side {
            Side::Buy => self.budget() - self.net_position,
            Side::Sell => self.budget() + self.net_position,
        };
        remaining.max(0.0)
    }

    /// Raw (pre-normalisation) volume per level, index 0 = level 1.
    ///
    /// Capacity is handed out from the farthest level inwards, so a short
    /// budget starves the levels nearest the reference price first.
    pub fn allocate(&self, side: Side) -> Vec<f64> {
        let mut left = self.remaining(side);
        let mut volumes = vec![0.0; self.level_count];
        for slot in volumes.iter_mut().rev() {
            let take = left.min(self.max_volume_per_level).max(0.0);
            *slot = take;
            left -= take;
        }
        volumes
    }
}
