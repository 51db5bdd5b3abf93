// Snap raw prices/volumes onto the instrument's tick and lot grid.
// A result of 0.0 means "do not quote this slot".

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normaliser {
    pub price_step: f64,  // tick size, e.g. 0.01
    pub volume_step: f64, // lot size, e.g. 1.0
    pub min_volume: f64,  // exchange minimum, 0 = none
}

impl Normaliser {
    pub fn new(price_step: f64, volume_step: f64, min_volume: f64) -> Self {
        Self { price_step, volume_step, min_volume }
    }

    /// Round to the nearest tick, halves away from zero.
    pub fn normalize_price(&self, raw: f64) -> f64 {
        if !valid_input(raw) || !valid_input(self.price_step) {
            return 0.0;
        }
        let price = snap(raw, self.price_step);
        if price > 0.0 { price } else { 0.0 }
    }

    /// Round to the nearest lot. A positive request never collapses to zero:
    /// it is lifted to one lot and then to `min_volume`.
    pub fn normalize_volume(&self, raw: f64) -> f64 {
        if !valid_input(raw) || !valid_input(self.volume_step) {
            return 0.0;
        }
        let mut volume = snap(raw, self.volume_step);
        if volume <= 0.0 {
            volume = self.volume_step;
        }
        if volume < self.min_volume {
            volume = snap_up(self.min_volume, self.volume_step);
        }
        volume
    }

    /// Largest whole number of lots not above `cap`, or 0 when that is
    /// below `min_volume`.
    pub fn floor_volume(&self, cap: f64) -> f64 {
        if !valid_input(cap) || !valid_input(self.volume_step) {
            return 0.0;
        }
        let volume = snap_down(cap, self.volume_step);
        if volume < self.min_volume { 0.0 } else { volume }
    }

    /// True when two volumes are the same once rounded to a lot.
    pub fn same_volume(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.volume_step / 2.0
    }
}

fn valid_input(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn snap(value: f64, step: f64) -> f64 {
    // f64::round is half-away-from-zero
    let steps = (value / step).round();
    trim(steps * step, step)
}

fn snap_down(value: f64, step: f64) -> f64 {
    let steps = (value / step + 1e-9).floor();
    trim(steps * step, step)
}

fn snap_up(value: f64, step: f64) -> f64 {
    let steps = (value / step - 1e-9).ceil();
    trim(steps * step, step)
}

// Drop the float noise that `steps * step` leaves behind (99.9000000001).
fn trim(value: f64, step: f64) -> f64 {
    let decimals = step_decimals(step);
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

fn step_decimals(step: f64) -> u32 {
    let mut decimals = 0;
    let mut scaled = step;
    while decimals < 12 && (scaled - scaled.round()).abs() > 1e-9 {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}
