//! Engine configuration.
//!
//! Settings are layered with the `config` crate: an optional file first, then
//! `LADDER__*` environment variables (e.g. `LADDER__QUOTE__LEVEL_COUNT=5`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::market_data::reference::PriceSource;
use crate::quoting::types::QuoteError;

pub const DEFAULT_PRICE_TOLERANCE: f64 = 0.0005;
/// Upper bound on levels per side.
pub const MAX_LEVEL_COUNT: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("level_count must be at least 1, got {0}")]
    LevelCount(usize),
    #[error("level_count must be at most 1000, got {0}")]
    TooManyLevels(usize),
    #[error("shift_coefficient must be positive, got {0}")]
    ShiftCoefficient(f64),
    #[error("max_volume_per_level must be positive, got {0}")]
    MaxVolumePerLevel(f64),
    #[error("price_step must be positive, got {0}")]
    PriceStep(f64),
    #[error("volume_step must be positive, got {0}")]
    VolumeStep(f64),
    #[error("min_volume must not be negative, got {0}")]
    MinVolume(f64),
    #[error("price_tolerance must not be negative, got {0}")]
    PriceTolerance(f64),
    #[error("price source {0:?} needs a lead_security")]
    MissingLeadSecurity(PriceSource),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteConfig {
    pub security: String,
    pub max_volume_per_level: f64,
    pub shift_coefficient: f64,
    pub level_count: usize,
    #[serde(default = "default_price_source")]
    pub price_source: PriceSource,
    #[serde(default)]
    pub lead_security: Option<String>,
    #[serde(default = "default_price_step")]
    pub price_step: f64,
    #[serde(default = "default_volume_step")]
    pub volume_step: f64,
    #[serde(default)]
    pub min_volume: f64,
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: f64,
}

fn default_price_source() -> PriceSource {
    PriceSource::OwnBook
}

fn default_price_step() -> f64 {
    0.01
}

fn default_volume_step() -> f64 {
    1.0
}

fn default_price_tolerance() -> f64 {
    DEFAULT_PRICE_TOLERANCE
}

impl QuoteConfig {
    pub fn new(security: &str, max_volume_per_level: f64, shift_coefficient: f64, level_count: usize) -> Self {
        Self {
            security: security.to_string(),
            max_volume_per_level,
            shift_coefficient,
            level_count,
            price_source: default_price_source(),
            lead_security: None,
            price_step: default_price_step(),
            volume_step: default_volume_step(),
            min_volume: 0.0,
            price_tolerance: DEFAULT_PRICE_TOLERANCE,
        }
    }

    pub fn with_source(mut self, source: PriceSource, lead_security: Option<&str>) -> Self {
        self.price_source = source;
        self.lead_security = lead_security.map(str::to_string);
        self
    }

    pub fn with_steps(mut self, price_step: f64, volume_step: f64) -> Self {
        self.price_step = price_step;
        self.volume_step = volume_step;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level_count < 1 {
            return Err(ConfigError::LevelCount(self.level_count));
        }
        if self.level_count > MAX_LEVEL_COUNT {
            return Err(ConfigError::TooManyLevels(self.level_count));
        }
        if !positive(self.shift_coefficient) {
            return Err(ConfigError::ShiftCoefficient(self.shift_coefficient));
        }
        if !positive(self.max_volume_per_level) {
            return Err(ConfigError::MaxVolumePerLevel(self.max_volume_per_level));
        }
        if !positive(self.price_step) {
            return Err(ConfigError::PriceStep(self.price_step));
        }
        if !positive(self.volume_step) {
            return Err(ConfigError::VolumeStep(self.volume_step));
        }
        if !(self.min_volume >= 0.0 && self.min_volume.is_finite()) {
            return Err(ConfigError::MinVolume(self.min_volume));
        }
        if !(self.price_tolerance >= 0.0 && self.price_tolerance.is_finite()) {
            return Err(ConfigError::PriceTolerance(self.price_tolerance));
        }
        if self.price_source.uses_lead() && self.lead_security.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingLeadSecurity(self.price_source));
        }
        Ok(())
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Demo feed knobs; ignored when the engine is embedded in a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_start_price")]
    pub start_price: f64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub ticks: Option<usize>,
}

fn default_start_price() -> f64 {
    100.0
}

fn default_interval_ms() -> u64 {
    250
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { start_price: default_start_price(), interval_ms: default_interval_ms(), seed: 0, ticks: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub quote: QuoteConfig,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

impl Settings {
    /// File (if given) then `LADDER__` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, QuoteError> {
        let mut builder = ::config::Config::builder()
            .set_default("quote.security", "ETH-PERP")?
            .set_default("quote.max_volume_per_level", 1.0)?
            .set_default("quote.shift_coefficient", 0.001)?
            .set_default("quote.level_count", 3)?;
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("LADDER").separator("__").try_parsing(true))
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }
}
