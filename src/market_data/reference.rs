//! Reference ("lead") price tracking.
//!
//! The feed keeps only the most recent valid price from the configured
//! source. There is no history and no staleness timeout: the last tick that
//! matches the source wins, whatever order ticks arrive in.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::QuoteConfig;

/// Where the ladder takes its centre price from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Midpoint of the quoted instrument's own top of book.
    OwnBook,
    /// Midpoint of the lead instrument's top of book.
    LeadBook,
    /// Lead instrument mark / last trade price.
    LeadMark,
    /// Lead instrument index price.
    LeadIndex,
}

impl PriceSource {
    pub fn uses_lead(&self) -> bool {
        !matches!(self, PriceSource::OwnBook)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickKind {
    TopOfBook { bid: Option<f64>, ask: Option<f64> },
    LastTrade { price: f64 },
    Mark { price: f64 },
    Index { price: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketTick {
    pub instrument: String,
    pub kind: TickKind,
    pub ts_ms: u64,
}

impl MarketTick {
    pub fn new(instrument: &str, kind: TickKind, ts_ms: u64) -> Self {
        Self { instrument: instrument.to_string(), kind, ts_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceQuote {
    pub price: f64,
    pub source: PriceSource,
    pub as_of_ms: u64,
}

/// Capability the ladder planner needs: "what is the price right now".
pub trait CurrentPrice: Send {
    fn current_price(&self) -> Option<f64>;

    /// Offer a market tick; returns true when the current price changed.
    fn observe(&mut self, _tick: &MarketTick) -> bool {
        false
    }

    /// Follow a configuration change (source or instruments).
    fn reconfigure(&mut self, _config: &QuoteConfig) {}
}

#[derive(Debug, Clone)]
pub struct ReferencePriceFeed {
    source: PriceSource,
    security: String,
    lead_security: Option<String>,
    last: Option<ReferenceQuote>,
}

impl ReferencePriceFeed {
    pub fn new(source: PriceSource, security: &str, lead_security: Option<&str>) -> Self {
        Self {
            source,
            security: security.to_string(),
            lead_security: lead_security.map(str::to_string),
            last: None,
        }
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    pub fn last(&self) -> Option<ReferenceQuote> {
        self.last
    }

    pub fn has_value(&self) -> bool {
        self.last.is_some()
    }

    /// Switch source or instruments. The held price is dropped when the
    /// origin actually changes.
    pub fn retarget(&mut self, source: PriceSource, security: &str, lead_security: Option<&str>) {
        let changed = source != self.source
            || security != self.security
            || lead_security != self.lead_security.as_deref();
        if changed {
            self.source = source;
            self.security = security.to_string();
            self.lead_security = lead_security.map(str::to_string);
            self.last = None;
        }
    }

    fn watched_instrument(&self) -> Option<&str> {
        match self.source {
            PriceSource::OwnBook => Some(self.security.as_str()),
            _ => self.lead_security.as_deref(),
        }
    }

    fn extract(&self, kind: &TickKind) -> Option<f64> {
        let price = match (self.source, kind) {
            (PriceSource::OwnBook | PriceSource::LeadBook, TickKind::TopOfBook { bid, ask }) => {
                match (bid, ask) {
                    (Some(b), Some(a)) => (b + a) / 2.0,
                    (Some(p), None) | (None, Some(p)) => *p,
                    (None, None) => return None,
                }
            }
            (PriceSource::LeadMark, TickKind::Mark { price } | TickKind::LastTrade { price }) => *price,
            (PriceSource::LeadIndex, TickKind::Index { price }) => *price,
            _ => return None,
        };
        (price.is_finite() && price > 0.0).then_some(price)
    }
}

impl CurrentPrice for ReferencePriceFeed {
    fn current_price(&self) -> Option<f64> {
        self.last.map(|q| q.price)
    }

    fn observe(&mut self, tick: &MarketTick) -> bool {
        if self.watched_instrument() != Some(tick.instrument.as_str()) {
            return false;
        }
        let Some(price) = self.extract(&tick.kind) else {
            return false;
        };
        let changed = self.current_price() != Some(price);
        self.last = Some(ReferenceQuote { price, source: self.source, as_of_ms: tick.ts_ms });
        trace!(price, source = ?self.source, changed, "Reference tick");
        changed
    }

    fn reconfigure(&mut self, config: &QuoteConfig) {
        self.retarget(config.price_source, &config.security, config.lead_security.as_deref());
    }
}

/// Fixed price, handy when the host already computes the reference itself.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FixedPrice(pub Option<f64>);

impl CurrentPrice for FixedPrice {
    fn current_price(&self) -> Option<f64> {
        self.0.filter(|p| p.is_finite() && *p > 0.0)
    }
}
