// Shared trait + event for market data adapters

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    // Full depth snapshot at a point in time
    Snapshot {
        instrument: String,
        bids: Vec<(f64, f64)>, // (price, size)
        asks: Vec<(f64, f64)>,
        ts_ms: u64,
    },
    Trade { instrument: String, price: f64, size: f64, ts_ms: u64 },
    Mark { instrument: String, price: f64, ts_ms: u64 },
    Index { instrument: String, price: f64, ts_ms: u64 },
}

#[async_trait::async_trait]
pub trait VenueAdapter {
    // Push events into the router until the feed ends or the receiver is dropped.
    async fn spawn(&self, tx: tokio::sync::mpsc::Sender<MarketEvent>);
}

pub mod simulated;
