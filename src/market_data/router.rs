// Router orchestrates adapter + engine + paper venue
use std::collections::VecDeque;
use std::time::Duration;

use ahash::AHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{QuoteConfig, Settings};
use crate::engine::book::{GatewayCommand, PaperBook, PaperGateway};
use crate::engine::types::Side;
use crate::market_data::adapters::simulated::SimulatedAdapter;
use crate::market_data::adapters::{MarketEvent, VenueAdapter};
use crate::market_data::external_book::ExternalBook;
use crate::market_data::reference::{MarketTick, TickKind};
use crate::quoting::{EngineEvent, MarketMaker, MarketMakerStatus, QuoteError};

/// Engine wired to the paper venue. Everything runs on the caller's task:
/// each event is pushed through the engine and the venue until nothing is
/// left in flight.
pub struct Session {
    pub mm: MarketMaker<PaperGateway>,
    pub paper: PaperBook,
    commands: mpsc::UnboundedReceiver<GatewayCommand>,
    books: AHashMap<String, ExternalBook>,
    security: String,
}

impl Session {
    pub fn new(config: QuoteConfig) -> Result<Self, QuoteError> {
        let (gateway, commands) = PaperGateway::channel();
        let security = config.security.clone();
        Ok(Self {
            mm: MarketMaker::new(config, gateway)?,
            paper: PaperBook::new(),
            commands,
            books: AHashMap::new(),
            security,
        })
    }

    pub fn book(&self, instrument: &str) -> Option<&ExternalBook> {
        self.books.get(instrument)
    }

    /// Resting quotes the new market trades through are filled before the
    /// engine sees the new reference price.
    pub fn on_market(&mut self, event: MarketEvent) {
        let (tick, crosses) = self.translate(event);
        for (side, price, size) in crosses {
            let fills = self.paper.cross(side, price, size);
            if !fills.is_empty() {
                debug!(%side, price, fills = fills.len(), "Market traded through our quotes");
            }
            for event in fills {
                self.settle(event);
            }
        }
        if let Some(tick) = tick {
            self.settle(EngineEvent::Market(tick));
        }
    }

    /// Feed one engine event and everything the venue answers with.
    pub fn settle(&mut self, event: EngineEvent) {
        self.mm.handle(event);
        self.drain();
    }

    /// Swap the quoting configuration and settle the resulting orders. An
    /// invalid config still flattens the ladder before the error returns.
    pub fn reconfigure(&mut self, config: QuoteConfig) -> Result<(), QuoteError> {
        self.security = config.security.clone();
        let result = self.mm.reconfigure(config);
        self.drain();
        result
    }

    // Pass queued gateway commands to the venue and its reports back, in order.
    fn drain(&mut self) {
        let mut queue = VecDeque::new();
        loop {
            while let Ok(command) = self.commands.try_recv() {
                queue.extend(self.paper.apply(command));
            }
            let Some(event) = queue.pop_front() else {
                break;
            };
            self.mm.handle(event);
        }
    }

    // Market event -> reference tick, plus any crossings of our resting quotes
    fn translate(&mut self, event: MarketEvent) -> (Option<MarketTick>, Vec<(Side, f64, f64)>) {
        match event {
            MarketEvent::Snapshot { instrument, bids, asks, ts_ms } => {
                let book = self.books.entry(instrument.clone()).or_default();
                book.apply_snapshot(&bids, &asks);
                let (bid, ask) = book.bbo();

                let mut crosses = Vec::new();
                if instrument == self.security {
                    // someone sells into our bids / buys our asks
                    if let Some((px, size)) = ask {
                        crosses.push((Side::Buy, px, size));
                    }
                    if let Some((px, size)) = bid {
                        crosses.push((Side::Sell, px, size));
                    }
                }
                let kind = TickKind::TopOfBook { bid: bid.map(|b| b.0), ask: ask.map(|a| a.0) };
                (Some(MarketTick::new(&instrument, kind, ts_ms)), crosses)
            }
            MarketEvent::Trade { instrument, price, ts_ms, .. } => {
                (Some(MarketTick::new(&instrument, TickKind::LastTrade { price }, ts_ms)), Vec::new())
            }
            MarketEvent::Mark { instrument, price, ts_ms } => {
                (Some(MarketTick::new(&instrument, TickKind::Mark { price }, ts_ms)), Vec::new())
            }
            MarketEvent::Index { instrument, price, ts_ms } => {
                (Some(MarketTick::new(&instrument, TickKind::Index { price }, ts_ms)), Vec::new())
            }
        }
    }
}

pub async fn run_demo(settings: Settings) -> anyhow::Result<MarketMakerStatus> {
    let quote = settings.quote;
    let sim = settings.simulation;
    info!(security = %quote.security, levels = quote.level_count, source = ?quote.price_source, "Starting paper market maker");

    // 1. Create the simulated venue feed
    let mut adapter = SimulatedAdapter::new(&quote.security, quote.lead_security.as_deref(), sim.start_price)
        .with_seed(sim.seed)
        .with_interval(Duration::from_millis(sim.interval_ms.max(1)));
    if let Some(ticks) = sim.ticks {
        adapter = adapter.with_ticks(ticks);
    }

    // 2. Engine + paper venue
    let mut session = Session::new(quote)?;

    // 3. Channel for market events
    let (tx, mut rx) = mpsc::channel::<MarketEvent>(1000);
    let adapter_task = tokio::spawn(async move {
        adapter.spawn(tx).await;
    });

    // 4. Single consumer loop; status every second
    let mut status_tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => session.on_market(event),
                None => break,
            },
            _ = status_tick.tick() => {
                let status = session.mm.status();
                info!(status = %serde_json::to_string(&status)?, "Engine status");
            }
        }
    }

    adapter_task.await?;
    let status = session.mm.status();
    info!(status = %serde_json::to_string(&status)?, resting = session.paper.len(), "Feed finished");
    Ok(status)
}
