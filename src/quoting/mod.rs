// Quote engine entrypoint
pub mod types;        // ladder levels, actions, events, errors
pub mod exposure;     // net position -> per-side capacity
pub mod ladder;       // target ladder planning
pub mod reconciler;   // slot state machine, target vs live diff
pub mod market_maker; // thread-safe host that talks to the gateway

pub use market_maker::{MarketMaker, MarketMakerStatus};
pub use reconciler::{OrderReconciler, SlotState};
pub use types::{Actions, EngineEvent, EngineStatus, Ladder, QuoteAction, QuoteError, QuoteLevel};
