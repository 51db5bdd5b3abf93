pub mod config;
pub mod engine;
pub mod market_data;
pub mod quoting;
pub mod telemetry;
