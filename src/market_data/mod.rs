pub mod candle;
pub mod live;
pub mod paginator;

// Re-export the candle types for convenient access (e.g. `use crate::market_data::RawCandle`).
pub use candle::{CandleTime, RawCandle};
