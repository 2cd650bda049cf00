// =============================================================================
// Ports — interfaces to the provider, the sink and the checkpoint store
// =============================================================================

use std::collections::BTreeSet;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::Stream;

use crate::market_data::RawCandle;
use crate::normalizer::NormalizedRecord;
use crate::types::{AssetTarget, CandleType};

/// Continuous sequence of raw candles. Ends (or yields an error) when the
/// underlying subscription closes.
pub type CandleStream = Pin<Box<dyn Stream<Item = Result<RawCandle>> + Send>>;

/// Bounds of the history the provider holds for one candle type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoricRange {
    pub first: i64,
    pub last: i64,
}

/// Durable "everything before this timestamp was delivered" marker.
#[async_trait]
pub trait CheckpointPort: Send + Sync {
    /// `None` means no prior run: replay all available history.
    async fn get_last_position(&self) -> Result<Option<i64>>;
    async fn save_position(&self, position: i64) -> Result<()>;
}

/// Downstream sink. Idempotent by `key_field`; no ordering requirement.
#[async_trait]
pub trait SinkPort: Send + Sync {
    async fn upsert(&self, record: &NormalizedRecord, key_field: &str) -> Result<()>;
}

/// Request/response side of the provider.
#[async_trait]
pub trait ProviderQuery: Send + Sync {
    async fn assets(&self) -> Result<BTreeSet<String>>;

    async fn historic_range(&self, candle_type: CandleType) -> Result<Option<HistoricRange>>;

    /// Candles with bucket start in `[from, to)`.
    async fn historic_window(
        &self,
        candle_type: CandleType,
        target: &AssetTarget,
        from: i64,
        to: i64,
        resolution: &str,
    ) -> Result<Vec<RawCandle>>;
}

/// Streaming side of the provider.
#[async_trait]
pub trait ProviderStream: Send + Sync {
    /// An empty `assets` filter subscribes to every asset.
    async fn subscribe(
        &self,
        candle_type: CandleType,
        resolution: &str,
        assets: &[String],
    ) -> Result<CandleStream>;
}
