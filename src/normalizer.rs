// =============================================================================
// Candle Normalizer — raw provider candle -> canonical sink record
// =============================================================================
//
// The record key is a pure function of (type, bucket start, resolution,
// asset). It does not depend on which path (backfill or live) delivered the
// candle, so the sink can upsert by key and keep the latest revision.
// =============================================================================

use serde::Serialize;
use serde_json::{Map, Value};

use crate::market_data::{CandleTime, RawCandle};
use crate::types::CandleType;

/// Name of the record field the sink upserts by.
pub const KEY_FIELD: &str = "key";

/// Canonical, sink-facing shape of a candle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub candle_type: CandleType,
    pub asset: String,
    pub resolution: String,
    /// Bucket start, epoch seconds UTC.
    pub start_time: i64,
    pub updated: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Epoch seconds of the bucket start.
pub fn bucket_start(time: &CandleTime) -> i64 {
    match time {
        CandleTime::Epoch(secs) => *secs,
        CandleTime::Composite(dt) => dt.and_utc().timestamp(),
    }
}

/// `"{type}_{bucket_start}_{resolution}_{asset}"`
pub fn record_key(candle_type: CandleType, start: i64, resolution: &str, asset: &str) -> String {
    format!("{candle_type}_{start}_{resolution}_{asset}")
}

/// Convert a raw candle into its canonical record.
pub fn normalize(raw: &RawCandle, candle_type: CandleType) -> NormalizedRecord {
    let start_time = bucket_start(&raw.start);
    NormalizedRecord {
        key: record_key(candle_type, start_time, &raw.resolution, &raw.asset),
        candle_type,
        asset: raw.asset.clone(),
        resolution: raw.resolution.clone(),
        start_time,
        updated: raw.updated,
        payload: raw.payload.clone(),
    }
}
