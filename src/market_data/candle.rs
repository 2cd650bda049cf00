use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Bucket start as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandleTime {
    /// Epoch seconds, UTC.
    Epoch(i64),
    /// Calendar fields (year/month/day/hour/minute) with seconds fixed at zero.
    Composite(NaiveDateTime),
}

impl CandleTime {
    /// Build a composite time from calendar fields. Returns `None` for an
    /// impossible date such as February 30th.
    pub fn composite(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .map(Self::Composite)
    }
}

/// A single sentiment candle as emitted by the provider, either on the live
/// stream or in a historical window.
///
/// Only the identifying fields are interpreted; the sentiment counts and sums
/// are carried through untouched in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawCandle {
    pub asset: String,
    pub resolution: String,
    pub start: CandleTime,
    /// The provider revised a bucket it had already emitted.
    pub updated: bool,
    pub payload: Map<String, Value>,
}

/// Fields consumed by the decoder. Everything else lands in `payload`.
const RESERVED_FIELDS: &[&str] = &[
    "asset",
    "symbol",
    "resolution",
    "start_time",
    "updated",
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "type",
    "key",
];

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a candle object.
///
/// Expected shape:
/// ```json
/// { "asset": "BTC", "resolution": "M1", "start_time": 1700000040,
///   "updated": false, "positive": 12, "negative": 3, "sentiment_sum": 4.5 }
/// ```
///
/// `start_time` may also be `{ "seconds": "1700000040" }`, or a composite
/// `{ "year": 2023, "month": 11, "day": 14, "hour": 22, "minute": 14 }`. When
/// `start_time` is absent the composite fields are read from the top level.
pub fn parse_candle(value: &Value) -> Result<RawCandle> {
    let obj = value.as_object().context("candle is not a JSON object")?;

    let asset = obj
        .get("asset")
        .or_else(|| obj.get("symbol"))
        .and_then(Value::as_str)
        .context("missing field asset")?
        .to_uppercase();

    let resolution = obj
        .get("resolution")
        .and_then(Value::as_str)
        .context("missing field resolution")?
        .to_string();

    let start = match obj.get("start_time") {
        Some(v) => parse_candle_time(v).context("invalid field start_time")?,
        None => parse_composite(obj).context("missing field start_time")?,
    };

    let updated = match obj.get("updated") {
        None | Some(Value::Null) => false,
        Some(v) => v.as_bool().context("field updated is not a bool")?,
    };

    let payload = obj
        .iter()
        .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(RawCandle {
        asset,
        resolution,
        start,
        updated,
        payload,
    })
}

/// Decode a text frame from the live stream. Accepts either a bare candle or
/// a `{ "data": { ... } }` envelope.
pub fn parse_candle_message(text: &str) -> Result<RawCandle> {
    let root: Value = serde_json::from_str(text).context("failed to parse candle JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    parse_candle(data)
}

fn parse_candle_time(value: &Value) -> Result<CandleTime> {
    match value {
        Value::Object(obj) if obj.contains_key("seconds") => {
            Ok(CandleTime::Epoch(parse_i64(&obj["seconds"], "start_time.seconds")?))
        }
        Value::Object(obj) => parse_composite(obj),
        other => Ok(CandleTime::Epoch(parse_i64(other, "start_time")?)),
    }
}

fn parse_composite(obj: &Map<String, Value>) -> Result<CandleTime> {
    let field = |name: &str| -> Result<i64> {
        parse_i64(
            obj.get(name)
                .with_context(|| format!("missing composite field {name}"))?,
            name,
        )
    };

    let year = i32::try_from(field("year")?).context("year out of range")?;
    let month = u32::try_from(field("month")?).context("month out of range")?;
    let day = u32::try_from(field("day")?).context("day out of range")?;
    let hour = u32::try_from(field("hour")?).context("hour out of range")?;
    let minute = u32::try_from(field("minute")?).context("minute out of range")?;

    CandleTime::composite(year, month, day, hour, minute).with_context(|| {
        format!("invalid composite time {year}-{month}-{day} {hour}:{minute}")
    })
}

/// Protobuf-style encoders send 64-bit integers as JSON strings.
fn parse_i64(val: &Value, name: &str) -> Result<i64> {
    match val {
        Value::String(s) => s
            .parse::<i64>()
            .with_context(|| format!("failed to parse {name} as i64: {s}")),
        Value::Number(n) => n
            .as_i64()
            .with_context(|| format!("field {name} is not a valid i64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
