use std::collections::BTreeMap;

use crate::market_data::RawCandle;

/// Holding area for live candles that arrive while backfill is running.
///
/// Keyed by bucket start so the drain replays candles in ascending time order,
/// and in arrival order within one bucket. Owned by the reconciliation task;
/// never shared, never persisted.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    buckets: BTreeMap<i64, Vec<RawCandle>>,
    len: usize,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bucket_start: i64, candle: RawCandle) {
        self.buckets.entry(bucket_start).or_default().push(candle);
        self.len += 1;
    }

    /// Take every buffered candle, ascending by bucket start then by arrival.
    /// The buffer is empty afterwards.
    pub fn drain_ordered(&mut self) -> impl Iterator<Item = (i64, RawCandle)> {
        self.len = 0;
        std::mem::take(&mut self.buckets)
            .into_iter()
            .flat_map(|(ts, candles)| candles.into_iter().map(move |c| (ts, c)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Earliest buffered bucket start, if any.
    pub fn first_bucket(&self) -> Option<i64> {
        self.buckets.keys().next().copied()
    }
}
