//! In-memory port doubles for unit tests.

use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Map};
use tokio::sync::mpsc;

use crate::market_data::{CandleTime, RawCandle};
use crate::normalizer::{bucket_start, NormalizedRecord};
use crate::ports::{CandleStream, CheckpointPort, HistoricRange, ProviderQuery, ProviderStream, SinkPort};
use crate::types::{AssetTarget, CandleType};

pub fn candle(asset: &str, start: i64, updated: bool) -> RawCandle {
    let mut payload = Map::new();
    payload.insert("count".into(), json!(1));
    RawCandle {
        asset: asset.into(),
        resolution: "M1".into(),
        start: CandleTime::Epoch(start),
        updated,
        payload,
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySink {
    records: Mutex<HashMap<String, NormalizedRecord>>,
    log: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Keys in upsert order, duplicates included.
    pub fn upsert_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<NormalizedRecord> {
        self.records.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn snapshot(&self) -> HashMap<String, NormalizedRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl SinkPort for MemorySink {
    async fn upsert(&self, record: &NormalizedRecord, key_field: &str) -> Result<()> {
        assert_eq!(key_field, "key");
        self.log.lock().push(record.key.clone());
        self.records.lock().insert(record.key.clone(), record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCheckpoint {
    position: Mutex<Option<i64>>,
    saves: Mutex<Vec<i64>>,
    failing: Mutex<bool>,
}

impl MemoryCheckpoint {
    pub fn with_position(position: i64) -> Self {
        let cp = Self::default();
        *cp.position.lock() = Some(position);
        cp
    }

    /// Every value passed to `save_position`, including failed attempts.
    pub fn saves(&self) -> Vec<i64> {
        self.saves.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl CheckpointPort for MemoryCheckpoint {
    async fn get_last_position(&self) -> Result<Option<i64>> {
        Ok(*self.position.lock())
    }

    async fn save_position(&self, position: i64) -> Result<()> {
        self.saves.lock().push(position);
        if *self.failing.lock() {
            return Err(anyhow!("disk full"));
        }
        *self.position.lock() = Some(position);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

type LiveItem = std::result::Result<RawCandle, String>;

/// Provider double: fixed asset list, canned history, and a live stream fed
/// from the test.
pub struct ScriptedProvider {
    assets: BTreeSet<String>,
    history: Mutex<Vec<RawCandle>>,
    queried: Mutex<Vec<(AssetTarget, i64, i64)>>,
    fail_at: Mutex<Option<i64>>,
    unreachable: Mutex<bool>,
    live_tx: Mutex<Option<mpsc::UnboundedSender<LiveItem>>>,
    live_rx: Mutex<Option<mpsc::UnboundedReceiver<LiveItem>>>,
}

impl ScriptedProvider {
    pub fn new(assets: &[&str]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            assets: assets.iter().map(|a| a.to_string()).collect(),
            history: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            fail_at: Mutex::new(None),
            unreachable: Mutex::new(false),
            live_tx: Mutex::new(Some(tx)),
            live_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn add_history(&self, asset: &str, starts: &[i64]) {
        let mut history = self.history.lock();
        history.extend(starts.iter().map(|s| candle(asset, *s, false)));
    }

    /// Queries whose window starts at `start` fail.
    pub fn fail_window_at(&self, start: i64) {
        *self.fail_at.lock() = Some(start);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    pub fn queried_windows(&self) -> Vec<(AssetTarget, i64, i64)> {
        self.queried.lock().clone()
    }

    pub fn push_live(&self, candle: RawCandle) {
        if let Some(tx) = self.live_tx.lock().as_ref() {
            let _ = tx.send(Ok(candle));
        }
    }

    pub fn push_live_error(&self, reason: &str) {
        if let Some(tx) = self.live_tx.lock().as_ref() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// End the live stream after everything already pushed.
    pub fn close_live(&self) {
        self.live_tx.lock().take();
    }

    fn check_reachable(&self) -> Result<()> {
        if *self.unreachable.lock() {
            return Err(anyhow!("provider unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderQuery for ScriptedProvider {
    async fn assets(&self) -> Result<BTreeSet<String>> {
        self.check_reachable()?;
        Ok(self.assets.clone())
    }

    async fn historic_range(&self, _candle_type: CandleType) -> Result<Option<HistoricRange>> {
        self.check_reachable()?;
        Ok(None)
    }

    async fn historic_window(
        &self,
        _candle_type: CandleType,
        target: &AssetTarget,
        from: i64,
        to: i64,
        _resolution: &str,
    ) -> Result<Vec<RawCandle>> {
        self.check_reachable()?;
        self.queried.lock().push((target.clone(), from, to));
        if *self.fail_at.lock() == Some(from) {
            return Err(anyhow!("HTTP 502 for window starting {from}"));
        }
        let history = self.history.lock();
        Ok(history
            .iter()
            .filter(|c| match target {
                AssetTarget::All => true,
                AssetTarget::Asset(a) => &c.asset == a,
            })
            .filter(|c| {
                let ts = bucket_start(&c.start);
                ts >= from && ts < to
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProviderStream for ScriptedProvider {
    async fn subscribe(
        &self,
        _candle_type: CandleType,
        _resolution: &str,
        _assets: &[String],
    ) -> Result<CandleStream> {
        self.check_reachable()?;
        let rx = self
            .live_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow!("already subscribed"))?;
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item.map_err(|e| anyhow!(e)), rx))
        });
        Ok(stream.boxed())
    }
}
