// =============================================================================
// Ingest statistics — shared, read-mostly view of the exporter
// =============================================================================
//
// Written only by the reconciliation task; read by the status API.
//   - Atomic counters for lock-free reads.
//   - A watch channel carrying the phase, so observers can await LIVE
//     without polling.
//   - parking_lot::RwLock for the last persisted checkpoint.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::types::{CandleType, Phase};

/// Serialisable point-in-time view for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub candle_type: CandleType,
    pub phase: Phase,
    pub checkpoint: Option<i64>,
    pub forwarded: u64,
    pub skipped: u64,
    pub buffered: u64,
    pub live_received: u64,
    pub windows_completed: u64,
    pub uptime_secs: u64,
}

pub struct IngestStats {
    run_id: Uuid,
    candle_type: CandleType,
    phase: watch::Sender<Phase>,
    checkpoint: RwLock<Option<i64>>,
    forwarded: AtomicU64,
    skipped: AtomicU64,
    buffered: AtomicU64,
    live_received: AtomicU64,
    windows_completed: AtomicU64,
    start_time: std::time::Instant,
}

impl IngestStats {
    pub fn new(candle_type: CandleType) -> Self {
        let (phase, _) = watch::channel(Phase::Init);
        Self {
            run_id: Uuid::new_v4(),
            candle_type,
            phase,
            checkpoint: RwLock::new(None),
            forwarded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            buffered: AtomicU64::new(0),
            live_received: AtomicU64::new(0),
            windows_completed: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    // ── Phase ───────────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    // ── Counters ────────────────────────────────────────────────────────

    pub fn set_checkpoint(&self, position: Option<i64>) {
        *self.checkpoint.write() = position;
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_live(&self) {
        self.live_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window(&self) {
        self.windows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_buffered(&self, count: usize) {
        self.buffered.store(count as u64, Ordering::Relaxed);
    }

    // ── Snapshot ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.run_id.to_string(),
            candle_type: self.candle_type,
            phase: self.phase(),
            checkpoint: *self.checkpoint.read(),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            live_received: self.live_received.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}
