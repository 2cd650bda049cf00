// =============================================================================
// Reconciliation Engine — backfill / live race, resolved in one task
// =============================================================================
//
// State only moves forward: INIT -> BACKFILL -> DRAIN -> LIVE.
//
// A single task owns the phase, the pending buffer and the checkpoint
// position. The live subscriber and the backfill driver never touch that
// state; they post `IngestEvent`s over channels and this task applies them one
// at a time. DRAIN runs to completion inside the handler for `BackfillDone`,
// so live candles that arrive meanwhile simply wait in the channel and are
// dispatched in LIVE afterwards.
//
// Forwarding rule: a candle goes to the sink when it is forced (backfill), when
// its bucket is at or after the persisted checkpoint, or when the provider
// marked it `updated`. A non-updated candle from before the checkpoint was
// already delivered and is skipped.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::market_data::live::start_live_subscriber;
use crate::market_data::paginator::{
    backfill_bounds, resolve_targets, run_backfill, HistoricalPaginator, WindowBatch,
};
use crate::market_data::RawCandle;
use crate::normalizer::{bucket_start, normalize, KEY_FIELD};
use crate::pending::PendingBuffer;
use crate::ports::{CheckpointPort, ProviderQuery, ProviderStream, SinkPort};
use crate::stats::IngestStats;
use crate::types::{CandleType, CheckpointFailurePolicy, Phase, RunMode};

// ---------------------------------------------------------------------------
// Events and outcomes
// ---------------------------------------------------------------------------

/// Everything the reconciliation task reacts to.
#[derive(Debug)]
pub enum IngestEvent {
    /// One fully fetched historical window.
    Window(WindowBatch),
    BackfillDone,
    BackfillFailed(IngestError),
    /// A candle from the live subscription.
    Live(RawCandle),
    /// The live subscription errored or ended.
    LiveClosed(String),
}

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Historical-only run covered its whole range.
    HistoricalComplete { position: Option<i64> },
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    candle_type: CandleType,
    policy: CheckpointFailurePolicy,
    sink: Arc<dyn SinkPort>,
    checkpoint: Arc<dyn CheckpointPort>,
    /// Owns the phase; every transition goes through it.
    stats: Arc<IngestStats>,
    pending: PendingBuffer,
    /// Last position durably written (or read at startup).
    persisted: Option<i64>,
    /// Highest position handed to the checkpoint store, saved or not. Keeps
    /// the sequence of save attempts non-decreasing.
    position: Option<i64>,
}

impl Reconciler {
    pub fn new(
        candle_type: CandleType,
        policy: CheckpointFailurePolicy,
        sink: Arc<dyn SinkPort>,
        checkpoint: Arc<dyn CheckpointPort>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            candle_type,
            policy,
            sink,
            checkpoint,
            stats,
            pending: PendingBuffer::new(),
            persisted: None,
            position: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.stats.phase()
    }

    /// Observe phase changes, e.g. `rx.wait_for(|p| *p == Phase::Live)`.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.stats.subscribe_phase()
    }

    pub fn persisted_position(&self) -> Option<i64> {
        self.persisted
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Read the checkpoint. Called once, in INIT.
    pub async fn load_checkpoint(&mut self) -> Result<Option<i64>, IngestError> {
        let position = self
            .checkpoint
            .get_last_position()
            .await
            .map_err(IngestError::checkpoint)?;
        self.persisted = position;
        self.position = position;
        self.stats.set_checkpoint(position);
        info!(candle_type = %self.candle_type, checkpoint = ?position, "checkpoint loaded");
        Ok(position)
    }

    pub fn begin_backfill(&mut self) {
        self.transition(Phase::Backfill);
    }

    fn transition(&mut self, to: Phase) {
        let from = self.phase();
        if to <= from {
            return;
        }
        self.stats.set_phase(to);
        info!(from = %from, to = %to, buffered = self.pending.len(), "phase transition");
    }

    /// Apply one event.
    pub async fn handle(&mut self, event: IngestEvent) -> Result<(), IngestError> {
        match event {
            IngestEvent::Window(batch) => self.on_window(batch).await,
            IngestEvent::BackfillDone => {
                self.transition(Phase::Drain);
                self.drain().await?;
                self.transition(Phase::Live);
                Ok(())
            }
            IngestEvent::BackfillFailed(err) => Err(err),
            IngestEvent::Live(candle) => self.on_live(candle).await,
            IngestEvent::LiveClosed(reason) => Err(IngestError::Stream(reason)),
        }
    }

    async fn on_window(&mut self, batch: WindowBatch) -> Result<(), IngestError> {
        let count = batch.candles.len();
        for candle in &batch.candles {
            self.forward(candle, true).await?;
        }
        self.stats.record_window();
        debug!(
            window_start = batch.window.start,
            window_end = batch.window.end,
            count,
            "window forwarded"
        );
        // Window boundary, not candle time: a crash resumes at the next window.
        self.advance_checkpoint(batch.window.end).await
    }

    async fn on_live(&mut self, candle: RawCandle) -> Result<(), IngestError> {
        self.stats.record_live();
        let ts = bucket_start(&candle.start);
        match self.phase() {
            Phase::Init | Phase::Backfill => {
                debug!(asset = %candle.asset, bucket = ts, "buffering live candle during backfill");
                self.pending.add(ts, candle);
                self.stats.set_buffered(self.pending.len());
                Ok(())
            }
            Phase::Drain | Phase::Live => {
                if self.forward(&candle, false).await? {
                    self.advance_checkpoint(ts).await?;
                }
                Ok(())
            }
        }
    }

    async fn drain(&mut self) -> Result<(), IngestError> {
        let total = self.pending.len();
        if let Some(earliest) = self.pending.first_bucket() {
            info!(total, earliest, checkpoint = ?self.persisted, "draining pending buffer");
        }
        let buffered: Vec<(i64, RawCandle)> = self.pending.drain_ordered().collect();
        self.stats.set_buffered(0);

        let mut forwarded = 0usize;
        for (ts, candle) in buffered {
            if self.forward(&candle, false).await? {
                forwarded += 1;
                self.advance_checkpoint(ts).await?;
            }
        }
        info!(total, forwarded, "pending buffer drained");
        Ok(())
    }

    fn should_forward(&self, start: i64, updated: bool, force: bool) -> bool {
        force || updated || self.persisted.map_or(true, |cp| start >= cp)
    }

    /// Upsert one candle. Returns whether it was sent.
    async fn forward(&mut self, candle: &RawCandle, force: bool) -> Result<bool, IngestError> {
        let record = normalize(candle, self.candle_type);
        if !self.should_forward(record.start_time, record.updated, force) {
            debug!(key = %record.key, checkpoint = ?self.persisted, "skipping already delivered candle");
            self.stats.record_skipped();
            return Ok(false);
        }

        self.sink
            .upsert(&record, KEY_FIELD)
            .await
            .map_err(|e| IngestError::Sink {
                key: record.key.clone(),
                message: format!("{e:#}"),
            })?;
        self.stats.record_forwarded();
        debug!(key = %record.key, force, "record forwarded");
        Ok(true)
    }

    async fn advance_checkpoint(&mut self, position: i64) -> Result<(), IngestError> {
        if self.position.is_some_and(|p| position <= p) {
            return Ok(());
        }
        self.position = Some(position);

        match self.checkpoint.save_position(position).await {
            Ok(()) => {
                self.persisted = Some(position);
                self.stats.set_checkpoint(Some(position));
                Ok(())
            }
            Err(e) => match self.policy {
                CheckpointFailurePolicy::Fatal => Err(IngestError::checkpoint(e)),
                CheckpointFailurePolicy::LogAndContinue => {
                    warn!(position, error = %format!("{e:#}"), "checkpoint save failed — continuing");
                    Ok(())
                }
            },
        }
    }

    /// Apply events until the run ends.
    ///
    /// With `live` set the run only ends on error (the live stream is expected
    /// to run forever). Without it the run ends once backfill and drain are
    /// done.
    pub async fn run(
        mut self,
        mut backfill: mpsc::Receiver<IngestEvent>,
        mut live: Option<mpsc::UnboundedReceiver<IngestEvent>>,
    ) -> Result<RunOutcome, IngestError> {
        let mut backfill_open = true;

        loop {
            let event = tokio::select! {
                biased;
                ev = backfill.recv(), if backfill_open => match ev {
                    Some(ev) => ev,
                    None => {
                        backfill_open = false;
                        if self.phase() < Phase::Live {
                            return Err(IngestError::Query {
                                window_start: self.position.unwrap_or(0),
                                window_end: self.position.unwrap_or(0),
                                message: "backfill driver stopped before completing".into(),
                            });
                        }
                        continue;
                    }
                },
                ev = recv_live(&mut live) => match ev {
                    Some(ev) => ev,
                    None => return Err(IngestError::Stream("live channel closed".into())),
                },
            };

            self.handle(event).await?;

            if live.is_none() && self.phase() == Phase::Live {
                return Ok(RunOutcome::HistoricalComplete {
                    position: self.persisted,
                });
            }
        }
    }
}

async fn recv_live(live: &mut Option<mpsc::UnboundedReceiver<IngestEvent>>) -> Option<IngestEvent> {
    match live {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Full run wiring
// ---------------------------------------------------------------------------

/// Settings the exporter run needs, already validated.
#[derive(Debug, Clone)]
pub struct ExporterSettings {
    pub candle_type: CandleType,
    pub resolution: String,
    pub resolution_secs: i64,
    pub window_secs: i64,
    pub safety_margin_secs: i64,
    pub assets: Vec<String>,
    pub query_all_assets: bool,
    pub mode: RunMode,
    pub checkpoint_policy: CheckpointFailurePolicy,
    pub connect_timeout: Duration,
}

/// Ports the run talks to.
#[derive(Clone)]
pub struct ExporterPorts {
    pub query: Arc<dyn ProviderQuery>,
    pub stream: Arc<dyn ProviderStream>,
    pub sink: Arc<dyn SinkPort>,
    pub checkpoint: Arc<dyn CheckpointPort>,
}

/// INIT: read the checkpoint, start the live subscription, plan the backfill.
/// Then BACKFILL -> DRAIN -> LIVE until the run ends.
///
/// `now` is the epoch-seconds instant the backfill range is measured from.
pub async fn run_exporter(
    settings: &ExporterSettings,
    ports: ExporterPorts,
    stats: Arc<IngestStats>,
    now: i64,
) -> Result<RunOutcome, IngestError> {
    let mut reconciler = Reconciler::new(
        settings.candle_type,
        settings.checkpoint_policy,
        ports.sink.clone(),
        ports.checkpoint.clone(),
        stats,
    );

    let provider_assets = tokio::time::timeout(settings.connect_timeout, ports.query.assets())
        .await
        .map_err(|_| IngestError::Connection("provider did not answer within timeout".into()))?
        .map_err(IngestError::connection)?;
    info!(count = provider_assets.len(), "provider reachable");

    let checkpoint = reconciler.load_checkpoint().await?;

    // Live first, so nothing emitted during backfill is lost.
    let live_rx = match settings.mode {
        RunMode::Continuous => {
            let (tx, rx) = mpsc::unbounded_channel();
            start_live_subscriber(
                ports.stream.clone(),
                settings.candle_type,
                &settings.resolution,
                &settings.assets,
                settings.connect_timeout,
                tx,
            )
            .await?;
            Some(rx)
        }
        RunMode::Historical => None,
    };

    let range = ports
        .query
        .historic_range(settings.candle_type)
        .await
        .map_err(IngestError::connection)?;
    let (from, to) = backfill_bounds(
        checkpoint,
        range,
        now,
        settings.safety_margin_secs,
        settings.resolution_secs,
    );
    let targets = resolve_targets(&provider_assets, &settings.assets, settings.query_all_assets);
    if targets.is_empty() {
        warn!("no assets to backfill");
    }
    info!(from, to, targets = targets.len(), window_secs = settings.window_secs, "backfill planned");

    let paginator = HistoricalPaginator::new(
        ports.query.clone(),
        settings.candle_type,
        settings.resolution.clone(),
        targets,
        from,
        to,
        settings.window_secs,
    );

    let (backfill_tx, backfill_rx) = mpsc::channel(1);
    reconciler.begin_backfill();
    tokio::spawn(run_backfill(paginator, backfill_tx));

    reconciler.run(backfill_rx, live_rx).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
