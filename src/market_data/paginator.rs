// =============================================================================
// Historical Paginator — walks [from, to) in fixed-size windows
// =============================================================================
//
// The provider does not stream unbounded ranges reliably, so the range is cut
// into consecutive windows and each window is fetched with one bounded query
// per tracked asset (or one query for all assets). A failed query aborts the
// whole backfill: skipping a window would leave a silent gap behind the
// checkpoint.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::market_data::RawCandle;
use crate::normalizer::bucket_start;
use crate::ports::{HistoricRange, ProviderQuery};
use crate::reconcile::IngestEvent;
use crate::types::{AssetTarget, CandleType};

// ---------------------------------------------------------------------------
// Window planning
// ---------------------------------------------------------------------------

/// Half-open time window `[start, end)` in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

/// Split `[from, to)` into consecutive windows of `window_secs`. The last
/// window is shortened to end exactly at `to`. Empty when `from >= to`.
pub fn plan_windows(from: i64, to: i64, window_secs: i64) -> VecDeque<Window> {
    let mut windows = VecDeque::new();
    if window_secs <= 0 {
        return windows;
    }
    let mut start = from;
    while start < to {
        let end = start.saturating_add(window_secs).min(to);
        windows.push_back(Window { start, end });
        start = end;
    }
    windows
}

/// Truncate `ts` down to a multiple of `resolution_secs`.
pub fn truncate_to(ts: i64, resolution_secs: i64) -> i64 {
    if resolution_secs <= 0 {
        return ts;
    }
    ts.div_euclid(resolution_secs) * resolution_secs
}

/// Compute the backfill range.
///
/// * Starts at the checkpoint; without one, at the first bucket the provider
///   holds (or 0 when it reports no range).
/// * Ends `margin_secs` behind `now`, truncated to the resolution, and never
///   past the last recorded bucket.
pub fn backfill_bounds(
    checkpoint: Option<i64>,
    range: Option<HistoricRange>,
    now: i64,
    margin_secs: i64,
    resolution_secs: i64,
) -> (i64, i64) {
    let from = match (checkpoint, range) {
        (Some(cp), _) => cp,
        (None, Some(r)) => truncate_to(r.first, resolution_secs),
        (None, None) => 0,
    };

    let mut to = truncate_to(now - margin_secs, resolution_secs);
    if let Some(r) = range {
        to = to.min(truncate_to(r.last, resolution_secs) + resolution_secs);
    }

    (from, to.max(from))
}

// ---------------------------------------------------------------------------
// Paginator
// ---------------------------------------------------------------------------

/// All candles returned for one window, ascending by bucket start.
#[derive(Debug, Clone)]
pub struct WindowBatch {
    pub window: Window,
    pub candles: Vec<RawCandle>,
}

/// Lazy, finite walk over the planned windows. Each call to
/// [`HistoricalPaginator::next_window`] issues the queries for exactly one
/// window.
pub struct HistoricalPaginator {
    query: Arc<dyn ProviderQuery>,
    candle_type: CandleType,
    resolution: String,
    targets: Vec<AssetTarget>,
    windows: VecDeque<Window>,
    queries_issued: usize,
}

impl HistoricalPaginator {
    pub fn new(
        query: Arc<dyn ProviderQuery>,
        candle_type: CandleType,
        resolution: impl Into<String>,
        targets: Vec<AssetTarget>,
        from: i64,
        to: i64,
        window_secs: i64,
    ) -> Self {
        Self {
            query,
            candle_type,
            resolution: resolution.into(),
            targets,
            windows: plan_windows(from, to, window_secs),
            queries_issued: 0,
        }
    }

    pub fn remaining_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn queries_issued(&self) -> usize {
        self.queries_issued
    }

    /// Fetch the next window. `Ok(None)` once the range is exhausted.
    pub async fn next_window(&mut self) -> Result<Option<WindowBatch>, IngestError> {
        let Some(window) = self.windows.front().copied() else {
            return Ok(None);
        };

        let mut candles = Vec::new();
        for target in &self.targets {
            self.queries_issued += 1;
            let batch = self
                .query
                .historic_window(
                    self.candle_type,
                    target,
                    window.start,
                    window.end,
                    &self.resolution,
                )
                .await
                .map_err(|e| IngestError::Query {
                    window_start: window.start,
                    window_end: window.end,
                    message: format!("{target}: {e:#}"),
                })?;
            debug!(
                asset_target = %target,
                window_start = window.start,
                window_end = window.end,
                count = batch.len(),
                "historical window fetched"
            );
            candles.extend(batch);
        }

        // Stable: per-asset order is kept inside one bucket.
        candles.sort_by_key(|c| bucket_start(&c.start));

        let stray = candles
            .iter()
            .filter(|c| {
                let ts = bucket_start(&c.start);
                ts < window.start || ts >= window.end
            })
            .count();
        if stray > 0 {
            warn!(
                window_start = window.start,
                window_end = window.end,
                stray,
                "provider returned candles outside the requested window"
            );
        }

        self.windows.pop_front();
        Ok(Some(WindowBatch { window, candles }))
    }
}

/// Decide which queries each window issues: one per tracked asset, or a single
/// all-assets query.
///
/// With a non-empty `filter`, only assets the provider actually lists are
/// tracked; unknown ones are logged and dropped.
pub fn resolve_targets(
    provider_assets: &std::collections::BTreeSet<String>,
    filter: &[String],
    query_all_assets: bool,
) -> Vec<AssetTarget> {
    if query_all_assets && filter.is_empty() {
        return vec![AssetTarget::All];
    }

    if filter.is_empty() {
        return provider_assets
            .iter()
            .cloned()
            .map(AssetTarget::Asset)
            .collect();
    }

    let mut targets = Vec::with_capacity(filter.len());
    for asset in filter {
        let asset = asset.to_uppercase();
        if provider_assets.contains(&asset) {
            if !targets.contains(&AssetTarget::Asset(asset.clone())) {
                targets.push(AssetTarget::Asset(asset));
            }
        } else {
            warn!(asset = %asset, "configured asset not offered by provider — skipping");
        }
    }
    targets
}

/// Drive `paginator` to completion, handing each window to the reconciliation
/// task. Ends with [`IngestEvent::BackfillDone`] or
/// [`IngestEvent::BackfillFailed`].
pub async fn run_backfill(mut paginator: HistoricalPaginator, tx: mpsc::Sender<IngestEvent>) {
    info!(
        windows = paginator.remaining_windows(),
        targets = paginator.targets.len(),
        "backfill started"
    );

    loop {
        match paginator.next_window().await {
            Ok(Some(batch)) => {
                if tx.send(IngestEvent::Window(batch)).await.is_err() {
                    debug!("reconciliation task gone — stopping backfill");
                    return;
                }
            }
            Ok(None) => {
                info!(queries = paginator.queries_issued(), "backfill range exhausted");
                let _ = tx.send(IngestEvent::BackfillDone).await;
                return;
            }
            Err(e) => {
                let _ = tx.send(IngestEvent::BackfillFailed(e)).await;
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::ScriptedProvider;

    #[test]
    fn windows_cover_range_without_gaps() {
        for (from, to, w) in [(0, 600, 300), (0, 601, 300), (17, 1_000, 60), (120, 120, 300), (0, 59, 300)] {
            let windows = plan_windows(from, to, w);
            if from >= to {
                assert!(windows.is_empty());
                continue;
            }
            assert_eq!(windows.front().unwrap().start, from);
            assert_eq!(windows.back().unwrap().end, to);
            for pair in windows.iter().collect::<Vec<_>>().windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            assert!(windows.iter().all(|win| win.end - win.start <= w && win.end > win.start));
        }
    }

    #[test]
    fn ten_minutes_is_two_windows() {
        let windows = plan_windows(0, 600, 300);
        assert_eq!(
            windows.into_iter().collect::<Vec<_>>(),
            vec![Window { start: 0, end: 300 }, Window { start: 300, end: 600 }]
        );
    }

    #[test]
    fn bounds_start_at_checkpoint() {
        let (from, to) = backfill_bounds(Some(1_200), None, 2_000, 120, 60);
        assert_eq!((from, to), (1_200, 1_860));
    }

    #[test]
    fn bounds_without_checkpoint_use_provider_history() {
        let range = HistoricRange { first: 95, last: 10_000 };
        let (from, to) = backfill_bounds(None, Some(range), 1_000, 60, 60);
        assert_eq!((from, to), (60, 900));

        let (from, _) = backfill_bounds(None, None, 1_000, 60, 60);
        assert_eq!(from, 0);
    }

    #[test]
    fn bounds_clamped_to_recorded_history() {
        let range = HistoricRange { first: 0, last: 600 };
        let (_, to) = backfill_bounds(Some(0), Some(range), 10_000, 60, 60);
        assert_eq!(to, 660);
    }

    #[test]
    fn bounds_never_inverted() {
        let (from, to) = backfill_bounds(Some(5_000), None, 5_030, 120, 60);
        assert_eq!(from, to);
    }

    #[test]
    fn targets_respect_filter() {
        let assets = ["BTC", "ETH", "SOL"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            resolve_targets(&assets, &["eth".into(), "DOGE".into()], false),
            vec![AssetTarget::Asset("ETH".into())]
        );
        assert_eq!(resolve_targets(&assets, &[], true), vec![AssetTarget::All]);
        assert_eq!(resolve_targets(&assets, &[], false).len(), 3);
    }

    #[tokio::test]
    async fn two_assets_two_windows_four_queries() {
        let provider = Arc::new(ScriptedProvider::new(&["BTC", "ETH"]));
        provider.add_history("BTC", &[0, 60, 360]);
        provider.add_history("ETH", &[300, 120]);

        let targets = vec![
            AssetTarget::Asset("BTC".into()),
            AssetTarget::Asset("ETH".into()),
        ];
        let mut pag = HistoricalPaginator::new(
            provider.clone(),
            CandleType::Social,
            "M1",
            targets,
            0,
            600,
            300,
        );

        let first = pag.next_window().await.unwrap().unwrap();
        assert_eq!(first.window, Window { start: 0, end: 300 });
        let starts: Vec<i64> = first.candles.iter().map(|c| bucket_start(&c.start)).collect();
        assert_eq!(starts, vec![0, 60, 120]);

        let second = pag.next_window().await.unwrap().unwrap();
        assert_eq!(second.window, Window { start: 300, end: 600 });
        assert_eq!(second.candles.len(), 2);

        assert!(pag.next_window().await.unwrap().is_none());
        assert_eq!(pag.queries_issued(), 4);
        assert_eq!(provider.queried_windows().len(), 4);
    }

    #[tokio::test]
    async fn query_failure_aborts_with_window() {
        let provider = Arc::new(ScriptedProvider::new(&["BTC"]));
        provider.fail_window_at(300);

        let mut pag = HistoricalPaginator::new(
            provider,
            CandleType::News,
            "M1",
            vec![AssetTarget::Asset("BTC".into())],
            0,
            900,
            300,
        );
        assert!(pag.next_window().await.unwrap().is_some());
        let err = pag.next_window().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Query { window_start: 300, window_end: 600, .. }
        ));
        // The failed window is not consumed.
        assert_eq!(pag.remaining_windows(), 2);
    }
}
