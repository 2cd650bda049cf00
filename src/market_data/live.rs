// =============================================================================
// Live Subscriber — provider stream -> reconciliation task
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::ports::{CandleStream, ProviderStream};
use crate::reconcile::IngestEvent;
use crate::types::CandleType;

/// Open the live subscription and spawn the task that relays every candle to
/// `tx`.
///
/// Returns once the subscription is established, so candles emitted from
/// that point on are queued regardless of the reconciliation phase. The relay
/// never reconnects: when the stream errors or ends it posts a single
/// [`IngestEvent::LiveClosed`] and exits.
pub async fn start_live_subscriber(
    stream: Arc<dyn ProviderStream>,
    candle_type: CandleType,
    resolution: &str,
    assets: &[String],
    connect_timeout: Duration,
    tx: mpsc::UnboundedSender<IngestEvent>,
) -> Result<JoinHandle<()>, IngestError> {
    let candles = tokio::time::timeout(
        connect_timeout,
        stream.subscribe(candle_type, resolution, assets),
    )
    .await
    .map_err(|_| {
        IngestError::Connection(format!(
            "live subscription not established within {}s",
            connect_timeout.as_secs()
        ))
    })?
    .map_err(IngestError::connection)?;

    info!(candle_type = %candle_type, resolution = %resolution, "live subscription established");
    Ok(tokio::spawn(relay(candles, tx)))
}

async fn relay(mut candles: CandleStream, tx: mpsc::UnboundedSender<IngestEvent>) {
    while let Some(item) = candles.next().await {
        match item {
            Ok(candle) => {
                if tx.send(IngestEvent::Live(candle)).is_err() {
                    // Reconciliation task is gone; nothing left to feed.
                    return;
                }
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "live stream error");
                let _ = tx.send(IngestEvent::LiveClosed(format!("{e:#}")));
                return;
            }
        }
    }
    warn!("live stream ended");
    let _ = tx.send(IngestEvent::LiveClosed("stream ended".into()));
}
