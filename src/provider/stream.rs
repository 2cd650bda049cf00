// =============================================================================
// Sentiment Provider WebSocket stream — live candles
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::market_data::candle::parse_candle_message;
use crate::ports::{CandleStream, ProviderStream};
use crate::types::CandleType;

/// WebSocket client for the provider's candle subscription endpoint.
#[derive(Clone)]
pub struct ProviderStreamClient {
    url: String,
    api_key: String,
}

impl ProviderStreamClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

/// Subscribe frame sent right after the handshake.
///
/// ```json
/// { "op": "subscribe", "type": "social", "resolution": "M1", "assets": ["BTC"] }
/// ```
pub fn subscribe_frame(candle_type: CandleType, resolution: &str, assets: &[String]) -> String {
    serde_json::json!({
        "op": "subscribe",
        "type": candle_type,
        "resolution": resolution,
        "assets": assets,
    })
    .to_string()
}

#[async_trait]
impl ProviderStream for ProviderStreamClient {
    /// Connect, send the subscribe frame, and expose the socket as a candle
    /// stream.
    ///
    /// Frames that fail to decode are logged and dropped. Ping / Pong /
    /// Binary frames are ignored; tungstenite answers pings on the next read.
    /// A Close frame or read error ends the stream with an error.
    async fn subscribe(
        &self,
        candle_type: CandleType,
        resolution: &str,
        assets: &[String],
    ) -> Result<CandleStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .context("invalid provider stream URL")?;
        if !self.api_key.is_empty() {
            let val = HeaderValue::from_str(&self.api_key)
                .context("API key is not a valid header value")?;
            request.headers_mut().insert("X-API-KEY", val);
        }

        info!(url = %self.url, candle_type = %candle_type, "connecting to candle WebSocket");
        let (mut ws_stream, _response) = connect_async(request)
            .await
            .context("failed to connect to candle WebSocket")?;

        ws_stream
            .send(Message::Text(subscribe_frame(candle_type, resolution, assets)))
            .await
            .context("failed to send subscribe frame")?;
        info!(candle_type = %candle_type, resolution = %resolution, "candle WebSocket subscribed");

        let candles = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => match parse_candle_message(&text) {
                    Ok(candle) => {
                        debug!(asset = %candle.asset, updated = candle.updated, "live candle");
                        Some(Ok(candle))
                    }
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "failed to parse candle message");
                        None
                    }
                },
                Ok(Message::Close(frame)) => Some(Err(anyhow::anyhow!(
                    "candle WebSocket closed by provider: {frame:?}"
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::new(e).context("candle WebSocket read error"))),
            }
        });

        Ok(candles.boxed())
    }
}

impl std::fmt::Debug for ProviderStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStreamClient")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
