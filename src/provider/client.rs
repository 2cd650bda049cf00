// =============================================================================
// Sentiment Provider REST Client — assets, history bounds, windowed candles
// =============================================================================
//
// SECURITY: the API key is sent as a header and never logged or serialised.
// =============================================================================

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, instrument};

use crate::market_data::candle::parse_candle;
use crate::market_data::RawCandle;
use crate::ports::{HistoricRange, ProviderQuery};
use crate::types::{AssetTarget, CandleType};

/// REST client for the sentiment provider's query API.
#[derive(Clone)]
pub struct ProviderClient {
    base_url: String,
    client: reqwest::Client,
}

impl ProviderClient {
    /// Create a new `ProviderClient`.
    ///
    /// # Arguments
    /// * `base_url` — e.g. `https://api.provider.example`, without trailing slash.
    /// * `api_key`  — sent as `X-API-KEY` on every request; may be empty.
    /// * `timeout`  — per-request timeout.
    pub fn new(base_url: impl Into<String>, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if !api_key.is_empty() {
            let val = HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
            default_headers.insert("X-API-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "ProviderClient initialised");

        Ok(Self { base_url, client })
    }

    /// GET `path` with `query` and return the JSON body. `Ok(None)` on 404;
    /// callers decide whether that means "absent" or is an error.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<serde_json::Value>> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("provider GET {} returned {}: {}", path, status, body);
        }

        Ok(Some(body))
    }
}

#[async_trait]
impl ProviderQuery for ProviderClient {
    /// GET /v1/assets — `["BTC", ...]` or `{ "assets": [...] }`.
    #[instrument(skip(self), name = "provider::assets")]
    async fn assets(&self) -> Result<BTreeSet<String>> {
        let body = self
            .get_json("/v1/assets", &[])
            .await?
            .context("provider has no asset list")?;
        parse_assets(&body)
    }

    /// GET /v1/{type}/range — `{ "first": .., "last": .. }`; 404 or `null`
    /// when the provider holds no history.
    #[instrument(skip(self), name = "provider::historic_range")]
    async fn historic_range(&self, candle_type: CandleType) -> Result<Option<HistoricRange>> {
        let path = format!("/v1/{candle_type}/range");
        match self.get_json(&path, &[]).await? {
            Some(body) => parse_range(&body),
            None => Ok(None),
        }
    }

    /// GET /v1/{type}/candles?from=&to=&resolution=[&asset=]
    #[instrument(skip(self), name = "provider::historic_window")]
    async fn historic_window(
        &self,
        candle_type: CandleType,
        asset_target: &AssetTarget,
        from: i64,
        to: i64,
        resolution: &str,
    ) -> Result<Vec<RawCandle>> {
        let path = format!("/v1/{candle_type}/candles");
        let mut query = vec![
            ("from", from.to_string()),
            ("to", to.to_string()),
            ("resolution", resolution.to_string()),
        ];
        if let AssetTarget::Asset(asset) = asset_target {
            query.push(("asset", asset.clone()));
        }

        // Unlike the range endpoint, a 404 here is not "no data": treating it
        // as an empty window would move the checkpoint over a gap.
        let body = self
            .get_json(&path, &query)
            .await?
            .with_context(|| format!("provider GET {path} returned 404"))?;
        let candles = parse_candle_list(&body)?;
        debug!(asset_target = %asset_target, from, to, count = candles.len(), "candles fetched");
        Ok(candles)
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Response parsing
// -----------------------------------------------------------------------------

fn parse_assets(body: &serde_json::Value) -> Result<BTreeSet<String>> {
    let list = body
        .as_array()
        .or_else(|| body["assets"].as_array())
        .context("assets response is not a list")?;

    list.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_uppercase)
                .with_context(|| format!("asset entry is not a string: {v}"))
        })
        .collect()
}

fn parse_range(body: &serde_json::Value) -> Result<Option<HistoricRange>> {
    if body.is_null() {
        return Ok(None);
    }
    let first = body["first"].as_i64().context("range missing field first")?;
    let last = body["last"].as_i64().context("range missing field last")?;
    Ok(Some(HistoricRange { first, last }))
}

/// A malformed entry fails the whole window; skipping it would leave a gap
/// behind the checkpoint.
fn parse_candle_list(body: &serde_json::Value) -> Result<Vec<RawCandle>> {
    let raw = match body {
        serde_json::Value::Null => return Ok(Vec::new()),
        serde_json::Value::Array(items) => items,
        other => other["candles"]
            .as_array()
            .context("candles response is not a list")?,
    };

    raw.iter()
        .enumerate()
        .map(|(i, entry)| parse_candle(entry).with_context(|| format!("candle #{i} is malformed")))
        .collect()
}
