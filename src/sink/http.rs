// =============================================================================
// HTTP Sink — idempotent upsert of normalized records
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::normalizer::NormalizedRecord;
use crate::ports::SinkPort;

/// Upserts each record with `PUT {base_url}/records/{key}?key_field=..`.
/// The sink keeps the latest body per key.
#[derive(Debug, Clone)]
pub struct HttpSink {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .with_context(|| format!("invalid sink URL {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("sink URL {base_url} cannot carry a path");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { base_url, client })
    }

    /// `{base}/records/{key}` with the key percent-encoded as one segment.
    fn record_url(&self, key: &str) -> Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("sink URL cannot carry a path"))?
            .pop_if_empty()
            .push("records")
            .push(key);
        Ok(url)
    }
}

#[async_trait]
impl SinkPort for HttpSink {
    #[instrument(skip(self, record), fields(key = %record.key), name = "sink::upsert")]
    async fn upsert(&self, record: &NormalizedRecord, key_field: &str) -> Result<()> {
        let url = self.record_url(&record.key)?;

        let resp = self
            .client
            .put(url)
            .query(&[("key_field", key_field)])
            .json(record)
            .send()
            .await
            .context("PUT /records request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("sink PUT /records returned {}: {}", status, body);
        }

        debug!(key = %record.key, "record upserted");
        Ok(())
    }
}
