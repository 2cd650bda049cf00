// =============================================================================
// Exporter Configuration — JSON file + environment overrides
// =============================================================================
//
// Every field carries a serde default so an older or partial config file
// still loads.  Environment variables override the file; `validate()` turns
// the loose on-disk shape into the typed `ExporterSettings` the run uses and
// rejects anything that would make the backfill plan meaningless.
//
// The provider API key is never logged.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::IngestError;
use crate::reconcile::ExporterSettings;
use crate::types::{CandleType, CheckpointFailurePolicy, RunMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_candle_type() -> String {
    "social".to_string()
}

fn default_resolution() -> String {
    "M1".to_string()
}

fn default_resolution_secs() -> i64 {
    60
}

fn default_window_secs() -> i64 {
    300
}

fn default_safety_margin_secs() -> i64 {
    120
}

fn default_mode() -> String {
    "continuous".to_string()
}

fn default_provider_url() -> String {
    "https://api.sentiment.local".to_string()
}

fn default_provider_stream_url() -> String {
    "wss://stream.sentiment.local/ws".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_sink_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_checkpoint_path() -> String {
    "exporter_checkpoint.json".to_string()
}

fn default_checkpoint_policy() -> String {
    "log_and_continue".to_string()
}

fn default_status_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

// =============================================================================
// ExporterConfig
// =============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    // --- What to ingest -----------------------------------------------------

    /// `news` or `social`. One type per process.
    #[serde(default = "default_candle_type")]
    pub candle_type: String,

    /// Provider resolution label, e.g. `M1`.
    #[serde(default = "default_resolution")]
    pub resolution: String,

    /// Length of one bucket at `resolution`, in seconds.
    #[serde(default = "default_resolution_secs")]
    pub resolution_secs: i64,

    /// Backfill window length. Must be a multiple of `resolution_secs`.
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,

    /// How far behind "now" the backfill stops. Also bounded by the
    /// provider's last recorded bucket when it reports one.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: i64,

    /// Asset filter. Empty means every asset the provider lists.
    #[serde(default)]
    pub assets: Vec<String>,

    /// Issue one all-assets query per window instead of one per asset.
    #[serde(default)]
    pub query_all_assets: bool,

    /// `continuous` (backfill then follow live) or `historical`.
    #[serde(default = "default_mode")]
    pub mode: String,

    // --- Endpoints ----------------------------------------------------------

    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    #[serde(default = "default_provider_stream_url")]
    pub provider_stream_url: String,

    #[serde(default)]
    pub provider_api_key: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_sink_url")]
    pub sink_url: String,

    // --- Checkpoint ---------------------------------------------------------

    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: String,

    /// `fatal` or `log_and_continue`.
    #[serde(default = "default_checkpoint_policy")]
    pub checkpoint_failure_policy: String,

    // --- Status API ---------------------------------------------------------

    #[serde(default = "default_status_bind_addr")]
    pub status_bind_addr: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            candle_type: default_candle_type(),
            resolution: default_resolution(),
            resolution_secs: default_resolution_secs(),
            window_secs: default_window_secs(),
            safety_margin_secs: default_safety_margin_secs(),
            assets: Vec::new(),
            query_all_assets: false,
            mode: default_mode(),
            provider_url: default_provider_url(),
            provider_stream_url: default_provider_stream_url(),
            provider_api_key: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            sink_url: default_sink_url(),
            checkpoint_path: default_checkpoint_path(),
            checkpoint_failure_policy: default_checkpoint_policy(),
            status_bind_addr: default_status_bind_addr(),
        }
    }
}

impl std::fmt::Debug for ExporterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterConfig")
            .field("candle_type", &self.candle_type)
            .field("resolution", &self.resolution)
            .field("window_secs", &self.window_secs)
            .field("assets", &self.assets)
            .field("mode", &self.mode)
            .field("provider_url", &self.provider_url)
            .field("provider_stream_url", &self.provider_stream_url)
            .field("provider_api_key", &"<redacted>")
            .field("sink_url", &self.sink_url)
            .field("checkpoint_path", &self.checkpoint_path)
            .finish_non_exhaustive()
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file falls back to defaults with a warning. A file that
    /// exists but cannot be read or parsed is a configuration error: running
    /// on defaults would silently ingest the wrong type or endpoints.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "no exporter config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(IngestError::Config(format!(
                    "failed to read exporter config from {}: {e}",
                    path.display()
                )))
            }
        };

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            IngestError::Config(format!(
                "failed to parse exporter config from {}: {e}",
                path.display()
            ))
        })?;

        info!(
            path = %path.display(),
            candle_type = %config.candle_type,
            assets = ?config.assets,
            "exporter config loaded"
        );

        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), IngestError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup` (variable name → value). Unset or empty
    /// variables leave the field untouched.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), IngestError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("EXPORTER_CANDLE_TYPE") {
            self.candle_type = v;
        }
        if let Some(v) = get("EXPORTER_RESOLUTION") {
            self.resolution = v;
        }
        if let Some(v) = get("EXPORTER_WINDOW_SECS") {
            self.window_secs = parse_number("EXPORTER_WINDOW_SECS", &v)?;
        }
        if let Some(v) = get("EXPORTER_SAFETY_MARGIN_SECS") {
            self.safety_margin_secs = parse_number("EXPORTER_SAFETY_MARGIN_SECS", &v)?;
        }
        if let Some(v) = get("EXPORTER_ASSETS") {
            self.assets = v
                .split(',')
                .map(|a| a.trim().to_uppercase())
                .filter(|a| !a.is_empty())
                .collect();
        }
        if let Some(v) = get("EXPORTER_MODE") {
            self.mode = v;
        }
        if let Some(v) = get("SENTIMENT_PROVIDER_URL") {
            self.provider_url = v;
        }
        if let Some(v) = get("SENTIMENT_STREAM_URL") {
            self.provider_stream_url = v;
        }
        if let Some(v) = get("SENTIMENT_API_KEY") {
            self.provider_api_key = v;
        }
        if let Some(v) = get("EXPORTER_SINK_URL") {
            self.sink_url = v;
        }
        if let Some(v) = get("EXPORTER_CHECKPOINT_PATH") {
            self.checkpoint_path = v;
        }
        if let Some(v) = get("EXPORTER_CHECKPOINT_POLICY") {
            self.checkpoint_failure_policy = v;
        }
        if let Some(v) = get("EXPORTER_BIND_ADDR") {
            self.status_bind_addr = v;
        }
        Ok(())
    }

    /// Check the configuration and produce the typed run settings.
    ///
    /// Every failure here is an `IngestError::Config` and happens before any
    /// network or file I/O.
    pub fn validate(&self) -> Result<ExporterSettings, IngestError> {
        let candle_type: CandleType = self.candle_type.parse()?;
        let mode: RunMode = self.mode.parse()?;
        let checkpoint_policy: CheckpointFailurePolicy = self.checkpoint_failure_policy.parse()?;

        if self.resolution.trim().is_empty() {
            return Err(IngestError::Config("resolution must not be empty".into()));
        }
        if self.resolution_secs <= 0 {
            return Err(IngestError::Config(format!(
                "resolution_secs must be positive, got {}",
                self.resolution_secs
            )));
        }
        if self.window_secs <= 0 {
            return Err(IngestError::Config(format!(
                "window_secs must be positive, got {}",
                self.window_secs
            )));
        }
        if self.window_secs % self.resolution_secs != 0 {
            return Err(IngestError::Config(format!(
                "window_secs ({}) must be a multiple of resolution_secs ({})",
                self.window_secs, self.resolution_secs
            )));
        }
        if self.safety_margin_secs < 0 {
            return Err(IngestError::Config(format!(
                "safety_margin_secs must not be negative, got {}",
                self.safety_margin_secs
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(IngestError::Config("connect_timeout_secs must be positive".into()));
        }

        let assets = self
            .assets
            .iter()
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .collect();

        Ok(ExporterSettings {
            candle_type,
            resolution: self.resolution.trim().to_string(),
            resolution_secs: self.resolution_secs,
            window_secs: self.window_secs,
            safety_margin_secs: self.safety_margin_secs,
            assets,
            query_all_assets: self.query_all_assets,
            mode,
            checkpoint_policy,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, IngestError> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::Config(format!("{name} is not a valid number: '{value}'")))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_validates() {
        let settings = ExporterConfig::default().validate().unwrap();
        assert_eq!(settings.candle_type, CandleType::Social);
        assert_eq!(settings.resolution, "M1");
        assert_eq!(settings.window_secs, 300);
        assert_eq!(settings.mode, RunMode::Continuous);
        assert_eq!(settings.checkpoint_policy, CheckpointFailurePolicy::LogAndContinue);
        assert_eq!(settings.connect_timeout, Duration::from_secs(60));
        assert!(settings.assets.is_empty());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "candle_type": "news", "assets": ["btc"] }"#;
        let cfg: ExporterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.candle_type, "news");
        assert_eq!(cfg.window_secs, 300);
        assert_eq!(cfg.sink_url, "http://127.0.0.1:8080");

        let settings = cfg.validate().unwrap();
        assert_eq!(settings.candle_type, CandleType::News);
        assert_eq!(settings.assets, vec!["BTC"]);
    }

    #[test]
    fn unknown_candle_type_is_config_error() {
        let cfg = ExporterConfig {
            candle_type: "weather".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn window_must_be_multiple_of_resolution() {
        let cfg = ExporterConfig {
            window_secs: 90,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("multiple"));

        let zero = ExporterConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = ExporterConfig::default();
        cfg.apply_overrides(env(&[
            ("EXPORTER_CANDLE_TYPE", "news"),
            ("EXPORTER_ASSETS", " btc, eth ,,"),
            ("EXPORTER_WINDOW_SECS", "600"),
            ("EXPORTER_MODE", "historical"),
            ("EXPORTER_CHECKPOINT_POLICY", "fatal"),
            ("EXPORTER_SINK_URL", ""),
        ]))
        .unwrap();

        assert_eq!(cfg.assets, vec!["BTC", "ETH"]);
        assert_eq!(cfg.sink_url, "http://127.0.0.1:8080");

        let settings = cfg.validate().unwrap();
        assert_eq!(settings.candle_type, CandleType::News);
        assert_eq!(settings.window_secs, 600);
        assert_eq!(settings.mode, RunMode::Historical);
        assert_eq!(settings.checkpoint_policy, CheckpointFailurePolicy::Fatal);
    }

    #[test]
    fn bad_numeric_override_is_config_error() {
        let mut cfg = ExporterConfig::default();
        let err = cfg
            .apply_overrides(env(&[("EXPORTER_WINDOW_SECS", "five")]))
            .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn load_reads_file_and_debug_hides_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter_config.json");
        std::fs::write(&path, r#"{ "provider_api_key": "hunter2", "mode": "historical" }"#).unwrap();

        let cfg = ExporterConfig::load(&path).unwrap();
        assert_eq!(cfg.mode, "historical");
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExporterConfig::load(dir.path().join("missing.json")).unwrap();
        assert_eq!(cfg.candle_type, "social");
        assert_eq!(cfg.window_secs, 300);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter_config.json");

        std::fs::write(&path, r#"{ "candle_type": "news", "window_secs": "five" }"#).unwrap();
        assert!(matches!(ExporterConfig::load(&path), Err(IngestError::Config(_))));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ExporterConfig::load(&path), Err(IngestError::Config(_))));
    }
}
