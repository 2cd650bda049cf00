// =============================================================================
// Shared types used across the sentiment exporter
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Which sentiment feed this instance exports. Fixed for the lifetime of a
/// running instance; news and social records are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleType {
    News,
    Social,
}

impl CandleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Social => "social",
        }
    }
}

impl FromStr for CandleType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Ok(Self::News),
            "social" => Ok(Self::Social),
            other => Err(IngestError::Config(format!(
                "unrecognised candle type '{other}' (expected 'news' or 'social')"
            ))),
        }
    }
}

impl std::fmt::Display for CandleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciliation phase. Transitions only move forward:
/// `Init -> Backfill -> Drain -> Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Init,
    Backfill,
    Drain,
    Live,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Init
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Backfill => write!(f, "BACKFILL"),
            Self::Drain => write!(f, "DRAIN"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

/// Target of a single windowed historical query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetTarget {
    All,
    Asset(String),
}

impl std::fmt::Display for AssetTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Asset(a) => write!(f, "{a}"),
        }
    }
}

/// What to do when persisting the checkpoint fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFailurePolicy {
    /// Abort the run; the operator restarts from the last persisted position.
    Fatal,
    /// Warn and keep forwarding. A crash afterwards re-delivers candles, which
    /// the sink absorbs by key.
    LogAndContinue,
}

impl Default for CheckpointFailurePolicy {
    fn default() -> Self {
        Self::LogAndContinue
    }
}

impl FromStr for CheckpointFailurePolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(Self::Fatal),
            "log_and_continue" | "log" | "swallow" => Ok(Self::LogAndContinue),
            other => Err(IngestError::Config(format!(
                "unrecognised checkpoint failure policy '{other}'"
            ))),
        }
    }
}

/// Whether the exporter keeps following the live stream after backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Continuous,
    Historical,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Continuous
    }
}

impl FromStr for RunMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous" | "live" => Ok(Self::Continuous),
            "historical" => Ok(Self::Historical),
            other => Err(IngestError::Config(format!("unrecognised run mode '{other}'"))),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuous => write!(f, "continuous"),
            Self::Historical => write!(f, "historical"),
        }
    }
}
