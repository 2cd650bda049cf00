//! Failure taxonomy for the ingestion core.
//!
//! Adapters work with `anyhow::Result`; the core wraps their failures into
//! one of these variants so the supervisor in `main` can decide how to exit.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// Unrecognised candle type or otherwise invalid settings. Raised before
    /// any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// A windowed historical query failed. The checkpoint only reflects fully
    /// completed windows, so a restart resumes without gaps.
    #[error("historical query failed for window [{window_start}, {window_end}): {message}")]
    Query {
        window_start: i64,
        window_end: i64,
        message: String,
    },

    /// The live subscription errored or ended.
    #[error("live stream terminated: {0}")]
    Stream(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("sink rejected record {key}: {message}")]
    Sink { key: String, message: String },
}

impl IngestError {
    /// Process exit code for this failure. Every classified failure is fatal.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Wrap an adapter error, keeping the full context chain in the message.
    pub fn connection(err: anyhow::Error) -> Self {
        Self::Connection(format!("{err:#}"))
    }

    pub fn checkpoint(err: anyhow::Error) -> Self {
        Self::Checkpoint(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn connection_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("refused"));
        let err = IngestError::connection(inner.context("dialing provider").unwrap_err());
        assert_eq!(
            err,
            IngestError::Connection("dialing provider: refused".to_string())
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn query_error_names_window() {
        let err = IngestError::Query {
            window_start: 0,
            window_end: 300,
            message: "502".into(),
        };
        assert!(err.to_string().contains("[0, 300)"));
    }
}
