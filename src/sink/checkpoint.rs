// =============================================================================
// File checkpoint store — one file per candle type, atomic writes
// =============================================================================
//
// The configured path is a base name; each candle type writes its own file
// next to it:
//   exporter_checkpoint.json  ->  exporter_checkpoint.news.json
//                                 exporter_checkpoint.social.json
// with contents
//   { "candle_type": "news", "position": 1700000000 }
//
// News and social instances therefore never read-modify-write a shared file.
// Every write goes to a uniquely named `.tmp` sibling first and is renamed
// over the real file, so a crash mid-write never leaves a truncated
// checkpoint behind.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ports::CheckpointPort;
use crate::types::CandleType;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    candle_type: CandleType,
    position: i64,
}

pub struct FileCheckpointStore {
    path: PathBuf,
    candle_type: CandleType,
    lock: Mutex<()>,
}

/// `dir/name.json` -> `dir/name.{type}.json`.
pub fn checkpoint_file_for(base: &Path, candle_type: CandleType) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    let ext = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".to_string());
    base.with_file_name(format!("{stem}.{candle_type}.{ext}"))
}

impl FileCheckpointStore {
    pub fn new(base_path: impl AsRef<Path>, candle_type: CandleType) -> Self {
        Self {
            path: checkpoint_file_for(base_path.as_ref(), candle_type),
            candle_type,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointPort for FileCheckpointStore {
    async fn get_last_position(&self) -> Result<Option<i64>> {
        let _guard = self.lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no checkpoint file — starting from history");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read checkpoint file {}", self.path.display())
                })
            }
        };

        let file: CheckpointFile = serde_json::from_str(&content).with_context(|| {
            format!("failed to parse checkpoint file {}", self.path.display())
        })?;
        if file.candle_type != self.candle_type {
            anyhow::bail!(
                "checkpoint file {} belongs to candle type {}, expected {}",
                self.path.display(),
                file.candle_type,
                self.candle_type
            );
        }

        info!(path = %self.path.display(), candle_type = %self.candle_type, position = file.position, "checkpoint read");
        Ok(Some(file.position))
    }

    async fn save_position(&self, position: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let file = CheckpointFile {
            candle_type: self.candle_type,
            position,
        };
        let content =
            serde_json::to_string_pretty(&file).context("failed to serialise checkpoint")?;

        let tmp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, &content)
            .await
            .with_context(|| format!("failed to write tmp checkpoint to {}", tmp_path.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e).with_context(|| {
                format!("failed to rename tmp checkpoint to {}", self.path.display())
            });
        }

        debug!(candle_type = %self.candle_type, position, "checkpoint saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn each_type_gets_its_own_file() {
        let base = Path::new("/var/lib/exporter/exporter_checkpoint.json");
        assert_eq!(
            checkpoint_file_for(base, CandleType::News),
            Path::new("/var/lib/exporter/exporter_checkpoint.news.json")
        );
        assert_eq!(
            checkpoint_file_for(Path::new("cp"), CandleType::Social),
            Path::new("cp.social.json")
        );
    }

    #[tokio::test]
    async fn missing_file_means_no_position() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("cp.json"), CandleType::News);
        assert_eq!(store.get_last_position().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cp.json");
        let store = FileCheckpointStore::new(&base, CandleType::Social);
        store.save_position(600).await.unwrap();
        store.save_position(660).await.unwrap();

        let reopened = FileCheckpointStore::new(&base, CandleType::Social);
        assert_eq!(reopened.get_last_position().await.unwrap(), Some(660));

        // Only the checkpoint itself is left behind; no tmp files.
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cp.social.json"]);
    }

    #[tokio::test]
    async fn concurrent_writers_of_both_types_keep_their_positions() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cp.json");

        for round in 1..=50i64 {
            // Separate store instances, as two exporter processes would have.
            let news = Arc::new(FileCheckpointStore::new(&base, CandleType::News));
            let social = Arc::new(FileCheckpointStore::new(&base, CandleType::Social));

            let (a, b) = tokio::join!(
                tokio::spawn({
                    let news = news.clone();
                    async move { news.save_position(round * 60).await }
                }),
                tokio::spawn({
                    let social = social.clone();
                    async move { social.save_position(round * 120).await }
                }),
            );
            a.unwrap().unwrap();
            b.unwrap().unwrap();

            assert_eq!(news.get_last_position().await.unwrap(), Some(round * 60));
            assert_eq!(social.get_last_position().await.unwrap(), Some(round * 120));
        }
    }

    #[tokio::test]
    async fn concurrent_saves_of_one_type_never_fail() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cp.json");
        let first = Arc::new(FileCheckpointStore::new(&base, CandleType::News));
        let second = Arc::new(FileCheckpointStore::new(&base, CandleType::News));

        let mut handles = Vec::new();
        for i in 0..20i64 {
            let store = if i % 2 == 0 { first.clone() } else { second.clone() };
            handles.push(tokio::spawn(async move { store.save_position(i).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let last = first.get_last_position().await.unwrap().unwrap();
        assert!((0..20).contains(&last));
    }

    #[tokio::test]
    async fn corrupt_or_foreign_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cp.json");
        let store = FileCheckpointStore::new(&base, CandleType::News);

        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.get_last_position().await.is_err());

        std::fs::write(store.path(), r#"{ "candle_type": "social", "position": 60 }"#).unwrap();
        assert!(store.get_last_position().await.is_err());
    }
}
