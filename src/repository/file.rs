//! JSON-lines backed measurement repository.
//!
//! Each insert appends one serialized measurement per line while the write lock is
//! held, so the file order always matches the in-memory arrival order. Opening an
//! existing file replays its lines.
//!
//! A crash in the middle of an append leaves a torn last line. `open` completes it
//! when it still parses and otherwise cuts the file back to the last full record.
//! Corruption anywhere before the last line is a hard `Storage` error. A failed
//! append is rolled back to the previous length before the error is returned.

use super::{Entries, Key, MeasurementRepository};
use crate::error::{MeterError, MeterResult};
use crate::measurement::Measurement;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

struct State {
    entries: Entries,
    file: File,
}

/// Repository persisted to a JSON-lines file.
pub struct FileRepository {
    path: PathBuf,
    state: RwLock<State>,
}

impl FileRepository {
    /// Open (or create) the cache file at `path` and load any measurements it holds.
    pub async fn open(path: impl AsRef<Path>) -> MeterResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(&path, "create directory for", e))?;
        }

        let mut entries = Entries::default();
        let mut torn_tail = None;
        match tokio::fs::read(&path).await {
            Ok(contents) => {
                let complete = contents
                    .iter()
                    .rposition(|&b| b == b'\n')
                    .map_or(0, |i| i + 1);
                let body = std::str::from_utf8(&contents[..complete]).map_err(|e| {
                    MeterError::Storage(format!("corrupt cache file {}: {}", path.display(), e))
                })?;
                for (line_no, line) in body.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let measurement: Measurement = serde_json::from_str(line).map_err(|e| {
                        MeterError::Storage(format!(
                            "corrupt entry at {}:{}: {}",
                            path.display(),
                            line_no + 1,
                            e
                        ))
                    })?;
                    entries.push(measurement);
                }

                let tail = &contents[complete..];
                if !tail.trim_ascii().is_empty() {
                    match serde_json::from_slice::<Measurement>(tail) {
                        Ok(measurement) => {
                            entries.push(measurement);
                            torn_tail = Some(TornTail::MissingNewline);
                        }
                        Err(e) => {
                            tracing::warn!(
                                path = %path.display(),
                                dropped_bytes = tail.len(),
                                error = %e,
                                "Discarding truncated last entry of cache file"
                            );
                            torn_tail = Some(TornTail::Truncated(complete as u64));
                        }
                    }
                } else if !tail.is_empty() {
                    torn_tail = Some(TornTail::Truncated(complete as u64));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(storage_error(&path, "read", e)),
        }

        if let Some(TornTail::Truncated(len)) = torn_tail {
            truncate_to(&path, len).await?;
        }

        let mut file = open_append(&path).await?;
        if let Some(TornTail::MissingNewline) = torn_tail {
            append_line(&mut file, b"\n")
                .await
                .map_err(|e| storage_error(&path, "repair", e))?;
        }

        tracing::info!(
            path = %path.display(),
            loaded = entries.len(),
            "Opened measurement cache file"
        );

        Ok(Self {
            path,
            state: RwLock::new(State { entries, file }),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn storage_error(path: &Path, action: &str, err: std::io::Error) -> MeterError {
    MeterError::Storage(format!("failed to {} '{}': {}", action, path.display(), err))
}

/// How the last line of a cache file was left by an interrupted append.
enum TornTail {
    /// The record is complete, only its line terminator is missing
    MissingNewline,
    /// The record is unusable; keep only the bytes before it
    Truncated(u64),
}

async fn open_append(path: &Path) -> MeterResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| storage_error(path, "open", e))
}

/// Cut the file at `path` back to `len` bytes.
async fn truncate_to(path: &Path, len: u64) -> MeterResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| storage_error(path, "open for truncation", e))?;
    file.set_len(len)
        .await
        .map_err(|e| storage_error(path, "truncate", e))
}

async fn append_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}

#[async_trait]
impl MeasurementRepository for FileRepository {
    async fn insert(&self, measurement: Measurement) -> MeterResult<()> {
        let mut line = serde_json::to_vec(&measurement)
            .map_err(|e| MeterError::Storage(format!("failed to encode measurement: {e}")))?;
        line.push(b'\n');

        let mut state = self.state.write().await;
        let len_before = state
            .file
            .metadata()
            .await
            .map_err(|e| storage_error(&self.path, "inspect", e))?
            .len();

        if let Err(err) = append_line(&mut state.file, &line).await {
            tracing::error!(
                path = %self.path.display(),
                error = %err,
                "Append failed, rolling back cache file"
            );
            truncate_to(&self.path, len_before).await?;
            state.file = open_append(&self.path).await?;
            return Err(storage_error(&self.path, "append to", err));
        }
        state.entries.push(measurement);
        Ok(())
    }

    async fn get(&self, key: Key) -> MeterResult<Arc<Measurement>> {
        self.state.read().await.entries.get(key)
    }

    async fn get_range(&self, offset: usize, limit: usize) -> MeterResult<Vec<Arc<Measurement>>> {
        Ok(self.state.read().await.entries.range(offset, limit))
    }

    async fn get_all(&self) -> MeterResult<Vec<Arc<Measurement>>> {
        Ok(self.state.read().await.entries.all())
    }

    async fn len(&self) -> MeterResult<usize> {
        Ok(self.state.read().await.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{AcquisitionStatus, Reading};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn measurement(ident: &str, energy: f64) -> Measurement {
        let mut readings = BTreeMap::new();
        readings.insert("1.8.0".to_string(), Reading::new(energy, "kWh"));
        Measurement::new(ident, readings, AcquisitionStatus::Complete)
    }

    #[tokio::test]
    async fn test_reopen_restores_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache").join("measurements.jsonl");

        let first_id = {
            let repo = FileRepository::open(&path).await.unwrap();
            let a = measurement("A", 1.0);
            let id = a.id;
            repo.insert(a).await.unwrap();
            repo.insert(measurement("B", 2.0)).await.unwrap();
            id
        };

        let repo = FileRepository::open(&path).await.unwrap();
        assert_eq!(repo.len().await.unwrap(), 2);
        assert_eq!(repo.get(Key::First).await.unwrap().id, first_id);
        assert_eq!(
            repo.get(Key::Last).await.unwrap().reading("1.8.0"),
            Some(&Reading::new(2.0, "kWh"))
        );

        repo.insert(measurement("C", 3.0)).await.unwrap();
        let reopened = FileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.get(Key::Last).await.unwrap().identification, "C");
    }

    #[tokio::test]
    async fn test_corrupt_line_is_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("measurements.jsonl");
        tokio::fs::write(&path, "{not json}\n").await.unwrap();

        match FileRepository::open(&path).await {
            Err(MeterError::Storage(msg)) => assert!(msg.contains(":1")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("corrupt file should not open"),
        }
    }

    async fn seeded(path: &Path) -> u64 {
        let repo = FileRepository::open(path).await.unwrap();
        repo.insert(measurement("A", 1.0)).await.unwrap();
        repo.insert(measurement("B", 2.0)).await.unwrap();
        tokio::fs::metadata(path).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_truncated_last_entry_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let len = seeded(&path).await;

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 20).unwrap();
        drop(file);

        let repo = FileRepository::open(&path).await.unwrap();
        assert_eq!(repo.len().await.unwrap(), 1);
        assert_eq!(repo.get(Key::Last).await.unwrap().identification, "A");
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents.last(), Some(&b'\n'));

        repo.insert(measurement("C", 3.0)).await.unwrap();
        let reopened = FileRepository::open(&path).await.unwrap();
        let idents: Vec<_> = reopened
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|m| m.identification.clone())
            .collect();
        assert_eq!(idents, ["A", "C"]);
    }

    #[tokio::test]
    async fn test_missing_final_newline_is_completed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let len = seeded(&path).await;

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 1).unwrap();
        drop(file);

        let repo = FileRepository::open(&path).await.unwrap();
        assert_eq!(repo.len().await.unwrap(), 2);
        repo.insert(measurement("C", 3.0)).await.unwrap();

        let reopened = FileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_corruption_before_last_line_still_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        seeded(&path).await;

        let mut contents = tokio::fs::read(&path).await.unwrap();
        contents[3] = b'#';
        tokio::fs::write(&path, contents).await.unwrap();

        assert!(matches!(
            FileRepository::open(&path).await,
            Err(MeterError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_append_leaves_cache_consistent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let len = seeded(&path).await;
        let repo = FileRepository::open(&path).await.unwrap();

        // Swap in a handle that rejects writes
        repo.state.write().await.file = File::open(&path).await.unwrap();

        let err = repo.insert(measurement("X", 9.0)).await.unwrap_err();
        assert!(matches!(err, MeterError::Storage(_)));
        assert_eq!(repo.len().await.unwrap(), 2);
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), len);

        repo.insert(measurement("C", 3.0)).await.unwrap();
        let reopened = FileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 3);
        assert_eq!(reopened.get(Key::Last).await.unwrap().identification, "C");
    }

    #[tokio::test]
    async fn test_truncate_to_discards_partial_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let len = seeded(&path).await;

        let mut file = open_append(&path).await.unwrap();
        append_line(&mut file, b"{\"id\":\"half").await.unwrap();
        drop(file);

        truncate_to(&path, len).await.unwrap();
        let repo = FileRepository::open(&path).await.unwrap();
        assert_eq!(repo.len().await.unwrap(), 2);
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), len);
    }
}
