//! Measurement Repository
//!
//! Append-only store of measurements addressed by arrival order. Two
//! implementations share the same contract:
//!
//! - [`InMemoryRepository`] - `Vec` guarded by a read/write lock
//! - [`FileRepository`] - the same, mirrored to a JSON-lines file and reloaded on open
//!
//! # Contract
//! - `insert` always appends and fails only with `MeterError::Storage`
//! - `get(Key::First)` / `get(Key::Last)` fail with `NotFound` only when empty
//! - `get_range` clamps to the stored bounds and never fails on out-of-range input
//! - an insert excludes all readers; readers never block each other
//!
//! Retention is unbounded. Nothing is ever evicted.

use crate::config::StorageConfig;
use crate::error::{MeterError, MeterResult};
use crate::measurement::Measurement;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub mod file;
pub mod memory;

pub use file::FileRepository;
pub use memory::InMemoryRepository;

/// Key used to look up a single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Earliest inserted measurement
    First,
    /// Most recently inserted measurement
    Last,
    /// Measurement with the given id
    Id(Uuid),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::First => f.write_str("first"),
            Key::Last => f.write_str("last"),
            Key::Id(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for Key {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Key::First),
            "last" => Ok(Key::Last),
            other => Uuid::parse_str(other)
                .map(Key::Id)
                .map_err(|_| MeterError::BadParameter(format!("unknown measurement key '{s}'"))),
        }
    }
}

/// Storage contract for acquired measurements.
#[async_trait]
pub trait MeasurementRepository: Send + Sync {
    /// Append a measurement.
    async fn insert(&self, measurement: Measurement) -> MeterResult<()>;

    /// Look up a single measurement by key.
    async fn get(&self, key: Key) -> MeterResult<Arc<Measurement>>;

    /// Return up to `limit` measurements starting at `offset`, clamped to the stored range.
    async fn get_range(&self, offset: usize, limit: usize) -> MeterResult<Vec<Arc<Measurement>>>;

    /// Return every measurement in arrival order.
    async fn get_all(&self) -> MeterResult<Vec<Arc<Measurement>>>;

    /// Number of stored measurements.
    async fn len(&self) -> MeterResult<usize>;

    /// Whether nothing has been stored yet.
    async fn is_empty(&self) -> MeterResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Open the repository selected by the `[storage]` section.
///
/// A configured path selects [`FileRepository`], otherwise the cache lives in memory.
pub async fn open_from_config(config: &StorageConfig) -> MeterResult<Arc<dyn MeasurementRepository>> {
    match &config.path {
        Some(path) => Ok(Arc::new(FileRepository::open(path).await?)),
        None => {
            tracing::info!("Using in-memory measurement cache");
            Ok(Arc::new(InMemoryRepository::new()))
        }
    }
}

/// Ordered entries plus an id index. Callers provide the locking.
#[derive(Debug, Default)]
pub(crate) struct Entries {
    items: Vec<Arc<Measurement>>,
    by_id: HashMap<Uuid, usize>,
}

impl Entries {
    pub(crate) fn push(&mut self, measurement: Measurement) {
        let position = self.items.len();
        self.by_id.entry(measurement.id).or_insert(position);
        self.items.push(Arc::new(measurement));
    }

    pub(crate) fn get(&self, key: Key) -> MeterResult<Arc<Measurement>> {
        let found = match key {
            Key::First => self.items.first(),
            Key::Last => self.items.last(),
            Key::Id(id) => self.by_id.get(&id).and_then(|&i| self.items.get(i)),
        };
        found
            .cloned()
            .ok_or_else(|| MeterError::NotFound(format!("no measurement for key '{key}'")))
    }

    pub(crate) fn range(&self, offset: usize, limit: usize) -> Vec<Arc<Measurement>> {
        let len = self.items.len();
        let start = offset.min(len);
        let end = start.saturating_add(limit).min(len);
        self.items[start..end].to_vec()
    }

    pub(crate) fn all(&self) -> Vec<Arc<Measurement>> {
        self.items.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::AcquisitionStatus;
    use std::collections::BTreeMap;

    fn measurement(ident: &str) -> Measurement {
        Measurement::new(ident, BTreeMap::new(), AcquisitionStatus::Complete)
    }

    #[test]
    fn key_parsing() {
        assert_eq!("first".parse::<Key>().unwrap(), Key::First);
        assert_eq!("LAST".parse::<Key>().unwrap(), Key::Last);

        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<Key>().unwrap(), Key::Id(id));

        let err = "firstish".parse::<Key>().unwrap_err();
        assert!(matches!(err, MeterError::BadParameter(_)));
    }

    #[test]
    fn entries_resolve_sentinels() {
        let mut entries = Entries::default();
        assert!(entries.get(Key::First).unwrap_err().is_not_found());
        assert!(entries.get(Key::Last).unwrap_err().is_not_found());

        entries.push(measurement("A"));
        entries.push(measurement("B"));
        assert_eq!(entries.get(Key::First).unwrap().identification, "A");
        assert_eq!(entries.get(Key::Last).unwrap().identification, "B");
    }

    #[test]
    fn entries_range_clamps() {
        let mut entries = Entries::default();
        for ident in ["A", "B", "C"] {
            entries.push(measurement(ident));
        }
        assert_eq!(entries.range(1, 10).len(), 2);
        assert!(entries.range(3, 1).is_empty());
        assert!(entries.range(usize::MAX, usize::MAX).is_empty());
        assert_eq!(entries.range(2, usize::MAX).len(), 1);
    }

    #[tokio::test]
    async fn open_from_config_selects_backend() {
        let memory = open_from_config(&StorageConfig::default()).await.unwrap();
        assert!(memory.is_empty().await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            path: Some(dir.path().join("cache.jsonl")),
        };
        let file = open_from_config(&config).await.unwrap();
        file.insert(measurement("A")).await.unwrap();
        assert!(dir.path().join("cache.jsonl").exists());
    }
}
