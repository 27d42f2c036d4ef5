//! In-memory measurement repository.

use super::{Entries, Key, MeasurementRepository};
use crate::error::MeterResult;
use crate::measurement::Measurement;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-lifetime cache of measurements.
///
/// # Example
///
/// ```
/// use meter_cache::repository::{InMemoryRepository, Key, MeasurementRepository};
/// use meter_cache::measurement::{AcquisitionStatus, Measurement};
///
/// # tokio_test::block_on(async {
/// let repo = InMemoryRepository::new();
/// repo.insert(Measurement::new("/ABC5", Default::default(), AcquisitionStatus::Complete))
///     .await
///     .unwrap();
/// assert_eq!(repo.get(Key::Last).await.unwrap().identification, "/ABC5");
/// # })
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    entries: RwLock<Entries>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeasurementRepository for InMemoryRepository {
    async fn insert(&self, measurement: Measurement) -> MeterResult<()> {
        let mut entries = self.entries.write().await;
        tracing::trace!(id = %measurement.id, position = entries.len(), "Appending measurement");
        entries.push(measurement);
        Ok(())
    }

    async fn get(&self, key: Key) -> MeterResult<Arc<Measurement>> {
        self.entries.read().await.get(key)
    }

    async fn get_range(&self, offset: usize, limit: usize) -> MeterResult<Vec<Arc<Measurement>>> {
        Ok(self.entries.read().await.range(offset, limit))
    }

    async fn get_all(&self) -> MeterResult<Vec<Arc<Measurement>>> {
        Ok(self.entries.read().await.all())
    }

    async fn len(&self) -> MeterResult<usize> {
        Ok(self.entries.read().await.len())
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

    #[tokio::test]
    async fn test_insert_preserves_arrival_order() {
        let repo = InMemoryRepository::new();
        for ident in ["A", "B", "C"] {
            repo.insert(measurement(ident)).await.unwrap();
        }

        let all = repo.get_all().await.unwrap();
        let idents: Vec<_> = all.iter().map(|m| m.identification.as_str()).collect();
        assert_eq!(idents, ["A", "B", "C"]);
        assert_eq!(repo.len().await.unwrap(), 3);
        assert!(!repo.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_by_id() {
        let repo = InMemoryRepository::new();
        let b = measurement("B");
        let b_id = b.id;
        repo.insert(measurement("A")).await.unwrap();
        repo.insert(b).await.unwrap();

        assert_eq!(repo.get(Key::Id(b_id)).await.unwrap().identification, "B");
        let missing = repo.get(Key::Id(uuid::Uuid::new_v4())).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_repository() {
        let repo = InMemoryRepository::new();
        assert!(repo.get(Key::First).await.unwrap_err().is_not_found());
        assert!(repo.get(Key::Last).await.unwrap_err().is_not_found());
        assert!(repo.get_range(0, 10).await.unwrap().is_empty());
        assert!(repo.get_all().await.unwrap().is_empty());
        assert!(repo.is_empty().await.unwrap());
    }
}
