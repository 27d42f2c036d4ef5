//! Pager Actor
//!
//! Stateless query façade over a [`MeasurementRepository`]. All state lives in the
//! repository, so an actor is cheap to build per request and needs no locking of
//! its own.

use crate::error::{MeterError, MeterResult};
use crate::measurement::Measurement;
use crate::repository::{Key, MeasurementRepository};
use std::fmt::Write as _;
use std::sync::Arc;

/// Validated `(page, size)` pair.
///
/// `size == 0` means "everything, unpaginated"; a non-zero page requires a
/// non-zero size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    page: usize,
    size: usize,
}

impl PageRequest {
    /// Validate a page request.
    pub fn new(page: usize, size: usize) -> MeterResult<Self> {
        if page > 0 && size == 0 {
            return Err(MeterError::BadParameter(
                "non zero page parameter requires non zero size".to_string(),
            ));
        }
        Ok(Self { page, size })
    }

    /// Parse raw `page` / `size` query values. Absent or empty values default to 0.
    ///
    /// Every problem found is reported in one `BadParameter` message.
    pub fn from_params(page: Option<&str>, size: Option<&str>) -> MeterResult<Self> {
        let mut problems = String::new();
        let page = parse_param("page", page, &mut problems);
        let size = parse_param("size", size, &mut problems);

        if problems.is_empty() {
            return Self::new(page, size);
        }
        if page > 0 && size == 0 {
            problems.push_str("\tnon zero page parameter requires non zero size\n");
        }
        Err(MeterError::BadParameter(format!(
            "bad pagination parameters\n{problems}"
        )))
    }

    /// Page index.
    pub fn page(&self) -> usize {
        self.page
    }

    /// Page size, 0 for unpaginated.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this request selects a page rather than everything.
    pub fn paginate(&self) -> bool {
        self.size > 0
    }

    /// First index of the page, `None` when it lies beyond any addressable position.
    pub fn offset(&self) -> Option<usize> {
        self.page.checked_mul(self.size)
    }
}

fn parse_param(name: &str, raw: Option<&str>, problems: &mut String) -> usize {
    let raw = match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw,
        None => return 0,
    };
    match raw.parse::<i64>() {
        Ok(v) if v < 0 => {
            let _ = writeln!(problems, "\t{name} parameter cannot be negative");
            0
        }
        Ok(v) => usize::try_from(v).unwrap_or(usize::MAX),
        Err(e) => {
            let _ = writeln!(problems, "\t{name} parameter error: {e}");
            0
        }
    }
}

/// Positional and page-based queries over a repository.
#[derive(Clone)]
pub struct PagerActor {
    repo: Arc<dyn MeasurementRepository>,
}

impl PagerActor {
    /// Build an actor over a shared repository.
    pub fn new(repo: Arc<dyn MeasurementRepository>) -> Self {
        Self { repo }
    }

    /// Look up one measurement. `Ok(None)` means there is no data for `key`.
    pub async fn get(&self, key: Key) -> MeterResult<Option<Arc<Measurement>>> {
        match self.repo.get(key).await {
            Ok(measurement) => Ok(Some(measurement)),
            Err(MeterError::NotFound(reason)) => {
                tracing::debug!(%key, %reason, "No data for key");
                Ok(None)
            }
            Err(err) => {
                tracing::error!(%key, error = %err, "Failed to read measurement");
                Err(err)
            }
        }
    }

    /// Return page `page` of `size` measurements.
    ///
    /// Fails with `BadParameter` for a non-zero page with zero size, before the
    /// repository is consulted. A zero size returns everything.
    pub async fn get_page(&self, page: usize, size: usize) -> MeterResult<Vec<Arc<Measurement>>> {
        let request = PageRequest::new(page, size)?;
        self.fetch_page(&request).await
    }

    /// Serve an already validated page request.
    pub async fn fetch_page(&self, request: &PageRequest) -> MeterResult<Vec<Arc<Measurement>>> {
        if !request.paginate() {
            return self.get_all().await;
        }
        match request.offset() {
            Some(offset) => self.repo.get_range(offset, request.size()).await,
            None => Ok(Vec::new()),
        }
    }

    /// Every measurement in arrival order.
    pub async fn get_all(&self) -> MeterResult<Vec<Arc<Measurement>>> {
        self.repo.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::AcquisitionStatus;
    use crate::repository::InMemoryRepository;
    use std::collections::BTreeMap;

    async fn pager_with(idents: &[&str]) -> PagerActor {
        let repo = Arc::new(InMemoryRepository::new());
        for ident in idents {
            repo.insert(Measurement::new(*ident, BTreeMap::new(), AcquisitionStatus::Complete))
                .await
                .unwrap();
        }
        PagerActor::new(repo)
    }

    fn idents(page: &[Arc<Measurement>]) -> Vec<&str> {
        page.iter().map(|m| m.identification.as_str()).collect()
    }

    #[test]
    fn test_page_request_invariant() {
        assert!(PageRequest::new(0, 0).is_ok());
        assert!(PageRequest::new(0, 5).is_ok());
        assert!(PageRequest::new(3, 5).is_ok());
        assert!(matches!(
            PageRequest::new(1, 0),
            Err(MeterError::BadParameter(_))
        ));
    }

    #[test]
    fn test_params_defaults_and_errors() {
        assert_eq!(PageRequest::from_params(None, None).unwrap(), PageRequest::default());
        assert_eq!(
            PageRequest::from_params(Some(""), Some("")).unwrap(),
            PageRequest::default()
        );

        let req = PageRequest::from_params(Some("2"), Some("10")).unwrap();
        assert_eq!((req.page(), req.size()), (2, 10));
        assert!(req.paginate());

        match PageRequest::from_params(Some("-1"), Some("abc")) {
            Err(MeterError::BadParameter(msg)) => {
                assert!(msg.contains("page parameter cannot be negative"));
                assert!(msg.contains("size parameter error"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(matches!(
            PageRequest::from_params(Some("1"), None),
            Err(MeterError::BadParameter(_))
        ));
    }

    #[test]
    fn test_offset_overflow() {
        let req = PageRequest::new(usize::MAX, 2).unwrap();
        assert_eq!(req.offset(), None);
    }

    #[tokio::test]
    async fn test_three_element_scenario() {
        let pager = pager_with(&["A", "B", "C"]).await;

        assert_eq!(pager.get(Key::First).await.unwrap().unwrap().identification, "A");
        assert_eq!(pager.get(Key::Last).await.unwrap().unwrap().identification, "C");
        assert_eq!(idents(&pager.get_page(0, 2).await.unwrap()), ["A", "B"]);
        assert_eq!(idents(&pager.get_page(1, 2).await.unwrap()), ["C"]);
        assert!(pager.get_page(2, 2).await.unwrap().is_empty());
        assert_eq!(idents(&pager.get_page(0, 0).await.unwrap()), ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_empty_repository_is_no_data() {
        let pager = pager_with(&[]).await;

        assert!(pager.get(Key::First).await.unwrap().is_none());
        assert!(pager.get(Key::Last).await.unwrap().is_none());
        assert!(pager.get_page(0, 10).await.unwrap().is_empty());
        assert!(pager.get_page(4, 10).await.unwrap().is_empty());
        assert!(pager.get_all().await.unwrap().is_empty());
        assert!(matches!(
            pager.get_page(1, 0).await,
            Err(MeterError::BadParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_huge_page_is_empty() {
        let pager = pager_with(&["A"]).await;
        assert!(pager.get_page(usize::MAX, usize::MAX).await.unwrap().is_empty());
    }
}
