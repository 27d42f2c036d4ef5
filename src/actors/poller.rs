//! Polling task feeding the repository from the meter.
//!
//! The poller owns the polling cadence: one [`Meter::get`] per cycle, then a quiet
//! period of `interval` before the next exchange starts. Failed polls are logged and
//! the loop simply waits for the next cycle.

use crate::adapters::{Meter, PollContext};
use crate::config::MeterConfig;
use crate::error::{MeterError, MeterResult};
use crate::measurement::Measurement;
use crate::repository::MeasurementRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Counters reported when the polling loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Polls whose measurement was stored
    pub stored: u64,
    /// Polls that failed at the meter
    pub failed: u64,
    /// Measurements acquired but not stored
    pub storage_failures: u64,
}

/// Periodic meter poller.
pub struct Poller {
    meter: Arc<Meter>,
    repo: Arc<dyn MeasurementRepository>,
    interval: Duration,
    context: PollContext,
}

impl Poller {
    /// Build a poller.
    ///
    /// Fails with `Configuration` when `interval` is shorter than `min_spacing`, the
    /// meter's minimum quiet time between polls.
    pub fn new(
        meter: Arc<Meter>,
        repo: Arc<dyn MeasurementRepository>,
        interval: Duration,
        min_spacing: Duration,
    ) -> MeterResult<Self> {
        if interval < min_spacing {
            return Err(MeterError::Configuration(format!(
                "poll interval {interval:?} is shorter than the minimum spacing {min_spacing:?}"
            )));
        }
        Ok(Self {
            meter,
            repo,
            interval,
            context: PollContext::default(),
        })
    }

    /// Build a poller from the `[meter]` configuration section.
    pub fn from_config(
        meter: Arc<Meter>,
        repo: Arc<dyn MeasurementRepository>,
        config: &MeterConfig,
    ) -> MeterResult<Self> {
        let poller = Self::new(meter, repo, config.poll_interval, config.min_poll_spacing)?;
        Ok(match config.poll_timeout {
            Some(timeout) => poller.with_poll_timeout(timeout),
            None => poller,
        })
    }

    /// Bound each poll by `timeout`.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.context = PollContext::with_timeout(timeout);
        self
    }

    /// Quiet period between polls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll the meter once and store the result.
    pub async fn poll_once(&self) -> MeterResult<Measurement> {
        let measurement = self.meter.get(&self.context).await?;
        self.repo.insert(measurement.clone()).await?;
        tracing::info!(
            id = %measurement.id,
            registers = measurement.readings.len(),
            "Stored measurement"
        );
        Ok(measurement)
    }

    /// Poll until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> PollStats {
        let mut stats = PollStats::default();
        tracing::info!(interval = ?self.interval, "Poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(_) => stats.stored += 1,
                Err(MeterError::Storage(reason)) => {
                    stats.storage_failures += 1;
                    tracing::error!(%reason, "Failed to store measurement");
                }
                Err(err) => {
                    stats.failed += 1;
                    tracing::warn!(error = %err, transient = err.is_transient(), "Poll failed");
                }
            }

            let sender_gone = tokio::select! {
                _ = tokio::time::sleep(self.interval) => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if sender_gone {
                break;
            }
        }

        tracing::info!(?stats, "Poller stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockSession, MockStep};
    use crate::repository::InMemoryRepository;

    fn poller(session: MockSession, repo: Arc<InMemoryRepository>) -> Poller {
        Poller::new(
            Arc::new(Meter::new(session)),
            repo,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_interval_must_respect_spacing() {
        let result = Poller::new(
            Arc::new(Meter::new(MockSession::new())),
            Arc::new(InMemoryRepository::new()),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(MeterError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_cadence_until_shutdown() {
        let repo = Arc::new(InMemoryRepository::new());
        let poller = poller(MockSession::new(), repo.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { poller.run(rx).await });

        // Polls at t=0s, 5s and 10s
        tokio::time::sleep(Duration::from_secs(11)).await;
        tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.stored, 3);
        assert_eq!(repo.len().await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_does_not_stop_loop() {
        let repo = Arc::new(InMemoryRepository::new());
        let session = MockSession::scripted(vec![MockStep::TransportFailure("no echo".into())]);
        let poller = poller(session, repo.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { poller.run(rx).await });
        tokio::time::sleep(Duration::from_secs(6)).await;
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.stored, 1);
        assert_eq!(repo.len().await.unwrap(), 1);
    }
}
