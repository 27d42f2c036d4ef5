//! Mock transport session for testing
//!
//! This session implements the TransportSession trait without requiring a physical
//! meter. It provides:
//! - Scripted exchange outcomes (readouts, link failures, hangs)
//! - A synthetic meter once the script is exhausted, with steadily rising registers
//! - Controllable open failure injection
//! - Call logging for test verification

use super::{Readout, TransportSession};
use crate::error::{MeterError, MeterResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Identification line reported by the synthetic meter.
pub const MOCK_IDENTIFICATION: &str = "/MCK5MOCKMETER-01";

/// Outcome of one scripted exchange.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Return this readout
    Readout(Readout),
    /// Fail as if the device vanished
    TransportFailure(String),
    /// Never answer
    Hang,
}

/// Shared view of the calls a [`MockSession`] received.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Snapshot of the recorded calls, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Forget the recorded calls.
    pub fn clear(&self) {
        if let Ok(mut calls) = self.0.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: &str) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(call.to_string());
        }
    }
}

/// Mock meter session.
///
/// # Example
///
/// ```
/// use meter_cache::adapters::{MockSession, TransportSession};
///
/// # tokio_test::block_on(async {
/// let mut session = MockSession::new();
/// session.open().await.unwrap();
/// let readout = session.exchange().await.unwrap();
/// assert!(readout.data.ends_with("!\r\n"));
/// # })
/// ```
pub struct MockSession {
    open: bool,
    latency: Duration,
    fail_next_open: AtomicBool,
    script: VecDeque<MockStep>,
    energy_wh: AtomicU64,
    call_log: CallLog,
}

impl MockSession {
    /// Synthetic meter with no script.
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    /// Session that plays `steps` in order before falling back to the synthetic meter.
    pub fn scripted(steps: Vec<MockStep>) -> Self {
        Self {
            open: false,
            latency: Duration::ZERO,
            fail_next_open: AtomicBool::new(false),
            script: steps.into(),
            energy_wh: AtomicU64::new(1_234_567),
            call_log: CallLog::default(),
        }
    }

    /// Set simulated exchange latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Trigger a failure on the next open
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Handle on the call log that stays valid after the session is moved.
    pub fn call_log(&self) -> CallLog {
        self.call_log.clone()
    }

    fn synthetic_readout(&self) -> Readout {
        let wh = self.energy_wh.fetch_add(1_250, Ordering::SeqCst);
        let data = format!(
            "0.0.0(00000001)\r\n1.8.0({:010.3}*kWh)\r\n2.8.0(0000000.000*kWh)\r\n!\r\n",
            wh as f64 / 1000.0
        );
        Readout::new(MOCK_IDENTIFICATION, data)
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn open(&mut self) -> MeterResult<()> {
        self.call_log.record("open");

        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(MeterError::Transport("Mock open failure".to_string()));
        }

        self.open = true;
        tracing::debug!("MockSession opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn exchange(&mut self) -> MeterResult<Readout> {
        self.call_log.record("exchange");

        if !self.open {
            return Err(MeterError::Transport("Mock session not open".to_string()));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.script.pop_front() {
            Some(MockStep::Readout(readout)) => Ok(readout),
            Some(MockStep::TransportFailure(reason)) => Err(MeterError::Transport(reason)),
            Some(MockStep::Hang) => {
                futures::future::pending::<()>().await;
                Err(MeterError::Transport("Mock hang ended".to_string()))
            }
            None => Ok(self.synthetic_readout()),
        }
    }

    async fn close(&mut self) {
        self.call_log.record("close");
        self.open = false;
    }

    fn info(&self) -> String {
        format!("MockSession (latency: {}ms)", self.latency.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::readout::parse_readout;

    #[tokio::test]
    async fn test_exchange_requires_open() {
        let mut session = MockSession::new();
        assert!(!session.is_open());
        assert!(session.exchange().await.is_err());

        session.open().await.unwrap();
        assert!(session.is_open());
        session.close().await;
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_synthetic_registers_rise() {
        let mut session = MockSession::new();
        session.open().await.unwrap();

        let first = parse_readout(&session.exchange().await.unwrap()).unwrap();
        let second = parse_readout(&session.exchange().await.unwrap()).unwrap();

        let energy = |m: &crate::measurement::Measurement| m.reading("1.8.0").unwrap().value;
        assert!(energy(&second) > energy(&first));
        assert_eq!(first.identification, MOCK_IDENTIFICATION);
    }

    #[tokio::test]
    async fn test_call_log() {
        let mut session = MockSession::new();
        let log = session.call_log();
        session.open().await.unwrap();
        session.exchange().await.unwrap();
        session.close().await;
        assert_eq!(log.calls(), ["open", "exchange", "close"]);

        log.clear();
        assert!(log.calls().is_empty());
    }
}
