//! Meter Adapter
//!
//! Owns a [`TransportSession`] and exposes one operation, [`Meter::get`]: a single
//! clean exchange, clearly reported. The adapter never retries and never sleeps
//! between polls; meters enforce a minimum quiet interval and the caller owns the
//! polling cadence.
//!
//! The session is held open across calls. When an exchange fails the session is
//! closed, so the next call reopens it instead of staying permanently failed
//! (e.g. after the USB converter was unplugged and plugged back in). A poll that
//! hits its deadline also closes the session; closing may take up to the session's
//! read timeout while an abandoned blocking read drains.

use super::{readout, Readout, TransportSession};
use crate::error::{MeterError, MeterResult};
use crate::measurement::Measurement;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-call options for [`Meter::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollContext {
    /// Deadline for opening the link plus the exchange. `None` relies on the
    /// session's own read timeouts.
    pub timeout: Option<Duration>,
}

impl PollContext {
    /// Context bounded by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Adapter for one physical meter.
pub struct Meter {
    session: Mutex<Box<dyn TransportSession>>,
}

impl Meter {
    /// Wrap a session.
    pub fn new(session: impl TransportSession + 'static) -> Self {
        Self::from_boxed(Box::new(session))
    }

    /// Wrap an already boxed session.
    pub fn from_boxed(session: Box<dyn TransportSession>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Perform exactly one readout and interpret it.
    ///
    /// # Errors
    /// - `MeterError::Transport` if the link cannot be opened, the exchange does not
    ///   complete, or `ctx.timeout` elapses
    /// - `MeterError::Protocol` if the response cannot be interpreted
    pub async fn get(&self, ctx: &PollContext) -> MeterResult<Measurement> {
        let mut session = self.session.lock().await;

        let outcome = match ctx.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange_once(&mut **session))
                .await
                .unwrap_or_else(|_| {
                    Err(MeterError::Transport(format!(
                        "poll deadline of {limit:?} elapsed"
                    )))
                }),
            None => exchange_once(&mut **session).await,
        };

        let readout = match outcome {
            Ok(readout) => readout,
            Err(err) => {
                tracing::warn!(session = %session.info(), error = %err, "Meter exchange failed, closing session");
                session.close().await;
                return Err(err);
            }
        };

        let measurement = readout::parse_readout(&readout).map_err(|err| {
            tracing::warn!(
                identification = %readout.identification,
                error = %err,
                "Meter readout could not be interpreted"
            );
            err
        })?;

        tracing::debug!(
            id = %measurement.id,
            registers = measurement.readings.len(),
            status = %measurement.status,
            "Meter readout acquired"
        );
        Ok(measurement)
    }

    /// Close the underlying session, if open.
    pub async fn close(&self) {
        self.session.lock().await.close().await;
    }

    /// Description of the underlying session.
    pub async fn info(&self) -> String {
        self.session.lock().await.info()
    }
}

async fn exchange_once(session: &mut dyn TransportSession) -> MeterResult<Readout> {
    if !session.is_open() {
        tracing::debug!(session = %session.info(), "Opening meter session");
        session.open().await?;
    }
    session.exchange().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_session::{MockSession, MockStep};

    const DATA: &str = "1.8.0(000100.000*kWh)\r\n!\r\n";

    #[tokio::test]
    async fn test_get_opens_once_and_reuses() {
        let session = MockSession::new();
        let log = session.call_log();
        let meter = Meter::new(session);

        meter.get(&PollContext::default()).await.unwrap();
        meter.get(&PollContext::default()).await.unwrap();

        assert_eq!(log.calls(), ["open", "exchange", "exchange"]);
    }

    #[tokio::test]
    async fn test_transport_failure_reopens_on_next_call() {
        let session = MockSession::scripted(vec![
            MockStep::TransportFailure("device disconnected".into()),
            MockStep::Readout(Readout::new("/TST5", DATA)),
        ]);
        let log = session.call_log();
        let meter = Meter::new(session);

        let err = meter.get(&PollContext::default()).await.unwrap_err();
        assert!(matches!(err, MeterError::Transport(_)));

        let measurement = meter.get(&PollContext::default()).await.unwrap();
        assert_eq!(measurement.identification, "/TST5");
        assert_eq!(log.calls(), ["open", "exchange", "close", "open", "exchange"]);
    }

    #[tokio::test]
    async fn test_open_failure_is_transport_error() {
        let session = MockSession::new();
        session.fail_next_open();
        let meter = Meter::new(session);

        let err = meter.get(&PollContext::default()).await.unwrap_err();
        assert!(matches!(err, MeterError::Transport(_)));
        assert!(meter.get(&PollContext::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unparseable_readout_is_protocol_error() {
        let session = MockSession::scripted(vec![MockStep::Readout(Readout::new(
            "/TST5",
            "garbage without end marker",
        ))]);
        let meter = Meter::new(session);

        let err = meter.get(&PollContext::default()).await.unwrap_err();
        assert!(matches!(err, MeterError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses_as_transport_error() {
        let session = MockSession::scripted(vec![MockStep::Hang]);
        let log = session.call_log();
        let meter = Meter::new(session);

        let err = meter
            .get(&PollContext::with_timeout(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::Transport(ref msg) if msg.contains("deadline")));
        assert_eq!(log.calls().last().map(String::as_str), Some("close"));
    }
}
