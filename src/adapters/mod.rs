//! Meter communication adapters.
//!
//! - [`TransportSession`] is the opaque exchange primitive: open a link, perform one
//!   readout, close. Implementations own the wire framing.
//! - [`Meter`] wraps a session with the connection lifecycle and turns readouts into
//!   [`Measurement`](crate::measurement::Measurement)s.
//! - [`readout`] interprets the data block of a readout.

use crate::config::MeterConfig;
use crate::error::MeterResult;
use async_trait::async_trait;

pub mod meter;
pub mod mock_session;
pub mod readout;
#[cfg(feature = "instrument_serial")]
pub mod serial_session;

pub use meter::{Meter, PollContext};
pub use mock_session::{MockSession, MockStep};
#[cfg(feature = "instrument_serial")]
pub use serial_session::SerialSession;

/// Raw result of one protocol exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readout {
    /// Identification line sent by the meter after sign-on (e.g. `/ISK5MT174-0001`)
    pub identification: String,
    /// Data block between STX and ETX, data sets separated by CR LF, ending in `!`
    pub data: String,
}

impl Readout {
    /// Build a readout from its two parts.
    pub fn new(identification: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            identification: identification.into(),
            data: data.into(),
        }
    }
}

/// One request/response exchange with a meter over some link.
///
/// # Contract
/// - `open` establishes the link; failures are `MeterError::Transport`
/// - `exchange` performs exactly one readout on an open link. Link failures are
///   `Transport`, framing failures are `Protocol`
/// - `close` must be safe to call on a closed or broken session
#[async_trait]
pub trait TransportSession: Send {
    /// Open the link.
    async fn open(&mut self) -> MeterResult<()>;

    /// Whether the link is currently held open.
    fn is_open(&self) -> bool;

    /// Perform one readout.
    async fn exchange(&mut self) -> MeterResult<Readout>;

    /// Release the link.
    async fn close(&mut self);

    /// Human-readable description for logs.
    fn info(&self) -> String;
}

/// Build the session described by the configuration.
///
/// `mock` selects the scripted [`MockSession`] instead of the serial port.
pub fn session_from_config(
    config: &MeterConfig,
    mock: bool,
) -> MeterResult<Box<dyn TransportSession>> {
    if mock {
        return Ok(Box::new(MockSession::new()));
    }

    #[cfg(feature = "instrument_serial")]
    {
        Ok(Box::new(SerialSession::from_config(config)))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = config;
        Err(crate::error::MeterError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    }
}
