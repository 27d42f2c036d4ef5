//! Serial transport session for optical-probe / RS-485 meters
//!
//! Performs an IEC 62056-21 mode C readout at the initial baud rate:
//!
//! 1. send the sign-on request `/?<address>!` CR LF
//! 2. read the identification line `/XXXZ<ident>` CR LF
//! 3. acknowledge with `ACK 0 Z 0` CR LF, keeping the current speed
//! 4. read `STX <data block> ETX BCC` and verify the block check character
//!
//! Serial I/O is blocking, so every exchange runs on Tokio's blocking pool. A
//! blocking readout cannot be cancelled: when the caller gives up on an exchange the
//! task keeps the port until its own read deadline passes. `close` waits for it, so
//! the port is released before the next `open`.

use super::{Readout, TransportSession};
use crate::config::MeterConfig;
use crate::error::{MeterError, MeterResult};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const ACK: u8 = 0x06;

/// Internal read timeout of the port; the overall deadline is `read_timeout`.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial session using the `serialport` crate.
pub struct SerialSession {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Initial baud rate; the readout stays at this speed
    baud_rate: u32,

    /// Overall deadline for each response
    read_timeout: Duration,

    /// Optional device address placed in the sign-on request
    device_address: Option<String>,

    /// The open port (behind Arc<Mutex> so it can move to the blocking pool)
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,

    /// Blocking readout still holding a handle to the port
    in_flight: Option<JoinHandle<MeterResult<Readout>>>,
}

impl SerialSession {
    /// Create a closed session with default timing.
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            read_timeout: Duration::from_millis(1500),
            device_address: None,
            port: None,
            in_flight: None,
        }
    }

    /// Create a session from the `[meter]` configuration section.
    pub fn from_config(config: &MeterConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
            .with_read_timeout(config.read_timeout)
            .with_device_address(config.device_address.clone())
    }

    /// Set the per-response deadline
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the device address used in the sign-on request
    pub fn with_device_address(mut self, address: Option<String>) -> Self {
        self.device_address = address;
        self
    }

    fn sign_on_request(&self) -> Vec<u8> {
        format!("/?{}!\r\n", self.device_address.as_deref().unwrap_or("")).into_bytes()
    }

    fn acknowledgement(&self) -> MeterResult<Vec<u8>> {
        let speed = baud_rate_code(self.baud_rate).ok_or_else(|| {
            MeterError::Configuration(format!("unsupported baud rate {}", self.baud_rate))
        })?;
        Ok(vec![ACK, b'0', speed, b'0', b'\r', b'\n'])
    }
}

/// Speed identifier used in the acknowledgement for a given baud rate.
fn baud_rate_code(baud_rate: u32) -> Option<u8> {
    match baud_rate {
        300 => Some(b'0'),
        600 => Some(b'1'),
        1200 => Some(b'2'),
        2400 => Some(b'3'),
        4800 => Some(b'4'),
        9600 => Some(b'5'),
        19200 => Some(b'6'),
        _ => None,
    }
}

fn transport_error(context: &str, err: std::io::Error) -> MeterError {
    MeterError::Transport(format!("{context}: {err}"))
}

/// Read bytes until `delimiter` (inclusive) or until `deadline` passes.
fn read_until<R: Read + ?Sized>(
    reader: &mut R,
    delimiter: u8,
    deadline: Instant,
) -> MeterResult<BytesMut> {
    let mut buffer = BytesMut::with_capacity(256);
    loop {
        let byte = read_one(reader, deadline)?;
        buffer.put_u8(byte);
        if byte == delimiter {
            return Ok(buffer);
        }
    }
}

/// Read the data message `STX data ETX BCC` and return the verified data block.
fn read_data_message<R: Read + ?Sized>(reader: &mut R, deadline: Instant) -> MeterResult<String> {
    let frame = read_until(reader, ETX, deadline)?;
    let start = frame
        .iter()
        .position(|&b| b == STX)
        .ok_or_else(|| MeterError::Protocol("data message without STX".to_string()))?;

    let bcc = read_one(reader, deadline)?;

    // BCC covers everything after STX up to and including ETX.
    let expected = frame[start + 1..].iter().fold(0u8, |acc, b| acc ^ b);
    if expected != bcc {
        return Err(MeterError::Protocol(format!(
            "block check mismatch: expected 0x{expected:02x}, got 0x{bcc:02x}"
        )));
    }

    let block = &frame[start + 1..frame.len() - 1];
    String::from_utf8(block.to_vec())
        .map_err(|_| MeterError::Protocol("data block is not valid text".to_string()))
}

fn read_one<R: Read + ?Sized>(reader: &mut R, deadline: Instant) -> MeterResult<u8> {
    let mut byte = [0u8; 1];
    loop {
        if Instant::now() > deadline {
            return Err(MeterError::Transport(
                "timed out waiting for the meter to answer".to_string(),
            ));
        }
        match reader.read(&mut byte) {
            Ok(1) => return Ok(byte[0]),
            Ok(_) => {
                return Err(MeterError::Transport(
                    "unexpected EOF from serial port".to_string(),
                ))
            }
            // Port timeout is shorter than the overall deadline
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(transport_error("serial read error", e)),
        }
    }
}

/// The blocking half of one readout.
fn run_readout<P: Read + Write + ?Sized>(
    port: &mut P,
    sign_on: &[u8],
    ack: &[u8],
    read_timeout: Duration,
) -> MeterResult<Readout> {
    port.write_all(sign_on)
        .and_then(|_| port.flush())
        .map_err(|e| transport_error("failed to send sign-on request", e))?;

    let ident = read_until(port, b'\n', Instant::now() + read_timeout)?;
    let identification = String::from_utf8_lossy(&ident).trim().to_string();
    if !identification.starts_with('/') {
        return Err(MeterError::Protocol(format!(
            "unexpected identification '{identification}'"
        )));
    }

    port.write_all(ack)
        .and_then(|_| port.flush())
        .map_err(|e| transport_error("failed to send acknowledgement", e))?;

    let data = read_data_message(port, Instant::now() + read_timeout)?;
    Ok(Readout {
        identification,
        data,
    })
}

#[async_trait]
impl TransportSession for SerialSession {
    async fn open(&mut self) -> MeterResult<()> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .data_bits(serialport::DataBits::Seven)
                .parity(serialport::Parity::Even)
                .stop_bits(serialport::StopBits::One)
                .timeout(PORT_POLL_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| MeterError::Transport(format!("serial open task failed: {e}")))?
        .map_err(|e| {
            MeterError::Transport(format!(
                "failed to open serial port '{}' at {} baud: {}",
                self.port_name, self.baud_rate, e
            ))
        })?;

        port.clear(serialport::ClearBuffer::All).map_err(|e| {
            MeterError::Transport(format!("failed to clear serial buffers: {e}"))
        })?;

        self.port = Some(Arc::new(Mutex::new(port)));
        tracing::debug!(
            port = %self.port_name,
            baud = self.baud_rate,
            "Serial port opened"
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn exchange(&mut self) -> MeterResult<Readout> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| MeterError::Transport("serial port not connected".to_string()))?
            .clone();

        let sign_on = self.sign_on_request();
        let ack = self.acknowledgement()?;
        let read_timeout = self.read_timeout;

        // Execute blocking serial I/O on dedicated thread
        let task = self.in_flight.insert(tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            run_readout(&mut **guard, &sign_on, &ack, read_timeout)
        }));
        let outcome = task.await;
        self.in_flight = None;
        outcome.map_err(|e| MeterError::Transport(format!("serial I/O task failed: {e}")))?
    }

    async fn close(&mut self) {
        if let Some(task) = self.in_flight.take() {
            tracing::debug!(port = %self.port_name, "Waiting for abandoned readout to finish");
            let _ = task.await;
        }
        if self.port.take().is_some() {
            tracing::debug!(port = %self.port_name, "Serial port closed");
        }
    }

    fn info(&self) -> String {
        format!("SerialSession({} @ {} baud)", self.port_name, self.baud_rate)
    }
}
