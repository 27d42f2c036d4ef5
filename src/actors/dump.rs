//! Cache Dumper Actor
//!
//! Diagnostic export: reads the whole repository once and writes the textual form
//! of every measurement to a sink, one per line, in repository order.

use crate::error::MeterResult;
use crate::repository::MeasurementRepository;
use std::io::Write;
use std::sync::Arc;

/// Dumps the repository into `writer`.
pub struct CacheDumper<W> {
    repo: Arc<dyn MeasurementRepository>,
    writer: W,
}

impl<W: Write> CacheDumper<W> {
    /// Build a dumper over `repo` writing into `writer`.
    pub fn new(repo: Arc<dyn MeasurementRepository>, writer: W) -> Self {
        Self { repo, writer }
    }

    /// Write every measurement and return how many were written.
    ///
    /// Sink write faults are returned as `MeterError::Io`; nothing is retried.
    pub async fn run(&mut self) -> MeterResult<usize> {
        let measurements = self.repo.get_all().await.map_err(|err| {
            tracing::error!(error = %err, "Error reading the local cache");
            err
        })?;
        tracing::info!(count = measurements.len(), "Retrieved measurements");

        for measurement in &measurements {
            writeln!(self.writer, "{measurement}")?;
        }
        self.writer.flush()?;
        Ok(measurements.len())
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
