//! Measurement value objects.
//!
//! A [`Measurement`] is one complete readout of the meter: when it was taken, which
//! meter answered, and the numeric registers it reported keyed by their obis-style
//! identifier (e.g. `1.8.0` for total imported active energy). Measurements are
//! immutable once built; the repository hands them out as `Arc<Measurement>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A single register value with its unit as reported by the meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Numeric register value
    pub value: f64,
    /// Unit string (e.g. "kWh"), absent for dimensionless registers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Reading {
    /// Create a reading with a unit.
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: Some(unit.into()),
        }
    }

    /// Create a dimensionless reading.
    pub fn unitless(value: f64) -> Self {
        Self { value, unit: None }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "{} {}", self.value, unit),
            None => write!(f, "{}", self.value),
        }
    }
}

/// Outcome of interpreting a readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionStatus {
    /// Every data set in the readout was a numeric register
    Complete,
    /// Some data sets were skipped because they carried no numeric value
    Partial,
}

impl fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionStatus::Complete => f.write_str("complete"),
            AcquisitionStatus::Partial => f.write_str("partial"),
        }
    }
}

/// One reading acquired from the meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Unique id, usable as an explicit repository key
    pub id: Uuid,
    /// Acquisition time
    pub acquired_at: DateTime<Utc>,
    /// Identification line the meter answered the sign-on with
    pub identification: String,
    /// Registers keyed by obis-style identifier
    pub readings: BTreeMap<String, Reading>,
    /// Whether the readout was fully interpreted
    pub status: AcquisitionStatus,
}

impl Measurement {
    /// Build a measurement stamped with a fresh id and the current time.
    pub fn new(
        identification: impl Into<String>,
        readings: BTreeMap<String, Reading>,
        status: AcquisitionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            acquired_at: Utc::now(),
            identification: identification.into(),
            readings,
            status,
        }
    }

    /// Look up a register by its identifier.
    pub fn reading(&self, obis: &str) -> Option<&Reading> {
        self.readings.get(obis)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id:{} acquired_at:{} identification:{} status:{} readings:[",
            self.id,
            self.acquired_at.to_rfc3339(),
            self.identification,
            self.status
        )?;
        for (i, (obis, reading)) in self.readings.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", obis, reading)?;
        }
        f.write_str("]}")
    }
}
