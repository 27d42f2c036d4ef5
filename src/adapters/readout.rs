//! Readout data block interpretation.
//!
//! A data block is a sequence of data sets `ADDRESS(VALUE*UNIT)` separated by CR LF
//! and terminated by a line holding `!`. Several data sets may share a line, and a
//! data set may carry extra value groups (`1.6.0(1.234*kW)(2401011200)`), of which
//! only the first is kept. Values that are not numeric (serial numbers, dates) are
//! skipped and mark the measurement as partial.

use super::Readout;
use crate::error::{MeterError, MeterResult};
use crate::measurement::{AcquisitionStatus, Measurement, Reading};
use std::collections::BTreeMap;

/// Data block end marker.
const END_MARKER: char = '!';

/// Turn a readout into a measurement stamped now.
pub fn parse_readout(readout: &Readout) -> MeterResult<Measurement> {
    let (readings, status) = parse_data_block(&readout.data)?;
    Ok(Measurement::new(
        readout.identification.trim(),
        readings,
        status,
    ))
}

/// Parse the registers of a data block.
pub fn parse_data_block(data: &str) -> MeterResult<(BTreeMap<String, Reading>, AcquisitionStatus)> {
    let body = match data.find(END_MARKER) {
        Some(end) => &data[..end],
        None => {
            return Err(MeterError::Protocol(
                "data block is missing the '!' end marker".to_string(),
            ))
        }
    };

    let mut readings = BTreeMap::new();
    let mut data_sets = 0usize;
    let mut skipped = 0usize;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        for (address, value) in split_data_sets(line)? {
            data_sets += 1;
            match parse_value(value) {
                Some(reading) => {
                    readings.insert(address.to_string(), reading);
                }
                None => {
                    tracing::debug!(address, value, "Skipping non-numeric data set");
                    skipped += 1;
                }
            }
        }
    }

    if data_sets == 0 {
        return Err(MeterError::Protocol(
            "readout contained no data sets".to_string(),
        ));
    }

    let status = if skipped == 0 {
        AcquisitionStatus::Complete
    } else {
        AcquisitionStatus::Partial
    };
    Ok((readings, status))
}

/// Split one line into `(address, first value group)` pairs.
fn split_data_sets(line: &str) -> MeterResult<Vec<(&str, &str)>> {
    let mut sets = Vec::new();
    let mut rest = line;

    while !rest.is_empty() {
        let open = rest
            .find('(')
            .ok_or_else(|| MeterError::Protocol(format!("data set without value: '{line}'")))?;
        let address = rest[..open].trim();
        if address.is_empty() {
            return Err(MeterError::Protocol(format!(
                "data set without address: '{line}'"
            )));
        }
        rest = &rest[open..];

        let mut first_value = None;
        while let Some(group) = rest.strip_prefix('(') {
            let close = group
                .find(')')
                .ok_or_else(|| MeterError::Protocol(format!("unterminated value in '{line}'")))?;
            first_value.get_or_insert(&group[..close]);
            rest = &group[close + 1..];
        }

        if let Some(value) = first_value {
            sets.push((address, value));
        }
        rest = rest.trim_start();
    }

    Ok(sets)
}

fn parse_value(raw: &str) -> Option<Reading> {
    let (number, unit) = match raw.split_once('*') {
        Some((number, unit)) => (number.trim(), Some(unit.trim())),
        None => (raw.trim(), None),
    };
    let value = number.parse::<f64>().ok()?;
    Some(Reading {
        value,
        unit: unit.filter(|u| !u.is_empty()).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "0.0.0(12345678)\r\n\
                          1.8.0(001234.567*kWh)\r\n\
                          1.8.1(000800.000*kWh)2.8.0(000012.001*kWh)\r\n\
                          1.6.0(02.512*kW)(2401011215)\r\n\
                          !\r\n";

    #[test]
    fn parses_numeric_registers() {
        let (readings, status) = parse_data_block(SAMPLE).unwrap();
        assert_eq!(status, AcquisitionStatus::Complete);
        assert_eq!(readings["1.8.0"], Reading::new(1234.567, "kWh"));
        assert_eq!(readings["1.8.1"], Reading::new(800.0, "kWh"));
        assert_eq!(readings["2.8.0"], Reading::new(12.001, "kWh"));
        assert_eq!(readings["1.6.0"], Reading::new(2.512, "kW"));
        assert_eq!(readings["0.0.0"], Reading::unitless(12345678.0));
    }

    #[test]
    fn non_numeric_values_make_partial() {
        let data = "C.1.0(ISK-12AB)\r\n1.8.0(5.0*kWh)\r\n!\r\n";
        let (readings, status) = parse_data_block(data).unwrap();
        assert_eq!(status, AcquisitionStatus::Partial);
        assert_eq!(readings.len(), 1);
        assert!(readings.contains_key("1.8.0"));
    }

    #[test]
    fn missing_end_marker_is_protocol_error() {
        let err = parse_data_block("1.8.0(5.0*kWh)\r\n").unwrap_err();
        assert!(matches!(err, MeterError::Protocol(_)));
    }

    #[test]
    fn malformed_data_sets_are_protocol_errors() {
        for data in ["(5.0*kWh)\r\n!", "1.8.0(5.0*kWh\r\n!", "1.8.0\r\n!", "!"] {
            let err = parse_data_block(data).unwrap_err();
            assert!(matches!(err, MeterError::Protocol(_)), "input: {data:?}");
        }
    }

    #[test]
    fn readout_becomes_measurement() {
        let readout = Readout::new("/ISK5MT174-0001\r\n", SAMPLE);
        let measurement = parse_readout(&readout).unwrap();
        assert_eq!(measurement.identification, "/ISK5MT174-0001");
        assert_eq!(measurement.readings.len(), 5);
    }
}
