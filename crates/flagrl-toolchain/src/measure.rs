//! Parsing of the measurement harness record.
//!
//! The profiling wrapper prints a record enclosed in a literal marker so it
//! can be told apart from whatever the measured binary itself prints:
//!
//! ```text
//! SYMVEC0 0 0 0 2048 0 112 0 0 4096 3 0 0 0 0 1 0.01 0.42SYMVEC
//! ```
//!
//! All fields but the last two form the state vector (truncated to
//! integers). The last two are system and user seconds, summed into the
//! execution cost.

use flagrl_core::StateVector;

use crate::error::ToolchainError;
use crate::process::ToolOutput;

/// Marker enclosing the measurement record.
pub const MEASUREMENT_MARKER: &str = "SYMVEC";

/// A parsed measurement record.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub state: StateVector,
    pub cost: f64,
}

/// Parse the record from a tool invocation, looking in stdout then stderr.
///
/// GNU `time` writes its report to stderr; wrappers that print to stdout
/// are accepted too.
pub fn parse_measurement(output: &ToolOutput, marker: &str) -> Result<MeasurementRecord, ToolchainError> {
    if output.stdout.contains(marker) {
        parse_record(&output.stdout, marker)
    } else if output.stderr.contains(marker) {
        parse_record(&output.stderr, marker)
    } else {
        Err(ToolchainError::MissingMarker {
            marker: marker.to_string(),
        })
    }
}

/// Parse the text between the first and second occurrence of `marker`.
///
/// A missing closing marker is tolerated: the record then runs to the end
/// of the text.
pub fn parse_record(text: &str, marker: &str) -> Result<MeasurementRecord, ToolchainError> {
    let mut parts = text.split(marker);
    parts.next();
    let record = parts.next().ok_or_else(|| ToolchainError::MissingMarker {
        marker: marker.to_string(),
    })?;

    let malformed = |reason: String| ToolchainError::MalformedRecord {
        record: record.trim().to_string(),
        reason,
    };

    let fields: Vec<&str> = record.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(malformed(format!(
            "expected at least 2 fields, found {}",
            fields.len()
        )));
    }

    let (state_fields, cost_fields) = fields.split_at(fields.len() - 2);

    let mut state = Vec::with_capacity(state_fields.len());
    for field in state_fields {
        let value: f64 = field
            .parse()
            .map_err(|_| malformed(format!("non-numeric state field '{}'", field)))?;
        state.push(value.trunc() as i64);
    }

    let mut cost = 0.0;
    for field in cost_fields {
        let value: f64 = field
            .parse()
            .map_err(|_| malformed(format!("non-numeric cost field '{}'", field)))?;
        cost += value;
    }

    Ok(MeasurementRecord {
        state: StateVector(state),
        cost,
    })
}
