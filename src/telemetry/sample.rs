//! # Sample Schemas
//!
//! Fixed-shape records for the two telemetry streams and the line parser
//! that produces them.
//!
//! ## Line Formats
//!
//! Both logs are comma-separated floating-point fields, one record per line:
//!
//! - PWM: `t,x_cmd,x_freq,y_cmd,y_freq,z_cmd,z_freq`
//! - Accelerometer: `t,x,y,z`
//!
//! The first field is always the timestamp.
//!
//! ## Usage
//!
//! ```
//! use telemetry_monitor::telemetry::sample::{parse_line, AccSample};
//!
//! let sample: AccSample = parse_line("0.5,1.0,-2.0,9.8").unwrap();
//! assert_eq!(sample.t, 0.5);
//! assert_eq!(sample.z, 9.8);
//! ```

use crate::error::ParseError;

/// Field delimiter shared by both log formats
pub const FIELD_DELIMITER: char = ',';

/// A fixed-arity telemetry record.
///
/// Field 0 is the timestamp. `FIELDS` names every column in file order.
pub trait Schema: Copy + Send + Sync + std::fmt::Debug + 'static {
    /// Stream name used in logs and rendered frames
    const STREAM: &'static str;

    /// Column names, in file order
    const FIELDS: &'static [&'static str];

    /// Builds a sample from exactly `FIELDS.len()` values.
    ///
    /// Returns `None` when the slice length is wrong.
    fn from_values(values: &[f64]) -> Option<Self>;

    /// Value of the column at `index` (file order).
    fn value(&self, index: usize) -> f64;

    /// Sample timestamp
    fn timestamp(&self) -> f64 {
        self.value(0)
    }

    /// Number of columns
    fn arity() -> usize {
        Self::FIELDS.len()
    }
}

/// Periodic PWM command/frequency sample for the three actuator axes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmSample {
    pub t: f64,
    pub x_cmd: f64,
    pub x_freq: f64,
    pub y_cmd: f64,
    pub y_freq: f64,
    pub z_cmd: f64,
    pub z_freq: f64,
}

impl Schema for PwmSample {
    const STREAM: &'static str = "pwm";
    const FIELDS: &'static [&'static str] =
        &["t", "x_cmd", "x_freq", "y_cmd", "y_freq", "z_cmd", "z_freq"];

    fn from_values(values: &[f64]) -> Option<Self> {
        let [t, x_cmd, x_freq, y_cmd, y_freq, z_cmd, z_freq] = *values else {
            return None;
        };
        Some(Self { t, x_cmd, x_freq, y_cmd, y_freq, z_cmd, z_freq })
    }

    fn value(&self, index: usize) -> f64 {
        match index {
            0 => self.t,
            1 => self.x_cmd,
            2 => self.x_freq,
            3 => self.y_cmd,
            4 => self.y_freq,
            5 => self.z_cmd,
            6 => self.z_freq,
            _ => f64::NAN,
        }
    }
}

/// Three-axis accelerometer sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccSample {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Schema for AccSample {
    const STREAM: &'static str = "acc";
    const FIELDS: &'static [&'static str] = &["t", "x", "y", "z"];

    fn from_values(values: &[f64]) -> Option<Self> {
        let [t, x, y, z] = *values else {
            return None;
        };
        Some(Self { t, x, y, z })
    }

    fn value(&self, index: usize) -> f64 {
        match index {
            0 => self.t,
            1 => self.x,
            2 => self.y,
            3 => self.z,
            _ => f64::NAN,
        }
    }
}

/// Parse one log line into a sample of schema `S`.
///
/// Surrounding whitespace (including a trailing `\r`) is ignored, as is
/// whitespace around each field.
///
/// # Errors
///
/// - [`ParseError::FieldCount`] if the line does not have exactly
///   `S::FIELDS.len()` fields
/// - [`ParseError::InvalidNumber`] if a field is not a float
/// - [`ParseError::NonFinite`] if a field parses to NaN or infinity
pub fn parse_line<S: Schema>(line: &str) -> Result<S, ParseError> {
    let fields: Vec<&str> = line.trim().split(FIELD_DELIMITER).collect();

    if fields.len() != S::arity() {
        return Err(ParseError::FieldCount {
            expected: S::arity(),
            found: fields.len(),
        });
    }

    let mut values = Vec::with_capacity(fields.len());
    for (raw, &name) in fields.iter().zip(S::FIELDS) {
        let raw = raw.trim();
        let value: f64 = raw.parse().map_err(|_| ParseError::InvalidNumber {
            field: name,
            value: raw.to_string(),
        })?;
        if !value.is_finite() {
            return Err(ParseError::NonFinite { field: name });
        }
        values.push(value);
    }

    S::from_values(&values).ok_or(ParseError::FieldCount {
        expected: S::arity(),
        found: values.len(),
    })
}
