//! # Telemetry Module
//!
//! Sample schemas and the windowed buffers they are ingested into.
//!
//! This module handles:
//! - Parsing PWM and accelerometer log lines into fixed-shape samples
//! - Keeping a sliding time window of samples per stream
//! - Producing consistent snapshots for rendering

pub mod buffer;
pub mod sample;

use buffer::SharedBuffer;
use sample::{AccSample, PwmSample};

/// The pair of stream buffers owned by one monitor.
///
/// PWM and accelerometer streams are never cross-referenced, so each has its
/// own lock.
#[derive(Debug, Clone)]
pub struct TelemetryBuffers {
    pub pwm: SharedBuffer<PwmSample>,
    pub acc: SharedBuffer<AccSample>,
}

impl TelemetryBuffers {
    /// Creates empty buffers sharing the same window span.
    pub fn new(window: f64) -> Self {
        Self {
            pwm: SharedBuffer::new(window),
            acc: SharedBuffer::new(window),
        }
    }
}
