//! # Telemetry Monitor Library
//!
//! Live ingestion of device telemetry logs for plotting.
//!
//! A device-side logger announces each session over a named pipe by sending
//! the paths of its PWM and accelerometer logs. This library tails both files
//! as they grow, keeps a sliding time window of samples per stream, and hands
//! snapshots to a renderer at a fixed rate until the logger sends `eof`.

pub mod config;
pub mod control;
pub mod error;
pub mod render;
pub mod session;
pub mod tail;
pub mod telemetry;
