//! # Control Channel Module
//!
//! The named pipe through which the device side announces sessions.
//!
//! This module handles:
//! - Parsing control lines (`<pwm>,<acc>` and `eof`)
//! - Checking, creating and removing the pipe
//! - Reading the pipe with a bounded timeout so shutdown and a vanished
//!   pipe are noticed promptly

pub mod message;
pub mod pipe;
pub mod reader;

pub use message::ControlMessage;
pub use pipe::PipeGuard;
pub use reader::ControlReader;
