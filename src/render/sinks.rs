//! # Renderer Sinks
//!
//! Concrete [`Renderer`]s shipped with the monitor. A plotting front end
//! can consume the JSON lines output; the log sink is for headless runs.

use std::io::Write;
use tracing::{debug, info, warn};

use super::{Frame, Renderer};

/// Number of frames between status log messages
const LOG_INTERVAL_FRAMES: u64 = 100;

/// Logs a short summary of each frame
#[derive(Debug, Default)]
pub struct LogRenderer {
    last_logged: Option<u64>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn describe(frame: &Frame) -> String {
    format!(
        "pwm {} samples over {:.3}s, acc {} samples over {:.3}s",
        frame.pwm.len(),
        frame.pwm.span(),
        frame.acc.len(),
        frame.acc.span()
    )
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &Frame) {
        debug!("Frame {}: {}", frame.sequence, describe(frame));

        let due = self
            .last_logged
            .map_or(true, |last| frame.sequence - last >= LOG_INTERVAL_FRAMES);
        if due {
            info!("Frame {}: {}", frame.sequence, describe(frame));
            self.last_logged = Some(frame.sequence);
        }
    }

    fn session_complete(&mut self, frame: &Frame) {
        info!("Session complete after {} frames: {}", frame.sequence + 1, describe(frame));
    }
}

/// Writes every frame as one JSON object per line
///
/// Writes and flushes block; the render scheduler calls renderers on the
/// blocking pool, so a slow consumer only delays frames.
#[derive(Debug)]
pub struct JsonLinesRenderer<W> {
    out: W,
    failed: bool,
}

impl<W: Write + Send> JsonLinesRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, failed: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, frame)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write + Send> Renderer for JsonLinesRenderer<W> {
    fn render(&mut self, frame: &Frame) {
        if let Err(e) = self.write_frame(frame) {
            // Report once, the consumer is probably gone
            if !self.failed {
                warn!("Failed to write frame {}: {}", frame.sequence, e);
                self.failed = true;
            }
        }
    }
}

/// Discards frames
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &Frame) {}
}
