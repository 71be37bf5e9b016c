//! # File Tailer
//!
//! Incrementally reads one append-only log file and feeds complete lines into
//! a [`SharedBuffer`].
//!
//! The tailer remembers how many lines it has fully consumed and the byte
//! position right after the last consumed `\n`. A poll seeks to that position,
//! reads what the writer has appended since, and only consumes lines that are
//! newline-terminated. A trailing partial line stays in the file until a
//! later poll sees its terminator, so a sample is never ingested twice or
//! half-parsed because of a racing writer.
//!
//! Malformed lines are logged and skipped; they never stop the tailer.

use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::telemetry::buffer::SharedBuffer;
use crate::telemetry::sample::{parse_line, Schema};

/// Resume point of a tailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailerState {
    pub file_path: PathBuf,
    /// Number of fully consumed lines
    pub next_line_offset: u64,
}

/// What a single poll did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Newly consumed lines, including blank and malformed ones
    pub lines: usize,
    pub ingested: usize,
    pub dropped: usize,
}

/// Running counters for one tailed stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TailStats {
    pub polls: u64,
    pub lines_ingested: u64,
    pub lines_dropped: u64,
    /// Times the file was seen shorter than the consumed offset
    pub truncations: u64,
}

/// Tails one log file of schema `S`
#[derive(Debug)]
pub struct FileTailer<S: Schema> {
    state: TailerState,
    byte_offset: u64,
    buffer: SharedBuffer<S>,
    stats: TailStats,
    // Set while the file is shorter than what was consumed
    truncated: bool,
}

impl<S: Schema> FileTailer<S> {
    /// Creates a tailer positioned at the start of `path`.
    ///
    /// The file does not need to exist yet.
    pub fn new(path: impl Into<PathBuf>, buffer: SharedBuffer<S>) -> Self {
        Self {
            state: TailerState {
                file_path: path.into(),
                next_line_offset: 0,
            },
            byte_offset: 0,
            buffer,
            stats: TailStats::default(),
            truncated: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.state.file_path
    }

    pub fn state(&self) -> &TailerState {
        &self.state
    }

    pub fn stats(&self) -> TailStats {
        self.stats
    }

    /// Reads and ingests every complete line appended since the last poll.
    ///
    /// Calling `poll` again without new content is a no-op. A missing file is
    /// treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be opened or read.
    /// Offsets are unchanged in that case, so the next poll retries the same
    /// lines.
    pub fn poll(&mut self) -> io::Result<PollOutcome> {
        self.stats.polls += 1;

        let mut file = match File::open(&self.state.file_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{}: {} not created yet", S::STREAM, self.state.file_path.display());
                return Ok(PollOutcome::default());
            }
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.byte_offset {
            if self.truncated {
                return Ok(PollOutcome::default());
            }
            self.truncated = true;
            self.stats.truncations += 1;
            warn!(
                "{}: {} shrank from {} to {} bytes; writer must append only, ignoring",
                S::STREAM,
                self.state.file_path.display(),
                self.byte_offset,
                len
            );
            return Ok(PollOutcome::default());
        }
        self.truncated = false;
        if len == self.byte_offset {
            return Ok(PollOutcome::default());
        }

        file.seek(SeekFrom::Start(self.byte_offset))?;
        let mut appended = Vec::with_capacity((len - self.byte_offset) as usize);
        file.read_to_end(&mut appended)?;

        // Only newline-terminated lines are consumed
        let Some(last_newline) = appended.iter().rposition(|&b| b == b'\n') else {
            return Ok(PollOutcome::default());
        };

        let mut outcome = PollOutcome::default();
        let mut samples = Vec::new();

        for raw in appended[..last_newline].split(|&b| b == b'\n') {
            outcome.lines += 1;
            let line_no = self.state.next_line_offset + outcome.lines as u64;
            let line = String::from_utf8_lossy(raw);

            if line.trim().is_empty() {
                continue;
            }

            match parse_line::<S>(&line) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    warn!(
                        "{}: dropping line {} of {}: {} ({:?})",
                        S::STREAM,
                        line_no,
                        self.state.file_path.display(),
                        e,
                        line.trim_end()
                    );
                    outcome.dropped += 1;
                }
            }
        }

        let parsed = samples.len();
        let rejected = self.buffer.ingest_all(samples);
        for (_, e) in &rejected {
            warn!("{}: dropping sample from {}: {}", S::STREAM, self.state.file_path.display(), e);
        }
        outcome.ingested = parsed - rejected.len();
        outcome.dropped += rejected.len();

        self.byte_offset += last_newline as u64 + 1;
        self.state.next_line_offset += outcome.lines as u64;
        self.stats.lines_ingested += outcome.ingested as u64;
        self.stats.lines_dropped += outcome.dropped as u64;

        debug!(
            "{}: consumed {} lines ({} ingested, {} dropped), offset now {}",
            S::STREAM,
            outcome.lines,
            outcome.ingested,
            outcome.dropped,
            self.state.next_line_offset
        );

        Ok(outcome)
    }
}
