//! # Control Reader
//!
//! Reads newline-delimited control messages from the pipe and forwards them
//! to the session monitor.
//!
//! Each read is bounded by a timeout. Whenever the timeout expires the reader
//! checks that the pipe it opened is still the one at its path; if the pipe
//! was deleted or replaced the reader fails with
//! [`MonitorError::PipeVanished`], since no further messages can ever arrive.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::unix::pipe;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use super::message::ControlMessage;
use super::pipe::open_receiver;
use crate::error::{MonitorError, Result};

/// Line reader over an open control pipe
#[derive(Debug)]
pub struct ControlReader {
    path: PathBuf,
    identity: (u64, u64),
    lines: Lines<BufReader<pipe::Receiver>>,
    read_timeout: Duration,
}

impl ControlReader {
    /// Opens the pipe at `path`.
    ///
    /// # Errors
    ///
    /// Fails fast with [`MonitorError::PipeNotFound`] or
    /// [`MonitorError::NotAFifo`] if the pipe is missing or not a pipe.
    pub fn open(path: &Path, read_timeout: Duration) -> Result<Self> {
        let receiver = open_receiver(path)?;
        let identity = file_identity(path)?;
        debug!("Opened control pipe {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            identity,
            lines: BufReader::new(receiver).lines(),
            read_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forwards messages to `tx` until end of session, `stop`, or a fatal
    /// error.
    ///
    /// Unrecognized lines are logged and skipped. Returns `Ok(())` after
    /// forwarding [`ControlMessage::EndOfSession`], when `stop` turns `true`
    /// or is dropped, or when `tx` is closed.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::PipeVanished`] if the pipe is deleted or replaced
    /// - [`MonitorError::PipeClosed`] on end of stream
    /// - [`MonitorError::Io`] on other read failures
    pub async fn run(mut self, tx: mpsc::Sender<ControlMessage>, mut stop: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *stop.borrow() {
                return Ok(());
            }

            let read = tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                read = timeout(self.read_timeout, self.lines.next_line()) => read,
            };

            match read {
                Err(_elapsed) => self.check_still_present()?,
                Ok(Ok(Some(line))) => match line.parse::<ControlMessage>() {
                    Ok(message) => {
                        let end = message == ControlMessage::EndOfSession;
                        info!("Control message: {:?}", message);
                        tokio::select! {
                            sent = tx.send(message) => {
                                if sent.is_err() {
                                    return Ok(());
                                }
                            }
                            // Stop only ever turns true
                            _ = stop.changed() => return Ok(()),
                        }
                        if end {
                            return Ok(());
                        }
                    }
                    Err(e) => warn!("Ignoring control line: {}", e),
                },
                Ok(Ok(None)) => return Err(MonitorError::PipeClosed(self.path.clone())),
                Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("Ignoring non UTF-8 control line: {}", e);
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn check_still_present(&self) -> Result<()> {
        match file_identity(&self.path) {
            Ok(identity) if identity == self.identity => Ok(()),
            Ok(_) => {
                warn!("Control pipe {} was replaced", self.path.display());
                Err(MonitorError::PipeVanished(self.path.clone()))
            }
            Err(MonitorError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(MonitorError::PipeVanished(self.path.clone()))
            }
            Err(e) => Err(e),
        }
    }
}

fn file_identity(path: &Path) -> Result<(u64, u64)> {
    let metadata = fs::metadata(path)?;
    Ok((metadata.dev(), metadata.ino()))
}
