//! # Control Pipe
//!
//! Filesystem side of the control channel: checking, creating, opening and
//! removing the named pipe.

use nix::sys::stat::Mode;
use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::unix::pipe;
use tracing::{info, warn};

use crate::error::{MonitorError, Result};

/// Permissions for a freshly created pipe (before umask)
const PIPE_MODE: u32 = 0o666;

/// Checks that `path` exists and is a named pipe.
///
/// # Errors
///
/// - [`MonitorError::PipeNotFound`] if nothing exists at `path`
/// - [`MonitorError::NotAFifo`] if `path` is some other kind of file
pub fn ensure_pipe(path: &Path) -> Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MonitorError::PipeNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    if !metadata.file_type().is_fifo() {
        return Err(MonitorError::NotAFifo(path.to_path_buf()));
    }
    Ok(())
}

/// Creates a named pipe at `path`, replacing a stale pipe left behind by an
/// earlier run.
///
/// # Errors
///
/// - [`MonitorError::NotAFifo`] if `path` exists and is not a pipe; it is
///   never removed
/// - [`MonitorError::Io`] if the pipe cannot be removed or created
pub fn create_pipe(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_fifo() => {
            fs::remove_file(path)?;
            info!("Removed stale pipe {}", path.display());
        }
        Ok(_) => return Err(MonitorError::NotAFifo(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    nix::unistd::mkfifo(path, Mode::from_bits_truncate(PIPE_MODE)).map_err(io::Error::from)?;
    info!("Created pipe {}", path.display());
    Ok(())
}

/// Opens the read side of the pipe without blocking.
///
/// The pipe is opened read-write so that the writer closing its end does not
/// produce end-of-file; the reader keeps waiting for the next writer.
///
/// Must be called from within a Tokio runtime.
pub fn open_receiver(path: &Path) -> Result<pipe::Receiver> {
    ensure_pipe(path)?;
    let receiver = pipe::OpenOptions::new().read_write(true).open_receiver(path)?;
    Ok(receiver)
}

/// Removes the control pipe from the filesystem at most once.
///
/// Shared between the normal end-of-session path and signal-driven
/// shutdown. Also removes the pipe on drop if nobody did so yet.
#[derive(Debug)]
pub struct PipeGuard {
    path: PathBuf,
    removed: AtomicBool,
}

impl PipeGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`remove`](Self::remove) already ran
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Deletes the pipe. Returns `true` only for the call that did the work.
    ///
    /// A pipe that is already gone is not an error.
    pub fn remove(&self) -> bool {
        if self.removed.swap(true, Ordering::SeqCst) {
            return false;
        }

        match fs::remove_file(&self.path) {
            Ok(()) => info!("{} deleted", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", self.path.display(), e),
        }
        true
    }
}

impl Drop for PipeGuard {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_pipe_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctl");

        match ensure_pipe(&path) {
            Err(MonitorError::PipeNotFound(p)) => assert_eq!(p, path),
            other => panic!("Expected PipeNotFound, got: {:?}", other),
        }
    }

    #[test]
    fn test_ensure_pipe_rejects_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctl");
        fs::write(&path, "").unwrap();

        assert!(matches!(ensure_pipe(&path), Err(MonitorError::NotAFifo(_))));
    }

    #[test]
    fn test_create_pipe_and_replace_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctl");

        create_pipe(&path).unwrap();
        ensure_pipe(&path).unwrap();

        // Second run replaces the leftover pipe
        create_pipe(&path).unwrap();
        ensure_pipe(&path).unwrap();
    }

    #[test]
    fn test_create_pipe_refuses_to_clobber_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctl");
        fs::write(&path, "keep me").unwrap();

        assert!(matches!(create_pipe(&path), Err(MonitorError::NotAFifo(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn test_guard_removes_exactly_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctl");
        create_pipe(&path).unwrap();

        let guard = Arc::new(PipeGuard::new(&path));
        let removals: usize = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.remove())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();

        assert_eq!(removals, 1, "Only one caller may perform the removal");
        assert!(guard.is_removed());
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctl");
        create_pipe(&path).unwrap();

        drop(PipeGuard::new(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_tolerates_missing_pipe() {
        let dir = TempDir::new().unwrap();
        let guard = PipeGuard::new(dir.path().join("never-created"));
        assert!(guard.remove());
        assert!(!guard.remove());
    }

    #[tokio::test]
    async fn test_open_receiver_requires_fifo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctl");
        assert!(matches!(open_receiver(&path), Err(MonitorError::PipeNotFound(_))));

        create_pipe(&path).unwrap();
        assert!(open_receiver(&path).is_ok());
    }
}
