//! # Debounced Change Notifier
//!
//! Turns raw filesystem notifications for one file into a rate-limited
//! stream of "file changed" signals.
//!
//! The `notify` watcher is placed on the file's parent directory so a file
//! that is created after the session announcement is still seen. Events are
//! filtered down to the target file name and forwarded from the watcher
//! thread over a small bounded channel; if the channel is full the event is
//! dropped, which is harmless since the tailer reads everything new on the
//! next accepted event anyway.
//!
//! ## Debounce
//!
//! An event is accepted only if at least `1 / max_frequency` has passed since
//! the previous accepted event. Everything in between is discarded.

use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{MonitorError, Result};

/// Pending raw events buffered between the watcher thread and the tail task
const EVENT_QUEUE_DEPTH: usize = 16;

/// Minimum-interval gate for change events
#[derive(Debug, Clone)]
pub struct Debouncer {
    min_interval: Duration,
    last_triggered: Option<Instant>,
}

impl Debouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_triggered: None,
        }
    }

    /// Debouncer accepting at most `max_frequency` events per second.
    ///
    /// Non-positive frequencies disable debouncing.
    pub fn from_max_frequency(max_frequency: f64) -> Self {
        if max_frequency > 0.0 {
            Self::new(Duration::from_secs_f64(1.0 / max_frequency))
        } else {
            Self::new(Duration::ZERO)
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns `true` and records `now` if the event should fire.
    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last_triggered {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last_triggered = Some(now);
                true
            }
        }
    }
}

/// Debounced change signals for a single file
pub struct ChangeNotifier {
    path: PathBuf,
    events: mpsc::Receiver<()>,
    debouncer: Debouncer,
    // Dropping the watcher unregisters the watch
    _watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("path", &self.path)
            .field("debouncer", &self.debouncer)
            .finish_non_exhaustive()
    }
}

impl ChangeNotifier {
    /// Starts watching `path` for modifications.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Watch`] if the parent directory cannot be
    /// watched (for example because it does not exist).
    pub fn watch(path: &Path, max_frequency: f64) -> Result<Self> {
        let file_name: OsString = path
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                MonitorError::Watch(notify::Error::generic(&format!(
                    "{} has no file name",
                    path.display()
                )))
            })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let target = path.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let is_change = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
                let is_target = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if is_change && is_target {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => warn!("Watch error for {}: {}", target.display(), e),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        debug!("Watching {} (via {})", path.display(), dir.display());

        Ok(Self {
            path: path.to_path_buf(),
            events: rx,
            debouncer: Debouncer::from_max_frequency(max_frequency),
            _watcher: Some(watcher),
        })
    }

    /// Notifier driven by an arbitrary event source instead of the filesystem.
    pub fn from_events(path: impl Into<PathBuf>, events: mpsc::Receiver<()>, debouncer: Debouncer) -> Self {
        Self {
            path: path.into(),
            events,
            debouncer,
            _watcher: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next event that passes the debouncer.
    ///
    /// Returns `None` once the event source is gone.
    pub async fn changed(&mut self) -> Option<()> {
        loop {
            self.events.recv().await?;
            if self.debouncer.accept(Instant::now()) {
                return Some(());
            }
            trace!("Debounced change event for {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::time::timeout;

    #[test]
    fn test_debouncer_interval_from_frequency() {
        let debouncer = Debouncer::from_max_frequency(20.0);
        assert_eq!(debouncer.min_interval(), Duration::from_millis(50));

        let disabled = Debouncer::from_max_frequency(0.0);
        assert_eq!(disabled.min_interval(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_accepts_after_interval() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(debouncer.accept(start), "First event always fires");
        assert!(!debouncer.accept(start + Duration::from_millis(10)));
        assert!(!debouncer.accept(start + Duration::from_millis(99)));
        assert!(debouncer.accept(start + Duration::from_millis(100)));
        assert!(!debouncer.accept(start + Duration::from_millis(150)));
        assert!(debouncer.accept(start + Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_exactly_once() {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let mut notifier = ChangeNotifier::from_events(
            "burst.log",
            rx,
            Debouncer::new(Duration::from_millis(100)),
        );

        for _ in 0..10 {
            tx.try_send(()).unwrap();
        }

        assert_eq!(notifier.changed().await, Some(()));
        assert!(
            timeout(Duration::from_millis(50), notifier.changed()).await.is_err(),
            "Rest of the burst must be swallowed"
        );

        tokio::time::advance(Duration::from_millis(100)).await;
        tx.try_send(()).unwrap();
        assert_eq!(notifier.changed().await, Some(()));
    }

    #[tokio::test]
    async fn test_closed_source_ends_stream() {
        let (tx, rx) = mpsc::channel(1);
        let mut notifier = ChangeNotifier::from_events("gone.log", rx, Debouncer::from_max_frequency(10.0));
        drop(tx);
        assert_eq!(notifier.changed().await, None);
    }

    #[tokio::test]
    async fn test_watch_missing_directory_fails() {
        let result = ChangeNotifier::watch(Path::new("/nonexistent_dir_12345/acc.log"), 10.0);
        assert!(matches!(result, Err(MonitorError::Watch(_))));
    }

    #[tokio::test]
    async fn test_watch_sees_appends_to_target_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("acc.log");
        let other = dir.path().join("pwm.log");
        let mut notifier = ChangeNotifier::watch(&target, 1000.0).unwrap();

        std::fs::write(&other, "0,0,0,0,0,0,0\n").unwrap();
        assert!(
            timeout(Duration::from_millis(300), notifier.changed()).await.is_err(),
            "Changes to sibling files must be filtered out"
        );

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .unwrap();
        file.write_all(b"0.0,1,2,3\n").unwrap();
        file.flush().unwrap();

        let fired = timeout(Duration::from_secs(5), notifier.changed()).await;
        assert_eq!(fired.unwrap(), Some(()));
        assert_eq!(notifier.path(), target.as_path());
    }
}
