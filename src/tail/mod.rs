//! # Tail Module
//!
//! Follows a growing log file and feeds it into a telemetry buffer.
//!
//! This module handles:
//! - Incremental, line-accurate reads of append-only files ([`tailer`])
//! - Rate-limited filesystem change notifications ([`notifier`])
//! - The background task that ties the two together, with a periodic rescan
//!   in case a watch event is missed and a final read on shutdown

pub mod notifier;
pub mod tailer;

use std::path::PathBuf;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::telemetry::buffer::SharedBuffer;
use crate::telemetry::sample::Schema;
use notifier::ChangeNotifier;
use tailer::{FileTailer, TailStats};

/// Timing for one tail task
#[derive(Debug, Clone, Copy)]
pub struct TailSettings {
    /// Upper bound on change-triggered reads per second
    pub max_frequency: f64,
    /// Unconditional poll period
    pub rescan_interval: Duration,
}

/// Spawns a tail task for `path` feeding `buffer`.
///
/// `ready` fires after the first successful poll. The task runs until
/// `shutdown` turns `true` (or its sender is dropped), then reads once more
/// to pick up lines written right before the stop, and returns its counters.
///
/// If the file cannot be watched, the task logs a warning and relies on the
/// periodic rescan alone.
pub fn spawn_tail<S: Schema>(
    path: PathBuf,
    buffer: SharedBuffer<S>,
    settings: TailSettings,
    shutdown: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) -> JoinHandle<Result<TailStats>> {
    let notifier = match ChangeNotifier::watch(&path, settings.max_frequency) {
        Ok(notifier) => Some(notifier),
        Err(e) => {
            warn!(
                "{}: cannot watch {} ({}), falling back to polling every {:?}",
                S::STREAM,
                path.display(),
                e,
                settings.rescan_interval
            );
            None
        }
    };
    let tailer = FileTailer::new(path, buffer);

    tokio::spawn(run_tail(tailer, notifier, settings.rescan_interval, shutdown, ready))
}

enum Wake {
    Changed,
    WatchEnded,
    Rescan,
    Shutdown,
}

async fn run_tail<S: Schema>(
    mut tailer: FileTailer<S>,
    mut notifier: Option<ChangeNotifier>,
    rescan_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) -> Result<TailStats> {
    let mut ready = Some(ready);
    let mut rescan = interval(rescan_interval);
    rescan.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("{}: tailing {}", S::STREAM, tailer.path().display());

    loop {
        if *shutdown.borrow() {
            break;
        }

        let wake = tokio::select! {
            changed = next_change(&mut notifier) => {
                if changed.is_some() { Wake::Changed } else { Wake::WatchEnded }
            }
            _ = rescan.tick() => Wake::Rescan,
            _ = shutdown.changed() => Wake::Shutdown,
        };

        match wake {
            Wake::Changed | Wake::Rescan => {
                tailer = poll_once(tailer, &mut ready).await?;
            }
            Wake::WatchEnded => {
                warn!("{}: watch ended, polling only", S::STREAM);
                notifier = None;
            }
            Wake::Shutdown => break,
        }
    }

    tailer = poll_once(tailer, &mut ready).await?;
    let stats = tailer.stats();
    info!(
        "{}: stopped tailing {} ({} ingested, {} dropped, {} polls)",
        S::STREAM,
        tailer.path().display(),
        stats.lines_ingested,
        stats.lines_dropped,
        stats.polls
    );
    Ok(stats)
}

async fn next_change(notifier: &mut Option<ChangeNotifier>) -> Option<()> {
    match notifier {
        Some(notifier) => notifier.changed().await,
        None => std::future::pending().await,
    }
}

/// Runs one blocking poll off the async workers.
async fn poll_once<S: Schema>(
    mut tailer: FileTailer<S>,
    ready: &mut Option<oneshot::Sender<()>>,
) -> Result<FileTailer<S>> {
    let (tailer, result) = tokio::task::spawn_blocking(move || {
        let result = tailer.poll();
        (tailer, result)
    })
    .await
    .map_err(|e| MonitorError::Task(format!("{} tailer: {}", S::STREAM, e)))?;

    match result {
        Ok(outcome) => {
            if outcome.lines > 0 {
                debug!("{}: +{} samples", S::STREAM, outcome.ingested);
            }
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }
        }
        Err(e) => warn!("{}: failed to read {}: {}", S::STREAM, tailer.path().display(), e),
    }

    Ok(tailer)
}
