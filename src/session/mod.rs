//! # Session Module
//!
//! The session monitor: a small state machine driven by control messages.
//!
//! ```text
//! Idle --FilePair--> Armed --both tailers polled--> Streaming --eof--> Closed
//! ```
//!
//! The monitor owns the telemetry buffers, the two tail tasks and the render
//! scheduler. All the ways a run can end (an `eof` line, a shutdown request
//! from a signal handler, a fatal control pipe error) go through the same
//! teardown: stop the control reader and remove the pipe, stop the tailers,
//! then halt the renderer after a final frame.

use chrono::{DateTime, Local};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::control::{ControlMessage, ControlReader, PipeGuard};
use crate::error::{MonitorError, Result};
use crate::render::{RenderScheduler, Renderer};
use crate::tail::spawn_tail;
use crate::tail::tailer::TailStats;
use crate::telemetry::TelemetryBuffers;

/// Control messages buffered between the reader task and the monitor
const CONTROL_QUEUE_DEPTH: usize = 8;

/// Lifecycle of the monitored session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a file pair
    Idle,
    /// Tailers started, not all of them have read yet
    Armed,
    /// Both tailers are live
    Streaming,
    /// Torn down; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why the monitor closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `eof` received on the control pipe
    EndOfSession,
    /// Shutdown requested by the caller (signal)
    Cancelled,
    /// The control pipe failed
    Fatal,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub reason: CloseReason,
    pub pwm_path: Option<PathBuf>,
    pub acc_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Local>>,
    pub ended_at: DateTime<Local>,
    /// Whether both tailers went live before the end
    pub streamed: bool,
    pub pwm: TailStats,
    pub acc: TailStats,
    /// Frames handed to the renderer, including the final one
    pub frames: u64,
}

type ReadyFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Resources of the one live session
struct ActiveSession<R> {
    pwm_path: PathBuf,
    acc_path: PathBuf,
    started_at: DateTime<Local>,
    tail_stop: watch::Sender<bool>,
    pwm_task: JoinHandle<Result<TailStats>>,
    acc_task: JoinHandle<Result<TailStats>>,
    render_halt: watch::Sender<bool>,
    render_task: Option<JoinHandle<(R, u64)>>,
    ready: Option<ReadyFuture>,
}

enum Wake {
    Control(Option<ControlMessage>),
    Ready(bool),
    Cancelled,
}

/// Control channel session monitor
pub struct SessionMonitor<R> {
    config: Config,
    reader: Option<ControlReader>,
    pipe: Arc<PipeGuard>,
    buffers: TelemetryBuffers,
    renderer: Option<R>,
    state: watch::Sender<SessionState>,
}

impl<R: Renderer + 'static> SessionMonitor<R> {
    /// Opens the control pipe and prepares empty buffers.
    ///
    /// # Errors
    ///
    /// Fails fast if the pipe does not exist or is not a named pipe. Nothing
    /// is removed from the filesystem in that case.
    pub fn open(pipe_path: &Path, config: Config, renderer: R) -> Result<Self> {
        let reader = ControlReader::open(pipe_path, config.read_timeout())?;
        let (state, _) = watch::channel(SessionState::Idle);

        info!("Listening for sessions on {}", pipe_path.display());

        Ok(Self {
            buffers: TelemetryBuffers::new(config.buffer.window_secs),
            pipe: Arc::new(PipeGuard::new(pipe_path)),
            reader: Some(reader),
            config,
            renderer: Some(renderer),
            state,
        })
    }

    /// Handle to the stream buffers; stays valid after the run ends
    pub fn buffers(&self) -> TelemetryBuffers {
        self.buffers.clone()
    }

    /// Guard for the control pipe, shared with whoever else may need to
    /// clean up on exit
    pub fn pipe_guard(&self) -> Arc<PipeGuard> {
        Arc::clone(&self.pipe)
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Session state: {} -> {}", previous, next);
        }
    }

    /// Runs until `eof`, until `cancel` turns `true`, or until the control
    /// pipe fails. The control pipe is removed on every one of these paths.
    ///
    /// # Errors
    ///
    /// Returns the fatal control pipe error, after teardown, if the reader
    /// failed.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<SessionReport> {
        let (control_tx, mut control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (reader_stop, reader_stop_rx) = watch::channel(false);

        let reader = self
            .reader
            .take()
            .ok_or_else(|| MonitorError::Task("control reader already consumed".to_string()))?;
        let mut reader_task = Some(tokio::spawn(reader.run(control_tx, reader_stop_rx)));

        let mut session: Option<ActiveSession<R>> = None;
        let mut streamed = false;
        let mut fatal: Option<MonitorError> = None;

        let reason = loop {
            if *cancel.borrow() {
                break CloseReason::Cancelled;
            }

            let wake = tokio::select! {
                message = control_rx.recv() => Wake::Control(message),
                ok = wait_ready(&mut session) => Wake::Ready(ok),
                changed = cancel.changed() => {
                    if changed.is_ok() && !*cancel.borrow() {
                        continue;
                    }
                    Wake::Cancelled
                }
            };

            match wake {
                Wake::Control(Some(ControlMessage::FilePair { pwm_path, acc_path })) => {
                    if let Some(active) = &session {
                        warn!(
                            "Ignoring file pair {}, {}: session on {}, {} is still active",
                            pwm_path.display(),
                            acc_path.display(),
                            active.pwm_path.display(),
                            active.acc_path.display()
                        );
                        continue;
                    }
                    info!("Session files: pwm {}, acc {}", pwm_path.display(), acc_path.display());
                    session = Some(self.start_session(pwm_path, acc_path));
                    self.transition(SessionState::Armed);
                }
                Wake::Control(Some(ControlMessage::EndOfSession)) => {
                    info!("End of session received");
                    break CloseReason::EndOfSession;
                }
                Wake::Control(None) => {
                    // Reader finished without eof: it failed or was stopped
                    if let Some(task) = reader_task.take() {
                        fatal = match task.await {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(e),
                            Err(e) => Some(MonitorError::Task(format!("control reader: {}", e))),
                        };
                    }
                    break if fatal.is_some() { CloseReason::Fatal } else { CloseReason::Cancelled };
                }
                Wake::Ready(ok) => {
                    if let Some(active) = session.as_mut() {
                        active.ready = None;
                    }
                    if ok {
                        streamed = true;
                        self.transition(SessionState::Streaming);
                    } else {
                        warn!("A tailer stopped before its first read");
                    }
                }
                Wake::Cancelled => {
                    info!("Shutdown requested");
                    break CloseReason::Cancelled;
                }
            }
        };

        // Unblocks a reader still waiting for queue capacity
        drop(control_rx);

        let report = self.close(reason, session, reader_stop, reader_task, streamed).await;

        match fatal {
            Some(e) => {
                error!("Monitor failed: {}", e);
                Err(e)
            }
            None => Ok(report),
        }
    }

    fn start_session(&mut self, pwm_path: PathBuf, acc_path: PathBuf) -> ActiveSession<R> {
        let settings = self.config.tail_settings();
        let (tail_stop, tail_stop_rx) = watch::channel(false);
        let (pwm_ready_tx, pwm_ready) = oneshot::channel();
        let (acc_ready_tx, acc_ready) = oneshot::channel();

        let pwm_task = spawn_tail(
            pwm_path.clone(),
            self.buffers.pwm.clone(),
            settings,
            tail_stop_rx.clone(),
            pwm_ready_tx,
        );
        let acc_task = spawn_tail(
            acc_path.clone(),
            self.buffers.acc.clone(),
            settings,
            tail_stop_rx,
            acc_ready_tx,
        );

        let (render_halt, render_halt_rx) = watch::channel(false);
        let render_task = self.renderer.take().map(|renderer| {
            RenderScheduler::new(self.buffers.clone(), renderer, self.config.render.refresh_hz)
                .spawn(render_halt_rx)
        });

        let ready: ReadyFuture = Box::pin(async move { pwm_ready.await.is_ok() && acc_ready.await.is_ok() });

        ActiveSession {
            pwm_path,
            acc_path,
            started_at: Local::now(),
            tail_stop,
            pwm_task,
            acc_task,
            render_halt,
            render_task,
            ready: Some(ready),
        }
    }

    async fn close(
        &mut self,
        reason: CloseReason,
        session: Option<ActiveSession<R>>,
        reader_stop: watch::Sender<bool>,
        reader_task: Option<JoinHandle<Result<()>>>,
        streamed: bool,
    ) -> SessionReport {
        let _ = reader_stop.send(true);
        if let Some(task) = reader_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Control reader stopped with error during shutdown: {}", e),
                Err(e) => warn!("Control reader task failed: {}", e),
            }
        }

        // Nothing reads the pipe any more; a slow renderer below must not
        // delay its removal
        self.pipe.remove();

        let mut report = SessionReport {
            reason,
            pwm_path: None,
            acc_path: None,
            started_at: None,
            ended_at: Local::now(),
            streamed,
            pwm: TailStats::default(),
            acc: TailStats::default(),
            frames: 0,
        };

        if let Some(active) = session {
            // Tailers first so the final frame includes their last read
            let _ = active.tail_stop.send(true);
            report.pwm = join_tail("pwm", active.pwm_task).await;
            report.acc = join_tail("acc", active.acc_task).await;

            let _ = active.render_halt.send(true);
            if let Some(render_task) = active.render_task {
                report.frames = match render_task.await {
                    Ok((_, frames)) => frames,
                    Err(e) => {
                        warn!("Render scheduler failed: {}", e);
                        0
                    }
                };
            }

            report.pwm_path = Some(active.pwm_path);
            report.acc_path = Some(active.acc_path);
            report.started_at = Some(active.started_at);
        }

        report.ended_at = Local::now();
        self.transition(SessionState::Closed);

        info!(
            "Session closed ({:?}): pwm {} ingested / {} dropped, acc {} ingested / {} dropped, {} frames",
            report.reason,
            report.pwm.lines_ingested,
            report.pwm.lines_dropped,
            report.acc.lines_ingested,
            report.acc.lines_dropped,
            report.frames
        );

        report
    }
}

async fn wait_ready<R>(session: &mut Option<ActiveSession<R>>) -> bool {
    match session.as_mut().and_then(|active| active.ready.as_mut()) {
        Some(ready) => ready.await,
        None => std::future::pending().await,
    }
}

async fn join_tail(stream: &str, task: JoinHandle<Result<TailStats>>) -> TailStats {
    match task.await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            warn!("{} tailer failed: {}", stream, e);
            TailStats::default()
        }
        Err(e) => {
            warn!("{} tailer task failed: {}", stream, e);
            TailStats::default()
        }
    }
}
