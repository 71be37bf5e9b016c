//! # Render Module
//!
//! Hands buffer snapshots to a renderer at a steady cadence.
//!
//! The drawing itself is left to whatever implements [`Renderer`]; this
//! module only decides *when* a frame is taken and guarantees that a final
//! frame is delivered when the session ends.

pub mod sinks;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::telemetry::buffer::Snapshot;
use crate::telemetry::TelemetryBuffers;

/// Both stream snapshots taken back to back
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Zero-based frame counter
    pub sequence: u64,
    /// Set on the last frame of a session
    pub last: bool,
    pub pwm: Snapshot,
    pub acc: Snapshot,
}

impl Frame {
    /// Snapshots both buffers.
    ///
    /// Each buffer is copied under its own lock; the two streams are
    /// independent so no cross-stream consistency is implied.
    pub fn capture(buffers: &TelemetryBuffers, sequence: u64, last: bool) -> Self {
        Self {
            sequence,
            last,
            pwm: buffers.pwm.snapshot(),
            acc: buffers.acc.snapshot(),
        }
    }
}

/// Consumer of rendered frames
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send {
    /// Draw one frame. Snapshots may be empty before data arrives.
    fn render(&mut self, frame: &Frame);

    /// Called once, after the final `render`, when the session is over.
    fn session_complete(&mut self, _frame: &Frame) {}
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, frame: &Frame) {
        (**self).render(frame);
    }

    fn session_complete(&mut self, frame: &Frame) {
        (**self).session_complete(frame);
    }
}

/// Periodically pulls frames from the buffers
pub struct RenderScheduler<R> {
    buffers: TelemetryBuffers,
    renderer: R,
    period: Duration,
}

impl<R: Renderer + 'static> RenderScheduler<R> {
    /// Scheduler rendering `refresh_hz` frames per second (at least one).
    pub fn new(buffers: TelemetryBuffers, renderer: R, refresh_hz: u32) -> Self {
        Self {
            buffers,
            renderer,
            period: Duration::from_secs(1) / refresh_hz.max(1),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs on its own task until `halt` turns `true` or is dropped.
    ///
    /// The task resolves to the renderer and the number of frames produced,
    /// including the final one.
    pub fn spawn(self, halt: watch::Receiver<bool>) -> JoinHandle<(R, u64)> {
        tokio::spawn(self.run(halt))
    }

    async fn run(self, mut halt: watch::Receiver<bool>) -> (R, u64) {
        let Self { buffers, mut renderer, period } = self;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence = 0;

        debug!("Render scheduler started ({:?} period)", period);

        loop {
            if *halt.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let frame = Frame::capture(&buffers, sequence, false);
                    (renderer, _) = draw(renderer, frame, false).await;
                    sequence += 1;
                }
                changed = halt.changed() => {
                    if changed.is_err() || *halt.borrow() {
                        break;
                    }
                }
            }
        }

        let (renderer, frame) = draw(renderer, Frame::capture(&buffers, sequence, true), true).await;
        sequence += 1;

        info!(
            "Render scheduler stopped after {} frames (pwm {} samples, acc {} samples)",
            sequence,
            frame.pwm.len(),
            frame.acc.len()
        );

        (renderer, sequence)
    }
}

/// Hands one frame to the renderer on the blocking pool, so a sink that
/// blocks (a slow stdout consumer) never stalls the async workers.
///
/// A panic inside the renderer is re-raised on the scheduler task.
async fn draw<R: Renderer + 'static>(mut renderer: R, frame: Frame, complete: bool) -> (R, Frame) {
    let drawn = tokio::task::spawn_blocking(move || {
        renderer.render(&frame);
        if complete {
            renderer.session_complete(&frame);
        }
        (renderer, frame)
    })
    .await;

    match drawn {
        Ok(drawn) => drawn,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::sample::AccSample;
    use mockall::predicate::function;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::time::timeout;

    #[test]
    fn test_period_from_refresh_rate() {
        let buffers = TelemetryBuffers::new(2.0);
        let scheduler = RenderScheduler::new(buffers.clone(), MockRenderer::new(), 10);
        assert_eq!(scheduler.period(), Duration::from_millis(100));

        let clamped = RenderScheduler::new(buffers, MockRenderer::new(), 0);
        assert_eq!(clamped.period(), Duration::from_secs(1));
    }

    #[test]
    fn test_capture_empty_buffers() {
        let frame = Frame::capture(&TelemetryBuffers::new(2.0), 0, false);
        assert!(frame.pwm.is_empty());
        assert!(frame.acc.is_empty());
        assert_eq!(frame.pwm.columns.len(), 7);
        assert_eq!(frame.acc.columns.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renders_on_cadence_then_final_frame() {
        let buffers = TelemetryBuffers::new(2.0);
        buffers.acc.ingest(AccSample { t: 0.0, x: 1.0, y: 2.0, z: 3.0 }).unwrap();

        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .with(function(|frame: &Frame| !frame.last && frame.acc.len() == 1))
            .times(3)
            .return_const(());
        renderer
            .expect_render()
            .with(function(|frame: &Frame| frame.last))
            .times(1)
            .return_const(());
        renderer
            .expect_session_complete()
            .with(function(|frame: &Frame| frame.last && frame.sequence == 3))
            .times(1)
            .return_const(());

        let (halt_tx, halt_rx) = watch::channel(false);
        let handle = RenderScheduler::new(buffers, renderer, 10).spawn(halt_rx);

        // Ticks at 0, 100 and 200 ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        halt_tx.send(true).unwrap();

        let (mut renderer, frames) = handle.await.unwrap();
        assert_eq!(frames, 4);
        renderer.checkpoint();
    }

    /// Renderer that blocks its thread until released
    struct GatedRenderer {
        release: std::sync::mpsc::Receiver<()>,
        rendered: Arc<AtomicU64>,
    }

    impl Renderer for GatedRenderer {
        fn render(&mut self, _frame: &Frame) {
            let _ = self.release.recv_timeout(std::time::Duration::from_secs(5));
            self.rendered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_blocking_renderer_does_not_stall_runtime() {
        let (release_tx, release) = std::sync::mpsc::channel();
        let rendered = Arc::new(AtomicU64::new(0));
        let renderer = GatedRenderer { release, rendered: Arc::clone(&rendered) };

        let (halt_tx, halt_rx) = watch::channel(false);
        let handle = RenderScheduler::new(TelemetryBuffers::new(2.0), renderer, 10).spawn(halt_rx);

        // Single-threaded runtime: this only wakes up if the first render is
        // not holding the thread
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rendered.load(Ordering::SeqCst), 0, "First render should still be blocked");

        drop(release_tx);
        halt_tx.send(true).unwrap();
        let (_, frames) = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(rendered.load(Ordering::SeqCst), frames);
        assert!(frames >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_halt_sender_still_renders_final_frame() {
        let mut renderer = MockRenderer::new();
        renderer.expect_render().returning(|_| ());
        renderer.expect_session_complete().times(1).return_const(());

        let (halt_tx, halt_rx) = watch::channel(false);
        let handle = RenderScheduler::new(TelemetryBuffers::new(2.0), renderer, 20).spawn(halt_rx);
        drop(halt_tx);

        let (_, frames) = handle.await.unwrap();
        assert!(frames >= 1);
    }
}
