//! # Telemetry Monitor
//!
//! Follows the telemetry logs of a device session and feeds them to a live
//! plot.
//!
//! The device-side logger writes `<pwm_log>,<acc_log>` to the control pipe
//! when it starts a session and `eof` when it stops. This binary tails both
//! logs in between and renders a sliding window of samples.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use telemetry_monitor::config::{Config, LoggingConfig};
use telemetry_monitor::control::pipe::create_pipe;
use telemetry_monitor::render::sinks::{JsonLinesRenderer, LogRenderer, NullRenderer};
use telemetry_monitor::render::Renderer;
use telemetry_monitor::session::SessionMonitor;

/// Where rendered frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RendererKind {
    /// Periodic summary in the log
    Log,
    /// One JSON frame per line on stdout
    Json,
    /// Discard frames
    None,
}

/// Tail device telemetry logs announced over a named pipe
#[derive(Debug, Parser)]
#[command(name = "telemetry-monitor", author, version, about, long_about = None)]
struct Cli {
    /// Control pipe the device logger writes session announcements to
    pipe: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Create (or recreate) the control pipe before listening
    #[arg(long)]
    create_pipe: bool,

    /// Frame output
    #[arg(short, long, value_enum, default_value_t = RendererKind::Log)]
    renderer: RendererKind,
}

/// Termination signals that trigger a clean shutdown
struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
    quit: Signal,
}

impl ShutdownSignals {
    /// Registers the handlers immediately, so a signal arriving before the
    /// first `recv` is not lost to the default (exit without cleanup).
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}

fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // stdout may carry JSON frames, so logs go to stderr
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = if config.file.is_empty() {
        (None, None)
    } else {
        let path = PathBuf::from(&config.file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let name = path
            .file_name()
            .with_context(|| format!("log file {} has no file name", config.file))?;
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Main entry point
///
/// # Control Flow
///
/// 1. Parse arguments, load configuration, set up logging
/// 2. Install termination signal handlers
/// 3. Open the control pipe (fails fast if it does not exist)
/// 4. Run the session monitor until `eof`, a signal, or a pipe failure
/// 5. Make sure the control pipe is gone, whichever way the run ended
///
/// # Errors
///
/// Exits non-zero if the configuration is invalid, the pipe is missing or
/// not a pipe, or the pipe vanishes mid-run.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    let _log_guard = init_logging(&config.logging)?;

    info!("Telemetry Monitor v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut signals = ShutdownSignals::install().context("installing signal handlers")?;

    if cli.create_pipe {
        create_pipe(&cli.pipe).with_context(|| format!("creating pipe {}", cli.pipe.display()))?;
    }

    let renderer: Box<dyn Renderer> = match cli.renderer {
        RendererKind::Log => Box::new(LogRenderer::new()),
        RendererKind::Json => Box::new(JsonLinesRenderer::new(std::io::stdout())),
        RendererKind::None => Box::new(NullRenderer),
    };

    let monitor = SessionMonitor::open(&cli.pipe, config, renderer)
        .with_context(|| format!("opening control pipe {}", cli.pipe.display()))?;
    let pipe_guard = monitor.pipe_guard();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        let name = signals.recv().await;
        info!("Received {}, shutting down...", name);
        let _ = cancel_tx.send(true);

        // Further signals while tearing down are only logged
        loop {
            let name = signals.recv().await;
            warn!("Received {} during shutdown, already cleaning up", name);
        }
    });

    let result = monitor.run(cancel_rx).await;
    pipe_guard.remove();

    let report = result?;
    info!(
        "Exit telemetry monitor ({:?}, {} frames rendered)",
        report.reason, report.frames
    );

    Ok(())
}
