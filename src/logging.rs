use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

struct LocalTimer;

impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y%m%d %H:%M:%S"))
    }
}

/// Console on stderr plus an appending log file. RUST_LOG overrides the level.
pub fn init_logger(verbose: bool, log_path: &Path) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::Layer::new()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .without_time();

    let file_layer = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => Some(
            fmt::Layer::new()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_timer(LocalTimer)
                .boxed(),
        ),
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            None
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if verbose {
        info!("Showing VERBOSE output.");
    }
}

/// Logs the elapsed time of a scope when dropped.
pub struct Timer {
    tag: String,
    hidden: bool,
    start: Instant,
}

impl Timer {
    pub fn start(tag: impl Into<String>, hidden: bool) -> Self {
        Self {
            tag: tag.into(),
            hidden,
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.hidden {
            info!(
                "[timing] Elapsed time for {}: {:.6} s",
                self.tag,
                self.elapsed_secs()
            );
        }
    }
}

/// Announces where the log file lives after a long destructive run.
pub fn report_log_location(log_path: &Path) {
    if log_path.exists() {
        eprintln!("Details logged to: {}.", log_path.display());
    } else {
        warn!("Log file {} was not created.", log_path.display());
    }
}
