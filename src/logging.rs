use std::path::PathBuf;
use std::sync::{Once, OnceLock};

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Structured logging backed by `tracing`.
///
/// Initializes a global subscriber once: ANSI stdout plus a daily-rotated
/// plain file under the platform data directory. Safe to call from tests
/// and from embedding applications that set up their own subscriber
/// first.

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn resolve_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("camwatch")
        .join("logs")
}

fn build_file_appender() -> Option<(RollingFileAppender, PathBuf)> {
    let log_dir = resolve_log_dir();
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "[camwatch][WARN] Failed to create log directory {}: {}",
            log_dir.display(),
            err
        );
        return None;
    }

    Some((
        RollingFileAppender::new(Rotation::DAILY, &log_dir, "camwatch.log"),
        log_dir,
    ))
}

pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let (file_layer, log_dir) = if let Some((appender, dir)) = build_file_appender() {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking);
            LOG_GUARD.set(guard).ok();
            (Some(layer), Some(dir))
        } else {
            (None, None)
        };

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| {
                EnvFilter::try_new(std::env::var("CAMWATCH_LOG").unwrap_or_else(|_| "info".into()))
            })
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let stdout_layer = fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339());

        let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);
        let initialized = if let Some(file_layer) = file_layer {
            registry.with(file_layer).try_init()
        } else {
            registry.try_init()
        };

        match (initialized, log_dir) {
            (Ok(()), Some(dir)) => info!(
                "Structured logging initialized, rotating daily under {}",
                dir.display()
            ),
            (Ok(()), None) => warn!("Structured logging initialized without file sink"),
            // Another subscriber is already installed, keep it.
            (Err(_), _) => {}
        }
    });
}
