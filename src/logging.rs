use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the tracing subscriber: stderr output filtered by `RUST_LOG`
/// (default `info`), plus a daily-rotated file sink under the platform data
/// directory when one can be resolved. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = log_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        let appender = tracing_appender::rolling::daily(dir, "digimaint.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        FILE_GUARD.set(guard).ok()?;
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init();
}

fn log_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DIGIMAINT_LOG_DIR") {
        return Some(PathBuf::from(dir));
    }
    dirs::data_dir().map(|base| base.join("digimaint").join("logs"))
}
