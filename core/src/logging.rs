use crate::config::LogTarget;
use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;

/// Install the global subscriber.
///
/// File logging returns the writer guard; keep it alive until exit or
/// buffered lines are lost. A subscriber installed earlier is left in place.
pub fn init_tracing(target: LogTarget) -> Result<Option<WorkerGuard>> {
    let level = resolve_log_level(std::env::var("RUST_LOG").ok().as_deref());

    let guard = match target {
        LogTarget::Stderr => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
        LogTarget::Directory(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(&dir, "sysproxy");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(non_blocking)
                .try_init();
            Some(guard)
        }
    };

    tracing::info!("sysproxy initialized v{}", crate::VERSION);
    Ok(guard)
}

fn resolve_log_level(value: Option<&str>) -> LevelFilter {
    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => LevelFilter::TRACE,
        Some("debug") => LevelFilter::DEBUG,
        Some("warn") | Some("warning") => LevelFilter::WARN,
        Some("error") => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}
