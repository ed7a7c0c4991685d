use crate::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "linkcheck.log";

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured filter. Output goes to stdout, or to a
/// daily rotated file when a log directory is configured.
pub fn init(conf: &LogConfig) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&conf.filter));

    let (non_blocking_writer, guard) = match &conf.directory {
        Some(dir) => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_line_number(true)
                .with_ansi(conf.directory.is_none())
                .with_writer(non_blocking_writer),
        )
        .with(filter)
        .init();

    // Logs are flushed when the guard is dropped, so the caller must keep it alive.
    guard
}
