//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{MakeWriter, TestWriter};

/// Output format for the global logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    HumanReadable,
    Compact,
    Json,
}

/// Configure the global tracing subscriber.
///
/// `default_level` is used when `RUST_LOG` isn't set. Errors from setting the
/// global subscriber more than once are ignored.
pub fn configure_global_logger<W>(default_level: Level, format: LogFormat, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(default_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    let _ = match format {
        LogFormat::HumanReadable => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Initialize a logger for tests.
///
/// Output is captured by the test harness.
pub fn init_test() {
    configure_global_logger(Level::DEBUG, LogFormat::HumanReadable, TestWriter::new());
}
