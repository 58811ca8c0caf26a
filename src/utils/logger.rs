//! Logging setup

use crate::Result;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Initialize tracing with a console layer and a daily-rotated file layer.
///
/// `RUST_LOG` overrides `log_level` when set.
pub fn init<P: AsRef<Path>>(log_level: &str, log_file: P) -> Result<()> {
    if let Some(parent) = log_file.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_file.as_ref().parent().unwrap_or(Path::new(".")),
        log_file
            .as_ref()
            .file_name()
            .unwrap_or(std::ffi::OsStr::new("spot-arb.log")),
    );

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Log one trade outcome with structured fields
#[macro_export]
macro_rules! log_trade {
    ($level:ident, $trade_id:expr, $symbol:expr, $status:expr, $($field:tt)*) => {
        tracing::$level!(
            trade_id = %$trade_id,
            symbol = %$symbol,
            status = %$status,
            $($field)*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_logger_init_creates_log_file() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("test.log");

        init("info", &log_file).unwrap();
        tracing::info!("logger smoke test");

        // Daily rotation appends the date to the file name
        let rotated_exists = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().starts_with("test.log"));
        assert!(rotated_exists);
    }
}
