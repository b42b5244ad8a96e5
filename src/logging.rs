//! tracing subscriber setup
//!
//! Everything goes to a rolling file (JSON or text, plus ANSI stdout in text
//! mode). Events under the alert target are also written as JSON lines to a
//! separate, unrotated file, and stay enabled whatever `RUST_LOG` says.

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::{Directive, ParseError, Targets};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::relay::alert::ALERT_TARGET;

/// Keep alive until exit so both file writers flush
pub struct LogGuards {
    _main: WorkerGuard,
    _alerts: WorkerGuard,
}

/// Install the global subscriber
pub fn init_logging(config: &AppConfig) -> LogGuards {
    let (main_writer, main_guard) = tracing_appender::non_blocking(main_appender(config));
    let (alert_writer, alert_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::never(&config.log_dir, &config.alert_file),
    );

    let alert_layer = fmt::layer()
        .json()
        .with_writer(alert_writer)
        .with_ansi(false)
        .with_filter(Targets::new().with_target(ALERT_TARGET, Level::ERROR));
    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(alert_layer);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(main_writer)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(true)
            .with_writer(main_writer)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    LogGuards {
        _main: main_guard,
        _alerts: alert_guard,
    }
}

fn main_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    }
}

/// RUST_LOG wins over the configured level, except that alerts are never
/// filtered out
fn env_filter(config: &AppConfig) -> EnvFilter {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match alert_directive() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn alert_directive() -> Result<Directive, ParseError> {
    format!("{}=error", ALERT_TARGET).parse()
}
