use anyhow::Result;
use std::env;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "expedite.log";

/// Console diagnostics follow `LOG_LEVEL` (default warn so they stay out of
/// the operator's way); the daily file under `log_dir` keeps debug detail.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::WARN,
        })
        .unwrap_or(Level::WARN);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env().add_directive(log_level.into()));

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(console).try_init()?;
        return Ok(None);
    };

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        dir,
        LOG_FILE_PREFIX,
    ));
    let file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("info,expedite=debug"));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;
    Ok(Some(guard))
}
