use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

use crate::error::{Error, Result};

const ENV_DEBUG: &str = "BATCHFLOW_DEBUG";

/// Text of a panic payload, panics carry either a `&str` or a formatted `String`.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Panic hook that reports the panic through `tracing`, so a panicking transform on a worker thread
/// shows up as one structured log line naming the thread.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    let message = panic_message(panic_info.payload());
    let current = std::thread::current();
    let thread = current.name().unwrap_or("unnamed");
    let location = panic_info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_default();

    // only captured when RUST_BACKTRACE or RUST_LIB_BACKTRACE is set
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        tracing::error!(thread, %location, %backtrace, "Panicked: {message}");
    } else {
        tracing::error!(thread, %location, "Panicked: {message}");
    }
}

/// Installs the global tracing subscriber. RUST_LOG can be used to set the log level, the default is
/// `info`. Logs are flattened JSON unless `BATCHFLOW_DEBUG=true`, which switches to human readable
/// text at `debug`.
pub fn try_register() -> Result<()> {
    let debug_mode = std::env::var(ENV_DEBUG).is_ok_and(|v| v.to_lowercase() == "true");
    let default_log_level = if debug_mode { "debug" } else { "info" };

    let filter = EnvFilter::builder()
        .with_default_directive(default_log_level.parse().unwrap_or(Level::INFO.into()))
        .from_env_lossy();

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))?;

    std::panic::set_hook(Box::new(report_panic));
    Ok(())
}

/// Same as [try_register], but a subscriber that is already installed is left in place.
pub fn register() {
    if let Err(e) = try_register() {
        tracing::warn!(?e, "Tracing is already configured");
    }
}
