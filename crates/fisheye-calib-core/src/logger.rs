//! Logging setup for binaries and tests.
//!
//! Library code only talks to the `log` facade (and `tracing` spans under the
//! `tracing` feature). Binaries pick a backend: [`init_with_level`] installs a
//! plain stderr logger printing `[  1.234s  INFO fisheye_calib::session] msg`,
//! [`init_tracing`] installs a `tracing-subscriber` formatter.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let secs = self.started.elapsed().as_secs_f64();
            let line = format!("[{secs:7.3}s {:>5} {}] {}\n", record.level(), record.target(), record.args());
            let _ = std::io::stderr().lock().write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static STDERR_LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger at `level`.
///
/// Only the first call installs anything; later calls return `Ok(())` and
/// keep the original level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let fresh = STDERR_LOGGER
        .set(StderrLogger {
            level,
            started: Instant::now(),
        })
        .is_ok();
    match STDERR_LOGGER.get() {
        Some(logger) if fresh => {
            log::set_logger(logger)?;
            log::set_max_level(level);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// `json` switches to one flattened JSON object per event; otherwise events
/// are human readable with uptime stamps. Span close events carry timings.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    use tracing_subscriber::fmt::{self, format::FmtSpan};
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let builder = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_span_events(FmtSpan::CLOSE);
    // A subscriber may already be installed, e.g. by a test harness.
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.with_timer(fmt::time::Uptime::default()).finish().try_init()
    };
}
