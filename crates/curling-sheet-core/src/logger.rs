//! Stderr logger used by the CLI.
//!
//! Lines read `+1.234s  INFO locate: message`, where the tag is the last
//! module of the log target, i.e. the stage that emitted it.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

struct StageLogger {
    max_level: LevelFilter,
    epoch: Instant,
}

impl StageLogger {
    fn stage<'a>(target: &'a str) -> &'a str {
        target.rsplit("::").next().unwrap_or(target)
    }
}

impl Log for StageLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "+{:.3}s {:>5} {}: {}\n",
            self.epoch.elapsed().as_secs_f64(),
            record.level(),
            Self::stage(record.target()),
            record.args()
        );
        // One write per record keeps lines from parallel images intact.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StageLogger> = OnceLock::new();

/// Install the stage logger. Later calls keep the first level and succeed.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut fresh = false;
    let logger = LOGGER.get_or_init(|| {
        fresh = true;
        StageLogger {
            max_level: level,
            epoch: Instant::now(),
        }
    });
    if fresh {
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`)
/// that reports stage spans when they close. `json` switches to flattened
/// JSON events.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    // An already installed global subscriber wins.
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(tracing_subscriber::fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
