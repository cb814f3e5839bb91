//! Process logger.
//!
//! Records go through an `env_logger` filter and end up either on stderr or, with a log file
//! configured, only in that file. Without `RUST_LOG` the configured level applies to every
//! target. With `RUST_LOG` set its directives decide, in both directions. The effective level is
//! the global `log` max level, which may be changed at any time with [`set_level`].

use crate::tracer::FileTracer;
use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};

const ENV_FILTER: &str = "RUST_LOG";

pub struct ServerLogger {
    inner: env_logger::Logger,
    file: Option<FileTracer>,
}

impl ServerLogger {
    pub fn new(file: Option<FileTracer>) -> Self {
        Self::with_filters(file, env_filters().as_deref())
    }

    fn with_filters(file: Option<FileTracer>, filters: Option<&str>) -> Self {
        let mut builder = env_logger::Builder::new();
        match filters {
            Some(filters) => builder.parse_filters(filters),
            None => builder.filter_level(LevelFilter::Trace),
        };
        Self {
            inner: builder.build(),
            file,
        }
    }
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match &self.file {
            Some(file) => file.line(&format!(
                "{} {:<5} {}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )),
            None => self.inner.log(record),
        }
    }

    fn flush(&self) {
        self.inner.flush()
    }
}

fn env_filters() -> Option<String> {
    std::env::var(ENV_FILTER)
        .ok()
        .filter(|filters| !filters.trim().is_empty())
}

/// Max level for a configured level and optional `RUST_LOG` directives.
fn effective_level(configured: LevelFilter, filters: Option<&str>) -> LevelFilter {
    match filters {
        Some(filters) => env_logger::Builder::new()
            .parse_filters(filters)
            .build()
            .filter(),
        None => configured,
    }
}

/// Install the process logger, with `file` records go there instead of stderr.
pub fn init(level: LevelFilter, file: Option<FileTracer>) -> anyhow::Result<()> {
    log::set_boxed_logger(Box::new(ServerLogger::new(file)))?;
    set_level(level);
    Ok(())
}

/// Change the configured level of an installed logger.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(effective_level(level, env_filters().as_deref()));
}
