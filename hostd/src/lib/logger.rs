use crate::utils::*;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Writes every record to stderr, so that stdout stays free for the
/// dispatcher's job table.
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error    => { "error" },
            Level::Warn     => { "warn " },
            Level::Info     => { "info " },
            Level::Debug    => { "debug" },
            Level::Trace    => { "trace" },
        };
        // Losing a log line is no reason to bring the dispatcher down.
        let _ = writeln!(std::io::stderr().lock(), "[{}] {}", tag, record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Maps a `-v` count to a level filter.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0   => { LevelFilter::Warn },
        1   => { LevelFilter::Info },
        2   => { LevelFilter::Debug },
        _   => { LevelFilter::Trace },
    }
}

/// Installs the stderr logger. Can only succeed once per process.
pub fn init(verbosity: u8) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level_for(verbosity));

    Ok(())
}
