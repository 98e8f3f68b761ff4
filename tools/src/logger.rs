use log::{Level, Log, Metadata, Record};

/// Writes log records to stderr as `LEVEL target: message`.
struct StderrLogger {
    level: Level,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{:<5} {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Maps the number of `-v` flags to a level, starting at warnings.
pub fn level_for(verbosity: u64) -> Level {
    match verbosity {
        0 => Level::Warn,
        1 => Level::Info,
        2 => Level::Debug,
        _ => Level::Trace,
    }
}

/// Installs the stderr logger. Calling it twice keeps the first logger.
pub fn init(verbosity: u64) {
    let level = level_for(verbosity);
    let logger = Box::new(StderrLogger { level });
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level.to_level_filter());
    }
}
