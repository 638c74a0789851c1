//! Backend for the `log` facade: request lines and the startup banner go
//! to stdout, warnings and errors to stderr.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct StdLogger;

static LOGGER: StdLogger = StdLogger;

impl Log for StdLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
        let line = format!("{stamp} {:<5} {}", record.level(), record.args());
        if record.level() <= Level::Warn {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    fn flush(&self) {}
}

/// Installs the global logger. `WEBSERV_LOG=debug` raises the level.
pub fn init() {
    let level = match std::env::var("WEBSERV_LOG").ok().as_deref() {
        Some("trace") => LevelFilter::Trace,
        Some("debug") => LevelFilter::Debug,
        _ => LevelFilter::Info,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
