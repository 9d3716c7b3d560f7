use crate::env;
use console::style;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;
use std::io::{IsTerminal, Write};

struct Logger {
    level: LevelFilter,
    /// stderr is a terminal: short colored lines. Otherwise (the monitor log)
    /// timestamped plain lines.
    term: bool,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.level() > self.level {
            return false;
        }
        // dependencies only get a say at info and above
        metadata.level() <= Level::Info || metadata.target().starts_with("tunnelkeeper")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = if self.term {
            format!("{} {}", styled_level(record.level()), record.args())
        } else {
            format!(
                "{} {:<5} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        };
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn styled_level(level: Level) -> String {
    let name = level.to_string().to_lowercase();
    let prefix = match level {
        Level::Error => style(name).red().bold(),
        Level::Warn => style(name).yellow().bold(),
        Level::Info => style(name).cyan(),
        Level::Debug => style(name).magenta(),
        Level::Trace => style(name).dim(),
    };
    format!("{} {prefix}", style("tunnelkeeper").dim())
}

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger {
    level: *env::TUNNELKEEPER_LOG,
    term: std::io::stderr().is_terminal(),
});

pub fn init() {
    if let Err(err) = log::set_logger(&*LOGGER).map(|()| log::set_max_level(LOGGER.level)) {
        eprintln!("tunnelkeeper: could not initialize logger: {err}");
    }
}
