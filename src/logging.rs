//! # Receiver Logging
//!
//! Process-wide logging configuration, established once before the event
//! loop starts and never mutated afterwards. The four verbosity gates map
//! onto `log` levels:
//!
//! | gate | level filter | typical content |
//! |---|---|---|
//! | silent | Error | fatal problems only |
//! | default | Warn | warnings (corrupt frames near a dead dongle, shell failures) |
//! | verbose | Info | configuration echo, device detection, link modes |
//! | debug | Debug | dropped telegrams, decrypt failures, frame dumps |
//!
//! Lines go to stdout, or to the logfile when one is configured.

use log::{LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Silent,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Silent => LevelFilter::Error,
            Verbosity::Normal => LevelFilter::Warn,
            Verbosity::Verbose => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

struct ReceiverLogger {
    logfile: Option<Mutex<File>>,
}

impl log::Log for ReceiverLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("({}) {}\n", record.target(), record.args());
        match &self.logfile {
            Some(file) => {
                if let Ok(mut f) = file.lock() {
                    let stamped = format!(
                        "{} {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        line
                    );
                    let _ = f.write_all(stamped.as_bytes());
                }
            }
            None => {
                let mut out = std::io::stdout();
                let _ = out.write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceCell<ReceiverLogger> = OnceCell::new();

/// Install the process logger. Called exactly once, before the loop starts.
pub fn init(verbosity: Verbosity, logfile: Option<PathBuf>) -> Result<(), String> {
    let file = match logfile {
        Some(path) => Some(Mutex::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| format!("could not open log file {}: {e}", path.display()))?,
        )),
        None => None,
    };
    let logger = LOGGER.get_or_init(|| ReceiverLogger { logfile: file });
    // set_logger fails only when a logger is already installed, which in
    // tests just means an earlier test got there first
    let _ = log::set_logger(logger);
    log::set_max_level(verbosity.level_filter());
    Ok(())
}

/// Rate limiter for log lines that a broken radio can emit at wire speed.
#[derive(Debug)]
pub struct LogThrottle {
    window_ms: u64,
    cap: u32,
    count: u32,
    t0: Instant,
}

impl LogThrottle {
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            t0: Instant::now(),
        }
    }

    /// Returns true if the caller should emit its log line.
    pub fn allow(&mut self) -> bool {
        let elapsed_ms = self.t0.elapsed().as_millis() as u64;
        if elapsed_ms > self.window_ms {
            self.t0 = Instant::now();
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(Verbosity::Silent.level_filter(), LevelFilter::Error);
        assert_eq!(Verbosity::Normal.level_filter(), LevelFilter::Warn);
        assert_eq!(Verbosity::Verbose.level_filter(), LevelFilter::Info);
        assert_eq!(Verbosity::Debug.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn test_throttle_caps_within_window() {
        let mut throttle = LogThrottle::new(60_000, 3);
        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(!throttle.allow());
        assert!(!throttle.allow());
    }
}
