use std::fs::File;
use std::io::Write;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use parking_lot::Mutex;

/// Copy of the log output, set once the command line is parsed
static LOG_FILE: Mutex<Option<File>> = parking_lot::const_mutex(None);

struct ClashLogger {
    start: Instant,
}

impl Log for ClashLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let _ = writeln!(std::io::stderr(), "[{}] {}", record.level(), record.args());

        if let Some(ref mut file) = *LOG_FILE.lock() {
            let elapsed = self.start.elapsed().as_secs_f64();
            let _ = writeln!(
                file,
                "[{elapsed:.3}s] [{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
        if let Some(ref mut file) = *LOG_FILE.lock() {
            let _ = file.flush();
        }
    }
}

/// Level used when `RUST_LOG` is unset or unparsable.
#[must_use]
pub fn default_filter(verbose: bool) -> LevelFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
}

/// Install the global logger before anything is known about the command line.
///
/// Messages are filtered by `RUST_LOG` (default info) until [`configure`] is called.
///
/// # Errors
///
/// Returns `SetLoggerError` if a logger was already installed.
pub fn init() -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(ClashLogger {
        start: Instant::now(),
    }))?;
    log::set_max_level(default_filter(false));
    Ok(())
}

/// Apply `--verbose` and `--log-file`. Only messages logged from here on reach the file.
pub fn configure(verbose: bool, log_file: Option<File>) {
    log::set_max_level(default_filter(verbose));
    *LOG_FILE.lock() = log_file;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        temp_env::with_var_unset("RUST_LOG", || {
            assert_eq!(default_filter(false), LevelFilter::Info);
            assert_eq!(default_filter(true), LevelFilter::Debug);
        });
        temp_env::with_var("RUST_LOG", Some("warn"), || {
            assert_eq!(default_filter(true), LevelFilter::Warn);
        });
        temp_env::with_var("RUST_LOG", Some("nonsense"), || {
            assert_eq!(default_filter(false), LevelFilter::Info);
        });
    }
}
