//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise the configured level is the filter.
//! While the dashboard owns the terminal, logs should go to a file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::errors::DaemonError;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber, writing to `log_file` (appending) or stderr.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<(), DaemonError> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter(level))
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| DaemonError::Logging(e.to_string()))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter(level))
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| DaemonError::Logging(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitspy.log");
        // Another test may already own the global subscriber; either way a
        // second install must fail cleanly instead of panicking.
        let _ = init("info", Some(&path));
        assert!(matches!(init("info", None), Err(DaemonError::Logging(_))));
    }

    #[test]
    fn test_unopenable_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("bitspy.log");
        assert!(matches!(init("info", Some(&path)), Err(DaemonError::Io(_))));
    }
}
