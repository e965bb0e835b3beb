use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub const DEFAULT_ERROR_LOG_PATH: &str = "/tmp/error_log.txt";

/// Best-effort append-only record of failed outbound calls.
///
/// Falls back to stderr when the file cannot be opened. Write failures are ignored.
pub struct ErrorLog {
    sink: Mutex<Box<dyn Write + Send>>,
    path: Option<PathBuf>,
}

impl ErrorLog {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self {
                sink: Mutex::new(Box::new(file)),
                path: Some(path.to_path_buf()),
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open error log, using stderr");
                Self::stderr()
            }
        }
    }

    pub fn stderr() -> Self {
        Self {
            sink: Mutex::new(Box::new(io::stderr())),
            path: None,
        }
    }

    /// File backing the log, `None` when writing to stderr.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, message: &str) {
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        let _ = writeln!(sink, "{} ERROR: {}", Utc::now().to_rfc3339(), message);
        let _ = sink.flush();
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::open(DEFAULT_ERROR_LOG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_records_are_appended() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("errors.txt");

        let log = ErrorLog::open(&path);
        log.record("first failure");
        log.record("second failure");
        assert_eq!(log.path(), Some(path.as_path()));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("ERROR: first failure"));
        assert!(lines[1].ends_with("ERROR: second failure"));
    }

    #[test]
    fn test_unopenable_path_falls_back_to_stderr() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("missing-dir").join("errors.txt");

        let log = ErrorLog::open(&path);
        assert!(log.path().is_none());
        log.record("goes to stderr");
        assert!(!path.exists());
    }
}
