//! Transcript logging.
//!
//! Appends chat lines to a user-chosen file, toggled from the interactive
//! surface. This is separate from diagnostic logging, which goes through
//! `tracing`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub struct LoggingState {
    file_path: Option<String>,
    is_active: bool,
}

impl LoggingState {
    pub fn new(log_file: Option<String>) -> Self {
        let is_active = log_file.is_some();
        LoggingState {
            file_path: log_file,
            is_active,
        }
    }

    pub fn set_log_file(&mut self, path: String) -> Result<String, Box<dyn std::error::Error>> {
        self.test_file_access(&path)?;
        self.file_path = Some(path.clone());
        self.is_active = true;
        Ok(format!("Logging enabled to: {}", path))
    }

    pub fn toggle_logging(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        match &self.file_path {
            Some(path) => {
                self.is_active = !self.is_active;
                if self.is_active {
                    Ok(format!("Logging resumed to: {}", path))
                } else {
                    Ok(format!("Logging paused (file: {})", path))
                }
            }
            None => {
                Err("No log file specified. Use /log <filename> to enable logging first.".into())
            }
        }
    }

    /// Appends one message to the log, preserving its line structure, with a
    /// blank line after it for spacing. Inactive logging is a no-op.
    pub fn log_message(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_ref().filter(|_| self.is_active) else {
            return Ok(());
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        for line in content.lines() {
            writeln!(file, "{}", line)?;
        }
        writeln!(file)?;
        file.flush()?;
        Ok(())
    }

    pub fn status_string(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!(
                "active ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
            (Some(path), false) => format!(
                "paused ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }

    fn test_file_access(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_appended_with_spacing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.log");
        let mut logging = LoggingState::new(None);
        logging
            .set_log_file(path.to_string_lossy().to_string())
            .unwrap();

        logging.log_message("you: hi").unwrap();
        logging.log_message("ai: hello\nthere").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "you: hi\n\nai: hello\nthere\n\n");
    }

    #[test]
    fn inactive_logging_writes_nothing() {
        let logging = LoggingState::new(None);
        assert!(logging.log_message("dropped").is_ok());
        assert_eq!(logging.status_string(), "disabled");
    }

    #[test]
    fn toggling_requires_a_file() {
        let mut logging = LoggingState::new(None);
        assert!(logging.toggle_logging().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.log");
        logging
            .set_log_file(path.to_string_lossy().to_string())
            .unwrap();
        assert!(logging.toggle_logging().unwrap().contains("paused"));
        assert!(logging.toggle_logging().unwrap().contains("resumed"));
    }
}
