//! Per-task log files.
//!
//! Each task run gets an append-only log of phase events plus the full
//! prompt/response bodies. Phase lines are mirrored to stdout through
//! `tracing`; content dumps go to the file only. When no log directory is
//! configured (or the file cannot be created) the logger degrades to the
//! stdout mirror alone.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::Local;

pub struct TaskLogger {
    file: Option<File>,
}

impl TaskLogger {
    /// Open `<log_dir>/<task_id>_<YYYYMMDD_HHMMSS>.log`, creating the
    /// directory on demand. Never fails; I/O problems just disable the file.
    pub fn create(log_dir: Option<&Path>, task_id: &str) -> Self {
        let Some(dir) = log_dir else {
            return Self { file: None };
        };

        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::warn!("failed to create log dir {}: {err}", dir.display());
            return Self { file: None };
        }

        let name = format!("{}_{}.log", task_id, Local::now().format("%Y%m%d_%H%M%S"));
        match File::create(dir.join(&name)) {
            Ok(file) => Self { file: Some(file) },
            Err(err) => {
                tracing::warn!("failed to create log file {name}: {err}");
                Self { file: None }
            }
        }
    }

    /// Log a phase event, mirrored to stdout.
    pub fn log(&mut self, phase: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("[{phase}] {message}");

        if let Some(file) = self.file.as_mut() {
            let line = format!(
                "[{}] [{}] {}\n",
                Local::now().format("%H:%M:%S"),
                phase,
                message
            );
            let _ = file.write_all(line.as_bytes());
        }
    }

    /// Dump a full prompt/response body, file only.
    pub fn log_content(&mut self, label: &str, content: &str) {
        if let Some(file) = self.file.as_mut() {
            let _ = write!(file, "\n=== {label} ===\n{content}\n=== END {label} ===\n\n");
        }
    }
}
