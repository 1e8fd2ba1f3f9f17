use std::{
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
};

use orchestrator::RecordSink;
use shared::{
    domain::SessionRecord,
    error::{ErrorCode, Importance, SpellerError},
};
use tracing::info;

/// Writes each session record as pretty JSON into a directory.
pub struct JsonRecordSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl JsonRecordSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// `{started}_{user}_{session}_R{run}_{mode}_{id}.json`
    pub fn file_name(record: &SessionRecord) -> String {
        format!(
            "{}_{}_{}_R{:02}_{}_{}.json",
            record.started_at.format("%Y%m%d_%H%M%S"),
            file_safe(&record.label.user),
            file_safe(&record.label.session),
            record.label.run,
            record.mode.as_str().to_ascii_lowercase(),
            record.session_id
        )
    }
}

fn file_safe(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".into()
    } else {
        cleaned
    }
}

fn persistence_error(message: String) -> SpellerError {
    SpellerError::new(ErrorCode::Persistence, Importance::Important, message)
}

impl RecordSink for JsonRecordSink {
    fn persist(&mut self, record: &SessionRecord) -> Result<(), SpellerError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            persistence_error(format!(
                "failed to create recording directory '{}': {e}",
                self.dir.display()
            ))
        })?;

        let path = self.dir.join(Self::file_name(record));
        let file = File::create(&path).map_err(|e| {
            persistence_error(format!("failed to create '{}': {e}", path.display()))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), record).map_err(|e| {
            persistence_error(format!("failed to write '{}': {e}", path.display()))
        })?;

        info!(path = %path.display(), trials = record.trials.len(), "session record saved");
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/recording_tests.rs"]
mod tests;
