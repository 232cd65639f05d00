//! Persistent job progress: accumulated VM running seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::SupervisorError;

/// File holding the total running seconds across restarts.
#[derive(Debug, Clone)]
pub struct ProgressFile {
    path: PathBuf,
}

impl ProgressFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total running seconds so far; zero when the file is absent or empty.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Progress`] if the file cannot be read or parsed.
    pub async fn read(&self) -> Result<f64, SupervisorError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0.0),
            Err(e) => return Err(self.unreadable(e.to_string())),
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(0.0);
        }
        match text.parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
            _ => Err(self.unreadable(format!("not a number of seconds: {text:?}"))),
        }
    }

    /// Adds `elapsed` to the stored total and returns the new total.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Progress`] on read or write failure.
    pub async fn add(&self, elapsed: Duration) -> Result<f64, SupervisorError> {
        let total = self.read().await? + elapsed.as_secs_f64();
        self.write(total).await?;
        Ok(total)
    }

    /// Stores zero.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Progress`] on write failure.
    pub async fn reset(&self) -> Result<(), SupervisorError> {
        self.write(0.0).await
    }

    /// Deletes the file; a missing file is fine.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Io`] if the file exists but cannot be removed.
    pub async fn clear(&self) -> Result<(), SupervisorError> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn write(&self, total: f64) -> Result<(), SupervisorError> {
        tokio::fs::write(&self.path, format!("{total}"))
            .await
            .map_err(|e| self.unreadable(e.to_string()))
    }

    fn unreadable(&self, reason: String) -> SupervisorError {
        SupervisorError::Progress { path: self.path.clone(), reason }
    }
}

/// Completed fraction of a job of length `job`, floored to hundredths
/// and clamped to `[0, 1]`.
#[must_use]
pub fn fraction_done(total_secs: f64, job: Duration) -> f64 {
    let job_secs = job.as_secs_f64();
    if job_secs <= 0.0 {
        return 1.0;
    }
    let hundredths = (total_secs / job_secs * 100.0).floor();
    (hundredths / 100.0).clamp(0.0, 1.0)
}
