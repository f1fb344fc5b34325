//! Per-endpoint rotating data files.
//!
//! Each reading is appended to `{data}/{endpoint}/{endpoint}-{label}.dat`, where the
//! label is the closing boundary of the reading's bin. The logger remembers the file
//! it wrote last; when a reading lands in a different file, the previous one is
//! finished and goes to the staging pipeline.

use super::staging::{StagedArtifact, StagingPipeline};
use crate::bin_router::{bin_label_for, BinWidth};
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Timestamp format at the start of every data line (local time).
pub const LINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A file that stopped receiving data.
#[derive(Debug)]
pub struct Rotation {
    pub finished: PathBuf,
    /// `None` when no staging area is configured.
    pub staged: Option<AppResult<StagedArtifact>>,
}

/// Outcome of one append.
#[derive(Debug)]
pub struct Appended {
    pub file: PathBuf,
    pub rotation: Option<Rotation>,
}

/// Per-endpoint data files, one per bin, staged as each bin closes.
pub struct DataLogger {
    endpoint: String,
    width: BinWidth,
    header: String,
    dir: PathBuf,
    staging: Option<StagingPipeline>,
    current: Mutex<Option<PathBuf>>,
}

impl DataLogger {
    /// Logger writing into `{data_root}/{endpoint}`.
    pub fn new(
        endpoint: impl Into<String>,
        width: BinWidth,
        header: impl Into<String>,
        data_root: &Path,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            dir: data_root.join(&endpoint),
            endpoint,
            width,
            header: header.into(),
            staging: None,
            current: Mutex::new(None),
        }
    }

    pub fn with_staging(mut self, staging: StagingPipeline) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn staging(&self) -> Option<&StagingPipeline> {
        self.staging.as_ref()
    }

    /// The file most recently written, if any.
    pub fn current_file(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Path of the file collecting readings taken at `at`.
    pub fn file_for(&self, at: DateTime<Utc>) -> AppResult<PathBuf> {
        let label = bin_label_for(at, self.width)?;
        Ok(self.dir.join(format!("{}-{}.dat", self.endpoint, label)))
    }

    /// Append one reading, rotating and staging when its bin differs from the last.
    pub fn append(&self, at: DateTime<Utc>, payload: &str) -> AppResult<Appended> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let file = self.file_for(at)?;
        fs::create_dir_all(&self.dir).map_err(|e| DaqError::persistence(&self.dir, e))?;
        write_line(&file, &self.header, at, payload)?;

        let rotation = match current.replace(file.clone()) {
            Some(previous) if previous != file => Some(self.finish(previous)),
            _ => None,
        };
        Ok(Appended { file, rotation })
    }

    fn finish(&self, finished: PathBuf) -> Rotation {
        debug!(endpoint = %self.endpoint, file = %finished.display(), "bin closed");
        let staged = self.staging.as_ref().map(|staging| {
            let result = staging.stage(&finished, &self.dir);
            if let Err(e) = &result {
                warn!(endpoint = %self.endpoint, file = %finished.display(), error = %e, "staging failed");
            }
            result
        });
        Rotation { finished, staged }
    }
}

fn write_line(file: &Path, header: &str, at: DateTime<Utc>, payload: &str) -> AppResult<()> {
    let is_new = !file.exists();
    let mut handle = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .map_err(|e| DaqError::persistence(file, e))?;
    let stamp = at.with_timezone(&Local).format(LINE_TIMESTAMP_FORMAT);
    let mut text = String::new();
    if is_new {
        text.push_str(header);
        text.push('\n');
    }
    text.push_str(&format!("{stamp} {payload}\n"));
    handle
        .write_all(text.as_bytes())
        .map_err(|e| DaqError::persistence(file, e))
}
