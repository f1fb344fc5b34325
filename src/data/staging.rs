//! Hand-off of finished files to the staging area picked up by the transfer job.
//!
//! A file is staged under `{staging_root}/{basename(endpoint_data_dir)}/`, either as a
//! byte copy with the same name or as a zip archive holding the file as its single
//! deflated entry (`name.dat` becomes `name.zip`). Staging the same file again
//! overwrites the earlier artifact.

use crate::error::{AppResult, DaqError};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Result of staging one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    /// The copy or archive written to the staging area
    pub path: PathBuf,
    /// The data file it was made from
    pub source: PathBuf,
    pub compressed: bool,
}

/// Staging settings for one endpoint.
#[derive(Debug, Clone)]
pub struct StagingPipeline {
    root: PathBuf,
    compress: bool,
    retain_source: bool,
}

impl StagingPipeline {
    pub fn new(root: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            root: root.into(),
            compress,
            retain_source: true,
        }
    }

    /// `false` removes the data file once its artifact is written.
    pub fn retain_source(mut self, retain: bool) -> Self {
        self.retain_source = retain;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage(&self, file: &Path, endpoint_data_dir: &Path) -> AppResult<StagedArtifact> {
        let artifact = stage(file, endpoint_data_dir, &self.root, self.compress)?;
        if !self.retain_source {
            fs::remove_file(file).map_err(|e| DaqError::persistence(file, e))?;
            debug!(source = %file.display(), "removed staged source");
        }
        Ok(artifact)
    }
}

/// Copy or archive `file` into the staging area for `endpoint_data_dir`.
pub fn stage(
    file: &Path,
    endpoint_data_dir: &Path,
    staging_root: &Path,
    compress: bool,
) -> AppResult<StagedArtifact> {
    let dest_dir = match endpoint_data_dir.file_name() {
        Some(name) => staging_root.join(name),
        None => staging_root.to_path_buf(),
    };
    fs::create_dir_all(&dest_dir).map_err(|e| DaqError::persistence(&dest_dir, e))?;

    let file_name = file.file_name().ok_or_else(|| {
        DaqError::persistence(
            file,
            io::Error::new(io::ErrorKind::InvalidInput, "not a file path"),
        )
    })?;

    let path = if compress {
        let archive = dest_dir.join(file_name).with_extension("zip");
        write_zip(file, &file_name.to_string_lossy(), &archive)
            .map_err(|e| DaqError::persistence(&archive, e))?;
        archive
    } else {
        let copy = dest_dir.join(file_name);
        fs::copy(file, &copy).map_err(|e| DaqError::persistence(&copy, e))?;
        copy
    };

    info!(source = %file.display(), artifact = %path.display(), compress, "staged");
    Ok(StagedArtifact {
        path,
        source: file.to_path_buf(),
        compressed: compress,
    })
}

fn write_zip(source: &Path, entry_name: &str, archive: &Path) -> io::Result<()> {
    let mut input = BufReader::new(File::open(source)?);
    let mut zip = ZipWriter::new(File::create(archive)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)?;
    io::copy(&mut input, &mut zip)?;
    zip.finish()?;
    Ok(())
}
