//! Files holding a full download of an instrument's record buffer.
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column header written when the endpoint configures none.
pub const DEFAULT_DUMP_HEADER: &str =
    "time date flags o3 hio3 cellai cellbi bncht lmpt o3lt flowa flowb pres";

/// Field-name tags removed from buffered records, applied in this order.
pub const RECORD_TAGS: [&str; 11] = [
    "flags ", "hio3 ", "cellai ", "cellbi ", "bncht ", "lmpt ", "o3lt ", "flowa ", "flowb ",
    "pres ", "o3 ",
];

/// `05:26 07-19-22 flags 0C100400 o3 30.781 hio3 0.000` becomes
/// `05:26 07-19-22 0C100400 30.781 0.000`.
pub fn strip_tags(record: &str) -> String {
    RECORD_TAGS
        .iter()
        .fold(record.to_string(), |acc, tag| acc.replace(tag, ""))
}

/// `{dir}/{endpoint}_all_{kind}-{YYYYMMDDHHMMSS}.dat`
pub fn dump_path(dir: &Path, endpoint: &str, kind: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "{endpoint}_all_{kind}-{}.dat",
        at.format("%Y%m%d%H%M%S")
    ))
}

/// Writer for one dump file. The header is written on creation.
pub struct DumpFile<W: Write = BufWriter<File>> {
    path: PathBuf,
    out: W,
    records: usize,
}

impl DumpFile {
    /// Create the file at `path`, along with its parent directories.
    pub fn create(path: PathBuf, header: &str) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DaqError::persistence(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DaqError::persistence(&path, e))?;
        Self::from_writer(path, BufWriter::new(file), header)
    }
}

impl<W: Write> DumpFile<W> {
    /// Dump into an arbitrary writer; `path` only labels errors and the result.
    pub fn from_writer(path: PathBuf, out: W, header: &str) -> AppResult<Self> {
        let mut dump = Self {
            path,
            out,
            records: 0,
        };
        dump.write_line(header)?;
        Ok(dump)
    }

    /// Write every non-blank line of `chunk`, tags stripped. Returns the number written.
    pub fn write_chunk(&mut self, chunk: &str) -> AppResult<usize> {
        let mut written = 0;
        for line in chunk.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.write_line(&strip_tags(line))?;
            written += 1;
        }
        self.records += written;
        Ok(written)
    }

    fn write_line(&mut self, line: &str) -> AppResult<()> {
        writeln!(self.out, "{line}").map_err(|e| DaqError::persistence(&self.path, e))
    }

    /// Non-blank record lines written so far.
    pub fn lines_written(&self) -> usize {
        self.records
    }

    /// Flush and return the file path.
    pub fn finish(mut self) -> AppResult<PathBuf> {
        self.out
            .flush()
            .map_err(|e| DaqError::persistence(&self.path, e))?;
        Ok(self.path)
    }
}
