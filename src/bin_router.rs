//! Time-bin labels used to name rotating data files.
//!
//! A bin is a fixed UTC window of `W` minutes. Every instant is filed under the
//! *closing* boundary of its window, so the file `tei49c-202401011100.dat` holds the
//! samples taken in `[10:00, 11:00)` and is known to be complete at 11:00 UTC.

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Utc};
use std::fmt;

/// Bin widths (minutes) a data file may span.
pub const ALLOWED_WIDTHS: [u32; 11] = [10, 15, 20, 30, 60, 120, 180, 240, 360, 720, 1440];

/// A validated bin width in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinWidth(u32);

impl BinWidth {
    /// Validates `minutes` against [`ALLOWED_WIDTHS`].
    pub fn new(minutes: u32) -> AppResult<Self> {
        if ALLOWED_WIDTHS.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(DaqError::InvalidWidth(minutes))
        }
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    fn seconds(self) -> i64 {
        i64::from(self.0) * 60
    }
}

impl TryFrom<u32> for BinWidth {
    type Error = DaqError;

    fn try_from(minutes: u32) -> AppResult<Self> {
        Self::new(minutes)
    }
}

/// `YYYYMMDDHHMM` of the upcoming bin boundary, in UTC.
///
/// Lexicographic and chronological order coincide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BinLabel(String);

impl BinLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label of the window containing `now` for a width given in minutes.
pub fn bin_label(now: DateTime<Utc>, width_minutes: u32) -> AppResult<BinLabel> {
    bin_label_for(now, BinWidth::new(width_minutes)?)
}

/// Same as [`bin_label`] for an already validated width.
pub fn bin_label_for(now: DateTime<Utc>, width: BinWidth) -> AppResult<BinLabel> {
    let span = width.seconds();
    let end = now.timestamp().div_euclid(span) * span + span;
    let boundary =
        DateTime::<Utc>::from_timestamp(end, 0).ok_or(DaqError::TimestampOutOfRange(end))?;
    Ok(BinLabel(boundary.format("%Y%m%d%H%M").to_string()))
}
