//! Persistence of instrument readings.
//!
//! - [`logger`]: rotating per-bin data files, one directory per endpoint
//! - [`staging`]: copies or zip archives of finished files for transfer
//! - [`dump`]: full record-buffer downloads

pub mod dump;
pub mod logger;
pub mod staging;

pub use dump::{DumpFile, DEFAULT_DUMP_HEADER};
pub use logger::{Appended, DataLogger, Rotation};
pub use staging::{stage, StagedArtifact, StagingPipeline};
