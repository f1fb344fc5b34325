//! # Thermo DAQ Core Library
//!
//! This crate polls Thermo Scientific ozone analyzers (49i) and calibrators (49C) over
//! their C-link command protocol, files every reading into per-bin data files, and stages
//! finished files for transfer. The `thermo_daq` binary (`main.rs`) is a thin CLI over
//! this library.
//!
//! ## Crate Structure
//!
//! - **`transport`**: Byte links to instruments (serial, TCP, simulated) and the `Link`
//!   guard that closes them on every exit path.
//! - **`protocol`**: Command framing with the instrument address byte and reply tidying.
//! - **`session`**: `InstrumentSession`, the command/response operations on one instrument
//!   (configuration, data queries, buffer downloads, parameters).
//! - **`endpoint`**: `InstrumentEndpoint`, one configured instrument with its global
//!   settings resolved.
//! - **`bin_router`**: Maps a UTC instant to the label of the bin that closes after it.
//! - **`data`**: Rotating data files, buffer dumps, and the staging pipeline.
//! - **`scheduler`**: The tokio daemon that polls endpoints and steps calibrator levels.
//! - **`config`**: Loading and validating the TOML configuration. See `config::Settings`.
//! - **`logging`**: One-time `tracing` subscriber setup.
//! - **`error`**: The `DaqError` enum shared by every module.
//! - **`validation`**: Small checks used by configuration validation.

pub mod bin_router;
pub mod config;
pub mod data;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod validation;

pub use error::{AppResult, DaqError};
