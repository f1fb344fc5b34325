//! Resolved description of one instrument.
//!
//! [`InstrumentEndpoint`] combines an `[[endpoints]]` entry with the global paths and
//! storage defaults, so a session never has to consult [`Settings`] again.

use crate::bin_router::BinWidth;
use crate::config::{CalibrationConfig, EndpointConfig, Settings, TransportConfig};
use crate::data::{DataLogger, StagingPipeline, DEFAULT_DUMP_HEADER};
use crate::error::AppResult;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct InstrumentEndpoint {
    pub name: String,
    pub address: u8,
    pub model: String,
    pub serial_number: String,
    pub transport: TransportConfig,
    pub get_config: Vec<String>,
    pub set_config: Vec<String>,
    pub get_data: String,
    pub data_header: String,
    pub dump_header: String,
    pub width: BinWidth,
    pub clock_time_format: String,
    pub sampling_interval: u32,
    pub offset_seconds: u32,
    pub calibration: Option<CalibrationConfig>,
    /// Root data directory; the endpoint writes into `{data_root}/{name}`
    pub data_root: PathBuf,
    pub staging_root: Option<PathBuf>,
    pub staging_zip: bool,
    pub retain_source: bool,
}

impl InstrumentEndpoint {
    pub fn from_config(config: &EndpointConfig, settings: &Settings) -> AppResult<Self> {
        Ok(Self {
            name: config.name.clone(),
            address: config.address(),
            model: config.model.clone(),
            serial_number: config.serial_number.clone(),
            transport: config.transport.clone(),
            get_config: config.get_config.clone(),
            set_config: config.set_config.clone(),
            get_data: config.get_data.clone(),
            data_header: config.data_header.clone(),
            dump_header: config
                .dump_header
                .clone()
                .unwrap_or_else(|| DEFAULT_DUMP_HEADER.to_string()),
            width: BinWidth::new(config.bin_width(&settings.storage))?,
            clock_time_format: config.clock_time_format.clone(),
            sampling_interval: config.sampling_interval,
            offset_seconds: config.offset_seconds,
            calibration: config.calibration.clone(),
            data_root: settings.paths.data.clone(),
            staging_root: settings.paths.staging.clone(),
            staging_zip: config.staging_zip,
            retain_source: settings.storage.retain_source,
        })
    }

    /// `{data_root}/{name}`
    pub fn data_dir(&self) -> PathBuf {
        self.data_root.join(&self.name)
    }

    pub fn staging(&self) -> Option<StagingPipeline> {
        self.staging_root.as_ref().map(|root| {
            StagingPipeline::new(root, self.staging_zip).retain_source(self.retain_source)
        })
    }

    /// The rotating data logger for this endpoint.
    pub fn data_logger(&self) -> DataLogger {
        let logger = DataLogger::new(&self.name, self.width, &self.data_header, &self.data_root);
        match self.staging() {
            Some(staging) => logger.with_staging(staging),
            None => logger,
        }
    }
}
