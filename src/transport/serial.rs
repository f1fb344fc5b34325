//! RS-232 transport built on the `serialport` crate.
use super::{Quiescence, Transport};
use crate::config::SerialConfig;
use crate::error::{AppResult, DaqError};

#[cfg(feature = "instrument_serial")]
mod serial_enabled {
    use super::*;
    use crate::config::Parity;
    use serialport::{DataBits, SerialPort, StopBits};
    use std::io::{self, Read, Write};
    use std::thread;
    use tracing::{debug, trace};

    /// Serial link. The port is held open between [`Transport::open`] and
    /// [`Transport::close`].
    pub struct SerialTransport {
        config: SerialConfig,
        target: String,
        port: Option<Box<dyn SerialPort>>,
    }

    impl SerialTransport {
        pub fn new(config: SerialConfig) -> Self {
            let target = format!("serial://{}@{}", config.port, config.baud_rate);
            Self {
                config,
                target,
                port: None,
            }
        }

        fn port(&mut self) -> AppResult<&mut Box<dyn SerialPort>> {
            let target = &self.target;
            self.port.as_mut().ok_or_else(|| DaqError::Write {
                target: target.clone(),
                source: io::Error::new(io::ErrorKind::NotConnected, "port is not open"),
            })
        }

        fn read_error(&self, source: io::Error) -> DaqError {
            if source.kind() == io::ErrorKind::TimedOut {
                DaqError::Timeout {
                    target: self.target.clone(),
                    budget: self.config.timeout,
                }
            } else {
                DaqError::Read {
                    target: self.target.clone(),
                    source,
                }
            }
        }
    }

    fn data_bits(bits: u8) -> DataBits {
        match bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    fn stop_bits(bits: u8) -> StopBits {
        match bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        }
    }

    fn parity(parity: Parity) -> serialport::Parity {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }

    impl Transport for SerialTransport {
        fn open(&mut self) -> AppResult<()> {
            if self.port.take().is_some() {
                debug!(port = %self.config.port, "port was still open, reopening");
            }
            let port = serialport::new(&self.config.port, self.config.baud_rate)
                .data_bits(data_bits(self.config.data_bits))
                .parity(parity(self.config.parity))
                .stop_bits(stop_bits(self.config.stop_bits))
                .timeout(self.config.timeout)
                .open()
                .map_err(|e| DaqError::Connection {
                    target: self.target.clone(),
                    reason: e.to_string(),
                })?;
            self.port = Some(port);
            Ok(())
        }

        fn send(&mut self, frame: &[u8]) -> AppResult<()> {
            let target = self.target.clone();
            let port = self.port()?;
            port.write_all(frame)
                .and_then(|_| port.flush())
                .map_err(|source| DaqError::Write { target, source })?;
            trace!(frame = %frame.escape_ascii(), "sent");
            Ok(())
        }

        fn receive_until_quiescent(&mut self, quiet: Quiescence) -> AppResult<Vec<u8>> {
            thread::sleep(quiet.settle);
            let mut received = Vec::new();
            loop {
                let waiting = {
                    let port = self.port()?;
                    port.bytes_to_read()
                };
                let waiting = waiting.map_err(|e| self.read_error(e.into()))?;
                if waiting == 0 {
                    break;
                }
                let mut chunk = vec![0u8; waiting as usize];
                let read = self.port()?.read(&mut chunk);
                let n = read.map_err(|e| self.read_error(e))?;
                received.extend_from_slice(&chunk[..n]);
                thread::sleep(quiet.poll);
            }
            trace!(bytes = received.len(), "received");
            Ok(received)
        }

        fn close(&mut self) {
            self.port = None;
        }

        fn target(&self) -> &str {
            &self.target
        }
    }
}

#[cfg(not(feature = "instrument_serial"))]
mod serial_disabled {
    use super::*;

    /// Placeholder when the crate is built without `instrument_serial`.
    pub struct SerialTransport {
        target: String,
    }

    impl SerialTransport {
        pub fn new(config: SerialConfig) -> Self {
            Self {
                target: format!("serial://{}@{}", config.port, config.baud_rate),
            }
        }
    }

    impl Transport for SerialTransport {
        fn open(&mut self) -> AppResult<()> {
            Err(DaqError::Connection {
                target: self.target.clone(),
                reason: "serial support not enabled; rebuild with --features instrument_serial"
                    .to_string(),
            })
        }

        fn send(&mut self, _frame: &[u8]) -> AppResult<()> {
            self.open()
        }

        fn receive_until_quiescent(&mut self, _quiet: Quiescence) -> AppResult<Vec<u8>> {
            self.open().map(|_| Vec::new())
        }

        fn close(&mut self) {}

        fn target(&self) -> &str {
            &self.target
        }
    }
}

#[cfg(feature = "instrument_serial")]
pub use serial_enabled::SerialTransport;

#[cfg(not(feature = "instrument_serial"))]
pub use serial_disabled::SerialTransport;
