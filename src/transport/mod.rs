//! Byte-stream links to instruments.
//!
//! A [`Transport`] moves raw bytes; it knows nothing about commands or replies. Three
//! implementations exist:
//!
//! - [`SerialTransport`]: an RS-232 port, held open for the duration of a [`Link`].
//! - [`TcpTransport`]: one TCP connection per exchange (connect on send, disconnect
//!   once the reply terminator arrives).
//! - [`SimulatedTransport`]: canned replies, no OS handles at all.
//!
//! All calls block. Callers that need bounded latency wrap them in their own timeout
//! (the scheduler runs them on tokio's blocking pool under `tokio::time::timeout`).

use crate::config::TransportConfig;
use crate::error::AppResult;
use std::time::Duration;

pub mod serial;
pub mod simulated;
pub mod tcp;

pub use serial::SerialTransport;
pub use simulated::{SimulatedLog, SimulatedTransport};
pub use tcp::TcpTransport;

/// Record terminator used on the wire in both directions.
pub const TERMINATOR: u8 = b'\r';

/// How long to wait for a reply to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quiescence {
    /// Delay after sending before the first read
    pub settle: Duration,
    /// A reply is complete once nothing new arrives for this long
    pub poll: Duration,
}

impl Default for Quiescence {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            poll: Duration::from_millis(100),
        }
    }
}

/// Raw byte channel to one instrument.
pub trait Transport: Send {
    /// Acquire the OS handle, or validate that it can be acquired.
    fn open(&mut self) -> AppResult<()>;

    /// Write one frame.
    fn send(&mut self, frame: &[u8]) -> AppResult<()>;

    /// Collect reply bytes until the link goes quiet or a terminator is seen.
    fn receive_until_quiescent(&mut self, quiet: Quiescence) -> AppResult<Vec<u8>>;

    /// Release the OS handle. Safe to call when already closed.
    fn close(&mut self);

    /// Loopback links carry no address byte.
    fn is_loopback(&self) -> bool {
        false
    }

    /// Human readable description for logs and errors.
    fn target(&self) -> &str;
}

/// An open transport. Closing happens on drop, on every exit path.
pub struct Link<'a> {
    transport: &'a mut dyn Transport,
}

impl<'a> Link<'a> {
    /// Open `transport` for the lifetime of the returned guard.
    pub fn open(transport: &'a mut dyn Transport) -> AppResult<Self> {
        transport.open()?;
        tracing::trace!(target_link = transport.target(), "link opened");
        Ok(Self { transport })
    }

    pub fn send(&mut self, frame: &[u8]) -> AppResult<()> {
        self.transport.send(frame)
    }

    pub fn receive_until_quiescent(&mut self, quiet: Quiescence) -> AppResult<Vec<u8>> {
        self.transport.receive_until_quiescent(quiet)
    }

    pub fn is_loopback(&self) -> bool {
        self.transport.is_loopback()
    }

    pub fn target(&self) -> &str {
        self.transport.target()
    }
}

impl Drop for Link<'_> {
    fn drop(&mut self) {
        self.transport.close();
        tracing::trace!(target_link = self.transport.target(), "link closed");
    }
}

/// Build the transport described by `config`, together with its quiescence timing.
pub fn from_config(config: &TransportConfig) -> (Box<dyn Transport>, Quiescence) {
    match config {
        TransportConfig::Serial(serial) => {
            let quiet = Quiescence {
                settle: serial.settle,
                poll: serial.poll,
            };
            let transport: Box<dyn Transport> = Box::new(SerialTransport::new(serial.clone()));
            (transport, quiet)
        }
        TransportConfig::Tcp(tcp) => {
            let quiet = Quiescence {
                settle: tcp.settle,
                poll: Duration::ZERO,
            };
            let transport: Box<dyn Transport> = Box::new(TcpTransport::new(tcp.clone()));
            (transport, quiet)
        }
        TransportConfig::Simulated(sim) => {
            let quiet = Quiescence {
                settle: Duration::ZERO,
                poll: Duration::ZERO,
            };
            let transport: Box<dyn Transport> =
                Box::new(SimulatedTransport::new().with_echo(sim.echo));
            (transport, quiet)
        }
    }
}
