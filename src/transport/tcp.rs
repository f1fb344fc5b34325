//! TCP transport: a fresh connection for every command.
use super::{Quiescence, Transport, TERMINATOR};
use crate::config::TcpConfig;
use crate::error::{AppResult, DaqError};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use tracing::trace;

const CHUNK: usize = 1024;

/// Instrument behind an Ethernet option; connects for every exchange.
pub struct TcpTransport {
    config: TcpConfig,
    target: String,
    addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        let target = format!("tcp://{}:{}", config.host, config.port);
        Self {
            config,
            target,
            addr: None,
            stream: None,
        }
    }

    fn io_error(&self, source: io::Error, reading: bool) -> DaqError {
        match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DaqError::Timeout {
                target: self.target.clone(),
                budget: self.config.timeout,
            },
            _ if reading => DaqError::Read {
                target: self.target.clone(),
                source,
            },
            _ => DaqError::Write {
                target: self.target.clone(),
                source,
            },
        }
    }
}

impl Transport for TcpTransport {
    /// Resolves the address; the connection itself is made per command.
    fn open(&mut self) -> AppResult<()> {
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|e| DaqError::Connection {
                target: self.target.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| DaqError::Connection {
                target: self.target.clone(),
                reason: "host resolved to no addresses".to_string(),
            })?;
        self.addr = Some(addr);
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> AppResult<()> {
        let addr = match self.addr {
            Some(addr) => addr,
            None => {
                self.open()?;
                self.addr.ok_or_else(|| DaqError::Connection {
                    target: self.target.clone(),
                    reason: "address not resolved".to_string(),
                })?
            }
        };
        let timeout = self.config.timeout;
        let mut stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| DaqError::Connection {
                target: self.target.clone(),
                reason: e.to_string(),
            })?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .and_then(|_| stream.write_all(frame))
            .map_err(|e| self.io_error(e, false))?;
        trace!(frame = %frame.escape_ascii(), "sent");
        self.stream = Some(stream);
        Ok(())
    }

    fn receive_until_quiescent(&mut self, quiet: Quiescence) -> AppResult<Vec<u8>> {
        let Some(mut stream) = self.stream.take() else {
            return Err(DaqError::Read {
                target: self.target.clone(),
                source: io::Error::new(io::ErrorKind::NotConnected, "nothing was sent"),
            });
        };
        thread::sleep(quiet.settle);
        let mut received = Vec::new();
        let mut chunk = [0u8; CHUNK];
        loop {
            let n = stream
                .read(&mut chunk)
                .map_err(|e| self.io_error(e, true))?;
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
            if chunk[..n].contains(&TERMINATOR) {
                break;
            }
        }
        trace!(bytes = received.len(), "received");
        Ok(received)
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn target(&self) -> &str {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn config(port: u16) -> TcpConfig {
        TcpConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout: Duration::from_millis(500),
            settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_receive_without_send_fails() {
        let mut tcp = TcpTransport::new(config(9));
        assert!(matches!(
            tcp.receive_until_quiescent(Quiescence::default()),
            Err(DaqError::Read { .. })
        ));
    }

    #[test]
    fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(1500));
            drop(stream);
        });

        let mut tcp = TcpTransport::new(config(port));
        tcp.open().unwrap();
        tcp.send(b"\x81o3\r").unwrap();
        let result = tcp.receive_until_quiescent(Quiescence {
            settle: Duration::ZERO,
            poll: Duration::ZERO,
        });
        assert!(matches!(result, Err(DaqError::Timeout { .. })));
        server.join().unwrap();
    }
}
