//! In-process stand-in for an instrument on a loopback connector.
//!
//! Mirrors the call-log approach of a mock adapter: every open, send and close is
//! recorded in a shared [`SimulatedLog`] so tests can assert on the exact command
//! sequence an operation produced.

use super::{Quiescence, Transport, TERMINATOR};
use crate::error::{AppResult, DaqError};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// Shared record of link activity.
#[derive(Clone, Default)]
pub struct SimulatedLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl SimulatedLog {
    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Everything that happened, e.g. `["open", "send o3", "close"]`.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Only the commands sent, in order.
    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("send ").map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

/// Canned-reply transport. No address byte is expected on the wire.
pub struct SimulatedTransport {
    echo: bool,
    replies: HashMap<String, String>,
    responder: Option<Responder>,
    failing: Vec<String>,
    refusing: bool,
    pending: VecDeque<String>,
    log: SimulatedLog,
    open: bool,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            echo: false,
            replies: HashMap::new(),
            responder: None,
            failing: Vec::new(),
            refusing: false,
            pending: VecDeque::new(),
            log: SimulatedLog::default(),
            open: false,
        }
    }

    /// Repeat the command (followed by `\n`) ahead of each reply, as the analyzers do.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Fixed reply for one command.
    pub fn with_reply(mut self, command: &str, reply: &str) -> Self {
        self.replies.insert(command.to_string(), reply.to_string());
        self
    }

    /// Computed replies; returning `None` falls through to the fixed replies.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Reading the reply to `command` fails with a read error.
    pub fn failing_on(mut self, command: &str) -> Self {
        self.failing.push(command.to_string());
        self
    }

    /// `open` fails with a connection error, as an unplugged instrument would.
    pub fn refusing_connections(mut self) -> Self {
        self.refusing = true;
        self
    }

    pub fn log(&self) -> SimulatedLog {
        self.log.clone()
    }

    fn reply_for(&mut self, command: &str) -> String {
        if let Some(reply) = self.responder.as_mut().and_then(|r| r(command)) {
            return reply;
        }
        if let Some(reply) = self.replies.get(command) {
            return reply.clone();
        }
        synthetic_reply(command, chrono::Utc::now())
    }
}

/// What an unconfigured simulator answers.
pub fn synthetic_reply(command: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    let stamp = now.format("%H:%M %m-%d-%y");
    if command == "lrec" {
        format!(
            "(simulated) {stamp}  flags D800500 o3 0.394 cellai 123853.000 cellbi 94558.000 \
             bncht 31.220 lmpt 53.754 o3lt 68.363 flowa 0.000 flowb 0.000 pres 724.798"
        )
    } else {
        format!("(simulated) {stamp} Sorry, I can only simulate lrec.")
    }
}

impl Transport for SimulatedTransport {
    fn open(&mut self) -> AppResult<()> {
        if self.refusing {
            return Err(DaqError::Connection {
                target: self.target().to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.open = true;
        self.pending.clear();
        self.log.push("open".to_string());
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> AppResult<()> {
        if !self.open {
            return Err(DaqError::Write {
                target: self.target().to_string(),
                source: io::Error::new(io::ErrorKind::NotConnected, "link is not open"),
            });
        }
        let body = frame.strip_suffix(&[TERMINATOR]).unwrap_or(frame);
        let command = String::from_utf8_lossy(body).into_owned();
        self.log.push(format!("send {command}"));
        self.pending.push_back(command);
        Ok(())
    }

    fn receive_until_quiescent(&mut self, _quiet: Quiescence) -> AppResult<Vec<u8>> {
        let Some(command) = self.pending.pop_front() else {
            return Ok(Vec::new());
        };
        if self.failing.contains(&command) {
            return Err(DaqError::Read {
                target: self.target().to_string(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "simulated failure"),
            });
        }
        let reply = self.reply_for(&command);
        let mut bytes = Vec::new();
        if self.echo {
            bytes.extend_from_slice(command.as_bytes());
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(reply.as_bytes());
        bytes.push(TERMINATOR);
        Ok(bytes)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.push("close".to_string());
        }
    }

    fn is_loopback(&self) -> bool {
        true
    }

    fn target(&self) -> &str {
        "simulated"
    }
}
