//! C-link command framing and reply normalization.
//!
//! A command goes out as `[address] command CR`, where the address byte is
//! `0x80 + instrument id` and is omitted on loopback links. Replies come back as
//! ASCII text, optionally followed by `*` and a checksum, and may start with an
//! echo of the command.

use crate::error::{AppResult, DaqError};
use crate::transport::{Link, Quiescence, TERMINATOR};
use tracing::debug;

/// Bytes for one outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    /// `[address] command CR`; loopback links get no address byte.
    pub fn new(address: Option<u8>, command: &str) -> Self {
        let mut bytes = Vec::with_capacity(command.len() + 2);
        bytes.extend(address);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(TERMINATOR);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Normalize a decoded reply to `command`.
///
/// Drops everything from the first `*`, then any leading echo of the command
/// (the command text immediately followed by CR or LF), then surrounding
/// whitespace. Applying it twice gives the same result as applying it once.
pub fn tidy(command: &str, raw: &str) -> String {
    let mut rest = raw.split('*').next().unwrap_or_default();
    loop {
        let trimmed = rest.trim_start();
        let after_echo = trimmed
            .strip_prefix(command)
            .and_then(|tail| tail.strip_prefix(['\r', '\n']));
        match after_echo {
            Some(tail) => rest = tail,
            None => break,
        }
    }
    rest.trim().to_string()
}

/// Frames commands for one instrument address and interprets the replies.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolAdapter {
    address: u8,
    quiet: Quiescence,
}

impl ProtocolAdapter {
    /// `address` is the full byte sent on the wire (`0x80 | id`).
    pub fn new(address: u8, quiet: Quiescence) -> Self {
        Self { address, quiet }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// One command/response round trip over an open link.
    pub fn converse(
        &self,
        link: &mut Link<'_>,
        command: &str,
        tidy_reply: bool,
    ) -> AppResult<String> {
        let address = (!link.is_loopback()).then_some(self.address);
        let frame = RawFrame::new(address, command);
        link.send(frame.as_bytes())?;
        let raw = link.receive_until_quiescent(self.quiet)?;
        let text = String::from_utf8(raw).map_err(|source| DaqError::Decode {
            command: command.to_string(),
            source,
        })?;
        debug!(target_link = link.target(), command, reply = %text.escape_debug(), "conversed");
        Ok(if tidy_reply { tidy(command, &text) } else { text })
    }
}
