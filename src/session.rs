//! Command/response operations against one instrument.
//!
//! An [`InstrumentSession`] owns the endpoint description, its transport and the data
//! logger for its readings. Every operation opens the link, performs its exchanges and
//! closes the link again before returning, whatever the outcome.
//!
//! Multi-command operations (`get_config`, `set_config`, `get_all_buffered`) report
//! one [`CommandOutcome`] per command; a failing command does not stop the others.

use crate::data::dump::{dump_path, DumpFile};
use crate::data::{Appended, DataLogger, StagedArtifact};
use crate::endpoint::InstrumentEndpoint;
use crate::error::{AppResult, DaqError};
use crate::protocol::ProtocolAdapter;
use crate::transport::{self, Link, Quiescence, Transport};
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Records retrieved per buffer request.
pub const BUFFER_CHUNK: usize = 10;

/// Reply to one command.
#[derive(Debug)]
pub struct CommandOutcome {
    pub command: String,
    pub result: AppResult<String>,
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// What happened to a reading after it was taken.
#[derive(Debug)]
pub enum Persistence {
    /// Saving was not requested
    Suppressed,
    Written(Appended),
    /// The reading is valid but could not be stored
    Failed(DaqError),
}

/// Result of a data query.
#[derive(Debug)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub persistence: Persistence,
}

/// On-instrument record buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Long records
    Lrec,
    /// Short records
    Srec,
}

impl RecordKind {
    pub fn command(self) -> &'static str {
        match self {
            RecordKind::Lrec => "lrec",
            RecordKind::Srec => "srec",
        }
    }

    /// Buffer size in records, used when the instrument does not report a count.
    pub fn capacity(self) -> usize {
        match self {
            RecordKind::Lrec => 1792,
            RecordKind::Srec => 4096,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for RecordKind {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lrec" => Ok(RecordKind::Lrec),
            "srec" => Ok(RecordKind::Srec),
            other => Err(DaqError::Configuration(format!(
                "Unknown record kind '{other}'. Must be one of: lrec, srec"
            ))),
        }
    }
}

/// Result of draining an instrument buffer.
#[derive(Debug)]
pub struct BufferDump {
    pub path: PathBuf,
    /// Records requested by chunks that succeeded
    pub records: usize,
    pub chunks: Vec<CommandOutcome>,
    /// `None` when no staging area is configured, or when the dump is incomplete
    pub staged: Option<AppResult<StagedArtifact>>,
    /// Set when the dump file could not be written; the drain stops there
    pub write_error: Option<DaqError>,
}

/// The `(index, retrieve)` pairs that drain `count` records, newest first.
pub fn buffer_requests(count: usize) -> Vec<(usize, usize)> {
    let mut requests = Vec::new();
    let mut index = count;
    while index > 0 {
        requests.push((index, index.min(BUFFER_CHUNK)));
        index = index.saturating_sub(BUFFER_CHUNK);
    }
    requests
}

/// First integer in a `no of lrec` style reply.
pub fn parse_record_count(reply: &str) -> Option<usize> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER
        .get_or_init(|| Regex::new(r"(\d+)").ok())
        .as_ref()?
        .captures(reply)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// One instrument: its endpoint, its transport and the logger for its readings.
pub struct InstrumentSession {
    endpoint: InstrumentEndpoint,
    transport: Box<dyn Transport>,
    adapter: ProtocolAdapter,
    logger: DataLogger,
}

impl InstrumentSession {
    /// Session using the transport described by the endpoint.
    pub fn new(endpoint: InstrumentEndpoint) -> Self {
        let (transport, quiet) = transport::from_config(&endpoint.transport);
        Self::with_transport(endpoint, transport, quiet)
    }

    /// Session over a caller-supplied transport.
    pub fn with_transport(
        endpoint: InstrumentEndpoint,
        transport: Box<dyn Transport>,
        quiet: Quiescence,
    ) -> Self {
        let adapter = ProtocolAdapter::new(endpoint.address, quiet);
        let logger = endpoint.data_logger();
        Self {
            endpoint,
            transport,
            adapter,
            logger,
        }
    }

    pub fn endpoint(&self) -> &InstrumentEndpoint {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn logger(&self) -> &DataLogger {
        &self.logger
    }

    /// Single exchange on a fresh link.
    fn converse(&mut self, command: &str) -> AppResult<String> {
        let adapter = self.adapter;
        let mut link = Link::open(self.transport.as_mut())?;
        adapter.converse(&mut link, command, true)
    }

    /// Several exchanges on one link; only failing to open the link fails the call.
    fn converse_all<I, S>(&mut self, commands: I) -> AppResult<Vec<CommandOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let adapter = self.adapter;
        let name = self.endpoint.name.clone();
        let mut link = Link::open(self.transport.as_mut())?;
        Ok(commands
            .into_iter()
            .map(|command| {
                let command: String = command.into();
                let result = adapter.converse(&mut link, &command, true);
                if let Err(e) = &result {
                    warn!(endpoint = %name, %command, error = %e, "command failed");
                }
                CommandOutcome { command, result }
            })
            .collect())
    }

    /// Query every configured get-config command, in order.
    pub fn get_config(&mut self) -> AppResult<Vec<CommandOutcome>> {
        let commands = self.endpoint.get_config.clone();
        let outcomes = self.converse_all(commands)?;
        info!(endpoint = %self.endpoint.name, replies = ?summarize(&outcomes), "configuration read");
        Ok(outcomes)
    }

    /// Synchronize the instrument clock to local time, then issue every set-config
    /// command in order. The clock outcomes come first in the result.
    pub fn set_config(&mut self) -> AppResult<Vec<CommandOutcome>> {
        self.set_config_at(Local::now())
    }

    pub fn set_config_at(&mut self, now: DateTime<Local>) -> AppResult<Vec<CommandOutcome>> {
        let commands: Vec<String> = self
            .clock_commands(now)
            .into_iter()
            .chain(self.endpoint.set_config.iter().cloned())
            .collect();
        let outcomes = self.converse_all(commands)?;
        info!(endpoint = %self.endpoint.name, replies = ?summarize(&outcomes), "configuration set");
        Ok(outcomes)
    }

    /// Set and confirm the instrument date and time.
    pub fn sync_clock(&mut self) -> AppResult<Vec<CommandOutcome>> {
        let commands = self.clock_commands(Local::now());
        self.converse_all(commands)
    }

    fn clock_commands(&self, now: DateTime<Local>) -> Vec<String> {
        vec![
            format!("set date {}", now.format("%m-%d-%y")),
            "date".to_string(),
            format!("set time {}", now.format(&self.endpoint.clock_time_format)),
            "time".to_string(),
        ]
    }

    /// Query data (the endpoint's default command unless `command` is given) and
    /// optionally append it to the current data file.
    pub fn get_data(&mut self, command: Option<&str>, save: bool) -> AppResult<Reading> {
        self.get_data_at(command, save, Utc::now())
    }

    /// As [`get_data`](Self::get_data), filing the reading under `now`.
    pub fn get_data_at(
        &mut self,
        command: Option<&str>,
        save: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Reading> {
        let command = command.unwrap_or(&self.endpoint.get_data).to_string();
        debug!(endpoint = %self.endpoint.name, %command, save, "get_data");
        let text = self.converse(&command)?;

        let persistence = if save {
            match self.logger.append(now, &text) {
                Ok(appended) => Persistence::Written(appended),
                Err(e) => {
                    warn!(endpoint = %self.endpoint.name, error = %e, "reading not saved");
                    Persistence::Failed(e)
                }
            }
        } else {
            Persistence::Suppressed
        };

        Ok(Reading {
            timestamp: now,
            text,
            persistence,
        })
    }

    /// Download the whole record buffer to a dump file and stage it.
    pub fn get_all_buffered(&mut self, kind: RecordKind) -> AppResult<BufferDump> {
        self.get_all_buffered_at(kind, Utc::now())
    }

    pub fn get_all_buffered_at(
        &mut self,
        kind: RecordKind,
        now: DateTime<Utc>,
    ) -> AppResult<BufferDump> {
        let adapter = self.adapter;
        let name = self.endpoint.name.clone();
        let dir = self.endpoint.data_dir();
        let path = dump_path(&dir, &name, kind.command(), now);

        let (drain, finished) = {
            let mut link = Link::open(self.transport.as_mut())?;

            let count_query = format!("no of {kind}");
            let count = match adapter.converse(&mut link, &count_query, true) {
                Ok(reply) => parse_record_count(&reply),
                Err(e) => {
                    warn!(endpoint = %name, error = %e, "record count unavailable");
                    None
                }
            }
            .unwrap_or_else(|| kind.capacity());
            info!(endpoint = %name, %kind, count, "draining record buffer");

            let mut dump = DumpFile::create(path.clone(), &self.endpoint.dump_header)?;
            let drain = drain_buffer(&adapter, &mut link, &name, kind, count, &mut dump);
            (drain, dump.finish())
        };

        let Drain {
            chunks,
            records,
            write_error,
        } = drain;
        let write_error = match (write_error, finished) {
            (Some(e), _) | (None, Err(e)) => Some(e),
            (None, Ok(_)) => None,
        };
        let staged = match &write_error {
            Some(e) => {
                warn!(endpoint = %name, file = %path.display(), error = %e, "buffer dump incomplete");
                None
            }
            None => {
                info!(endpoint = %name, file = %path.display(), records, "buffer dump complete");
                self.endpoint
                    .staging()
                    .map(|staging| staging.stage(&path, &dir))
            }
        };
        Ok(BufferDump {
            path,
            records,
            chunks,
            staged,
            write_error,
        })
    }

    /// `set {name} {value}`
    pub fn set_parameter(&mut self, name: &str, value: &str) -> AppResult<String> {
        self.converse(&format!("set {name} {value}"))
    }

    /// `{name}`
    pub fn get_parameter(&mut self, name: &str) -> AppResult<String> {
        self.converse(name)
    }

    /// Current ozone concentration.
    pub fn get_o3(&mut self) -> AppResult<String> {
        self.get_parameter("o3")
    }

    /// Calibrator target level.
    pub fn o3_setting(&mut self) -> AppResult<String> {
        self.get_parameter("o3 setting")
    }

    /// Set the calibrator target level.
    pub fn set_o3_conc(&mut self, level: u32) -> AppResult<String> {
        let reply = self.set_parameter("o3 conc", &level.to_string())?;
        info!(endpoint = %self.endpoint.name, level, reply = %reply, "o3 level set");
        Ok(reply)
    }
}

/// What [`drain_buffer`] collected before it stopped.
struct Drain {
    chunks: Vec<CommandOutcome>,
    records: usize,
    write_error: Option<DaqError>,
}

/// Request `count` records newest first, writing each reply to `dump`.
///
/// A failed exchange is recorded and the drain goes on; a failed write ends it.
fn drain_buffer<W: Write>(
    adapter: &ProtocolAdapter,
    link: &mut Link<'_>,
    name: &str,
    kind: RecordKind,
    count: usize,
    dump: &mut DumpFile<W>,
) -> Drain {
    let mut drain = Drain {
        chunks: Vec::new(),
        records: 0,
        write_error: None,
    };
    for (index, retrieve) in buffer_requests(count) {
        let command = format!("{kind} {index} {retrieve}");
        let result = adapter.converse(link, &command, true);
        match &result {
            Ok(reply) => match dump.write_chunk(reply) {
                Ok(_) => drain.records += retrieve,
                Err(e) => drain.write_error = Some(e),
            },
            Err(e) => warn!(endpoint = %name, %command, error = %e, "chunk failed"),
        }
        drain.chunks.push(CommandOutcome { command, result });
        if drain.write_error.is_some() {
            break;
        }
    }
    drain
}

fn summarize(outcomes: &[CommandOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(reply) => format!("{}: {}", o.command, reply),
            Err(e) => format!("{}: error: {}", o.command, e),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_requests() {
        assert_eq!(buffer_requests(25), vec![(25, 10), (15, 10), (5, 5)]);
        assert_eq!(buffer_requests(10), vec![(10, 10)]);
        assert_eq!(buffer_requests(3), vec![(3, 3)]);
        assert!(buffer_requests(0).is_empty());
        assert_eq!(buffer_requests(1792).len(), 180);
    }

    #[test]
    fn test_parse_record_count() {
        assert_eq!(parse_record_count("no of lrec 25"), Some(25));
        assert_eq!(parse_record_count("1792 recs"), Some(1792));
        assert_eq!(parse_record_count("bad cmd"), None);
    }

    /// Accepts `lines` newline-terminated writes, then reports a full disk.
    struct FullAfter {
        lines: usize,
    }

    impl Write for FullAfter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.lines == 0 {
                return Err(std::io::Error::other("disk full"));
            }
            if buf.contains(&b'\n') {
                self.lines -= 1;
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_drain_stops_at_first_write_failure() {
        let mut sim = crate::transport::SimulatedTransport::new().with_responder(|command| {
            let retrieve: usize = command.rsplit(' ').next()?.parse().ok()?;
            Some(vec!["05:00 01-01-24 flags 0C100400 o3 1.0"; retrieve].join("\n"))
        });
        let log = sim.log();
        let adapter = ProtocolAdapter::new(0x80 | 49, Quiescence::default());
        // header plus the first chunk of ten
        let out = FullAfter { lines: 11 };
        let mut dump = DumpFile::from_writer(PathBuf::from("dump.dat"), out, "header").unwrap();

        let drain = {
            let mut link = Link::open(&mut sim).unwrap();
            drain_buffer(&adapter, &mut link, "t", RecordKind::Lrec, 25, &mut dump)
        };

        assert_eq!(log.commands(), vec!["lrec 25 10", "lrec 15 10"]);
        assert_eq!(drain.records, 10);
        assert_eq!(drain.chunks.len(), 2);
        assert!(drain.chunks.iter().all(|c| c.is_ok()));
        assert!(matches!(drain.write_error, Some(DaqError::Persistence { .. })));
        assert_eq!(dump.lines_written(), 10);
    }

    #[test]
    fn test_record_kind() {
        assert_eq!("LREC".parse::<RecordKind>().unwrap(), RecordKind::Lrec);
        assert_eq!(RecordKind::Srec.capacity(), 4096);
        assert_eq!(RecordKind::Lrec.to_string(), "lrec");
        assert!("xrec".parse::<RecordKind>().is_err());
    }
}
