//! Instrument session operations against the simulated transport.

use chrono::{DateTime, Local, TimeZone, Utc};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use thermo_daq::config::Settings;
use thermo_daq::endpoint::InstrumentEndpoint;
use thermo_daq::session::{InstrumentSession, Persistence, RecordKind};
use thermo_daq::transport::{Quiescence, SimulatedLog, SimulatedTransport};
use thermo_daq::DaqError;

fn endpoint(root: &Path, name: &str) -> InstrumentEndpoint {
    let toml = format!(
        r#"
        [paths]
        data = "{data}"
        staging = "{staging}"

        [storage]
        reporting_interval = 60

        [[endpoints]]
        name = "{name}"
        instrument_id = 49
        data_header = "pcdate pctime time date flags o3"
        get_config = ["mode", "range", "avg time"]
        set_config = ["set mode remote", "set range 1"]

        [endpoints.transport]
        kind = "simulated"
        "#,
        data = root.join("data").display(),
        staging = root.join("staging").display(),
    );
    let settings = Settings::from_toml_str(&toml).unwrap();
    InstrumentEndpoint::from_config(settings.endpoint(name).unwrap(), &settings).unwrap()
}

fn session(
    endpoint: InstrumentEndpoint,
    sim: SimulatedTransport,
) -> (InstrumentSession, SimulatedLog) {
    let log = sim.log();
    let quiet = Quiescence::default();
    (InstrumentSession::with_transport(endpoint, Box::new(sim), quiet), log)
}

fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

#[test]
fn test_calibrator_scenario_rotates_and_stages_on_second_poll() {
    let dir = TempDir::new().unwrap();
    let sim =
        SimulatedTransport::new().with_reply("lrec", "10:58 01-01-24 flags 0C100000 o3 50.2");
    let (mut session, _) = session(endpoint(dir.path(), "calibrator"), sim);

    let first = session.get_data_at(None, true, utc(10, 58)).unwrap();
    let Persistence::Written(first_write) = first.persistence else {
        panic!("first reading not written");
    };
    let first_file = dir.path().join("data/calibrator/calibrator-202401011100.dat");
    assert_eq!(first_write.file, first_file);
    assert!(first_write.rotation.is_none());
    let staged = dir.path().join("staging/calibrator/calibrator-202401011100.dat");
    assert!(!staged.exists());

    let second = session.get_data_at(None, true, utc(11, 2)).unwrap();
    let Persistence::Written(second_write) = second.persistence else {
        panic!("second reading not written");
    };
    assert_eq!(
        second_write.file,
        dir.path().join("data/calibrator/calibrator-202401011200.dat")
    );
    let rotation = second_write.rotation.unwrap();
    assert_eq!(rotation.finished, first_file);
    assert_eq!(rotation.staged.unwrap().unwrap().path, staged);
    assert_eq!(fs::read(&staged).unwrap(), fs::read(&first_file).unwrap());
}

#[test]
fn test_get_data_returns_tidy_text_and_timestamp() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new()
        .with_echo(true)
        .with_reply("o3", "o3 35.2 ppb*1F");
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), sim);

    let reading = session.get_data_at(Some("o3"), false, utc(10, 58)).unwrap();
    assert_eq!(reading.text, "o3 35.2 ppb");
    assert_eq!(reading.timestamp, utc(10, 58));
    assert!(matches!(reading.persistence, Persistence::Suppressed));
    assert!(!dir.path().join("data").exists());
    assert_eq!(log.commands(), vec!["o3"]);
}

#[test]
fn test_default_command_is_endpoint_get_data() {
    let dir = TempDir::new().unwrap();
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), SimulatedTransport::new());
    let reading = session.get_data(None, false).unwrap();
    assert!(reading.text.starts_with("(simulated)"));
    assert!(reading.text.contains("flags D800500 o3 0.394"));
    assert_eq!(log.commands(), vec!["lrec"]);
}

#[test]
fn test_persistence_failure_keeps_reading() {
    let dir = TempDir::new().unwrap();
    let ep = endpoint(dir.path(), "tei49i");
    fs::write(dir.path().join("data"), "a file where a directory should be").unwrap();
    let sim = SimulatedTransport::new().with_reply("lrec", "12:00 01-01-24 o3 1.0");
    let (mut session, _) = session(ep, sim);

    let reading = session.get_data_at(None, true, utc(12, 0)).unwrap();
    assert_eq!(reading.text, "12:00 01-01-24 o3 1.0");
    assert!(matches!(
        reading.persistence,
        Persistence::Failed(DaqError::Persistence { .. })
    ));
}

#[test]
fn test_link_failure_propagates_and_closes() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new().failing_on("lrec");
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), sim);

    let result = session.get_data(None, true);
    assert!(matches!(result, Err(DaqError::Read { .. })));
    assert_eq!(log.events(), vec!["open", "send lrec", "close"]);
}

#[test]
fn test_get_config_in_declaration_order() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new()
        .with_reply("mode", "mode remote")
        .with_reply("range", "range 1")
        .with_reply("avg time", "avg time 3");
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), sim);

    let outcomes = session.get_config().unwrap();
    let replies: Vec<_> = outcomes
        .iter()
        .map(|o| o.result.as_deref().unwrap().to_string())
        .collect();
    assert_eq!(replies, vec!["mode remote", "range 1", "avg time 3"]);
    assert_eq!(log.commands(), vec!["mode", "range", "avg time"]);
    assert_eq!(log.events().iter().filter(|e| *e == "open").count(), 1);
}

#[test]
fn test_set_config_syncs_clock_first_and_isolates_failures() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new().failing_on("set mode remote");
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), sim);
    let now = Local.with_ymd_and_hms(2024, 1, 1, 10, 58, 0).single().unwrap();

    let outcomes = session.set_config_at(now).unwrap();
    let commands: Vec<_> = outcomes.iter().map(|o| o.command.as_str()).collect();
    assert_eq!(
        commands,
        vec![
            "set date 01-01-24",
            "date",
            "set time 10:58",
            "time",
            "set mode remote",
            "set range 1"
        ]
    );
    assert_eq!(log.commands(), commands);
    assert!(outcomes[4].result.is_err());
    assert!(outcomes.iter().enumerate().all(|(i, o)| i == 4 || o.is_ok()));
}

#[test]
fn test_chunked_drain_of_25_records() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new()
        .with_reply("no of lrec", "no of lrec 25 recs")
        .with_responder(|command| {
            let mut words = command.split_whitespace();
            if words.next() != Some("lrec") {
                return None;
            }
            let index: usize = words.next()?.parse().ok()?;
            let retrieve: usize = words.next()?.parse().ok()?;
            let lines: Vec<String> = (0..retrieve)
                .map(|i| {
                    format!(
                        "05:{:02} 07-19-22 flags 0C100400 o3 30.{} hio3 0.000 pres 493.7",
                        index - i,
                        index - i
                    )
                })
                .collect();
            Some(lines.join("\n"))
        });
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), sim);
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 11, 2, 7).unwrap();

    let dump = session.get_all_buffered_at(RecordKind::Lrec, now).unwrap();
    assert_eq!(
        log.commands(),
        vec!["no of lrec", "lrec 25 10", "lrec 15 10", "lrec 5 5"]
    );
    assert_eq!(dump.records, 25);
    assert!(dump.chunks.iter().all(|c| c.is_ok()));
    assert!(dump.write_error.is_none());
    assert_eq!(
        dump.path,
        dir.path().join("data/tei49i/tei49i_all_lrec-20240101110207.dat")
    );

    let text = fs::read_to_string(&dump.path).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 26);
    assert_eq!(lines[0], thermo_daq::data::DEFAULT_DUMP_HEADER);
    assert_eq!(lines[1], "05:25 07-19-22 0C100400 30.25 0.000 493.7");
    assert_eq!(lines[25], "05:01 07-19-22 0C100400 30.1 0.000 493.7");

    let staged = dump.staged.unwrap().unwrap();
    assert_eq!(
        staged.path,
        dir.path().join("staging/tei49i/tei49i_all_lrec-20240101110207.dat")
    );
}

#[test]
fn test_drain_leaves_no_file_when_link_cannot_open() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new().refusing_connections();
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), sim);

    let result = session.get_all_buffered(RecordKind::Lrec);
    assert!(matches!(result, Err(DaqError::Connection { .. })));
    assert!(log.commands().is_empty());
    let endpoint_dir = dir.path().join("data/tei49i");
    let leftovers = fs::read_dir(&endpoint_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_drain_falls_back_to_capacity() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new()
        .with_reply("no of srec", "bad cmd")
        .with_responder(|command| command.starts_with("srec ").then(String::new));
    let (mut session, log) = session(endpoint(dir.path(), "tei49i"), sim);

    let dump = session.get_all_buffered(RecordKind::Srec).unwrap();
    let commands = log.commands();
    assert_eq!(commands.len(), 1 + 4096 / 10 + 1);
    assert_eq!(commands[1], "srec 4096 10");
    assert_eq!(commands.last().map(String::as_str), Some("srec 6 6"));
    assert_eq!(dump.records, 4096);
}

#[test]
fn test_parameters() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedTransport::new()
        .with_reply("set o3 conc 50", "set o3 conc 50 ok")
        .with_reply("o3 setting", "o3 setting 50")
        .with_reply("o3", "o3 49.8 ppb");
    let (mut session, log) = session(endpoint(dir.path(), "tei49c"), sim);

    assert_eq!(session.set_o3_conc(50).unwrap(), "set o3 conc 50 ok");
    assert_eq!(session.o3_setting().unwrap(), "o3 setting 50");
    assert_eq!(session.get_o3().unwrap(), "o3 49.8 ppb");
    session.set_parameter("avg time", "3").unwrap();
    session.get_parameter("avg time").unwrap();
    assert_eq!(
        log.commands(),
        vec!["set o3 conc 50", "o3 setting", "o3", "set avg time 3", "avg time"]
    );
}
