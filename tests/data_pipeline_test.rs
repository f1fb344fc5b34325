//! Rotation and staging of data files.

use chrono::{DateTime, TimeZone, Utc};
use std::fs::{self, File};
use std::io::Read;
use tempfile::TempDir;
use thermo_daq::bin_router::BinWidth;
use thermo_daq::data::{stage, DataLogger, StagingPipeline};

const HEADER: &str = "pcdate pctime time date flags o3";

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

fn logger(dir: &TempDir, zip: bool) -> DataLogger {
    DataLogger::new("tei49i", BinWidth::new(60).unwrap(), HEADER, &dir.path().join("data"))
        .with_staging(StagingPipeline::new(dir.path().join("staging"), zip))
}

#[test]
fn test_rotation_stages_exactly_the_finished_file() {
    let dir = TempDir::new().unwrap();
    let logger = logger(&dir, false);

    let first = logger.append(at(10, 58), "P1").unwrap();
    assert!(first.rotation.is_none());
    let second = logger.append(at(11, 2), "P2").unwrap();
    let third = logger.append(at(11, 30), "P3").unwrap();
    assert!(third.rotation.is_none());
    assert_eq!(second.file, third.file);

    let rotation = second.rotation.expect("boundary crossed");
    assert_eq!(rotation.finished, first.file);
    let artifact = rotation.staged.expect("staging configured").unwrap();

    let staged: Vec<_> = fs::read_dir(dir.path().join("staging").join("tei49i"))
        .unwrap()
        .collect();
    assert_eq!(staged.len(), 1);

    let staged_text = fs::read_to_string(&artifact.path).unwrap();
    let lines: Vec<_> = staged_text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], HEADER);
    assert!(lines[1].ends_with(" P1"));

    let active = fs::read_to_string(&third.file).unwrap();
    let lines: Vec<_> = active.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], HEADER);
    assert!(lines[1].ends_with(" P2"));
    assert!(lines[2].ends_with(" P3"));
}

#[test]
fn test_concurrent_appends_stage_once_per_transition() {
    let dir = TempDir::new().unwrap();
    let logger = logger(&dir, false);
    logger.append(at(10, 58), "P0").unwrap();

    let appended: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let logger = &logger;
                scope.spawn(move || logger.append(at(11, 2), &format!("T{i}")).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let rotations: Vec<_> = appended.iter().filter_map(|a| a.rotation.as_ref()).collect();
    assert_eq!(rotations.len(), 1);
    assert!(rotations[0].staged.as_ref().unwrap().is_ok());
    let staged = fs::read_dir(dir.path().join("staging").join("tei49i"))
        .unwrap()
        .count();
    assert_eq!(staged, 1);

    let active = fs::read_to_string(&appended[0].file).unwrap();
    assert_eq!(active.lines().count(), 1 + 8);
}

#[test]
fn test_endpoints_rotate_independently_in_parallel() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let loggers: Vec<_> = ["tei49c", "tei49i"]
        .into_iter()
        .map(|name| {
            DataLogger::new(name, BinWidth::new(60).unwrap(), HEADER, &data)
                .with_staging(StagingPipeline::new(dir.path().join("staging"), false))
        })
        .collect();

    let rotations: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = loggers
            .iter()
            .map(|logger| {
                scope.spawn(move || {
                    [at(10, 58), at(11, 2), at(11, 3), at(12, 1)]
                        .into_iter()
                        .map(|t| logger.append(t, "o3 1.0").unwrap())
                        .filter(|a| a.rotation.is_some())
                        .count()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(rotations, vec![2, 2]);
    for name in ["tei49c", "tei49i"] {
        let staged = fs::read_dir(dir.path().join("staging").join(name))
            .unwrap()
            .count();
        assert_eq!(staged, 2);
    }
}

#[test]
fn test_line_timestamp_format() {
    let dir = TempDir::new().unwrap();
    let logger = logger(&dir, false);
    let appended = logger.append(at(10, 58), "o3 35.1").unwrap();
    let text = fs::read_to_string(appended.file).unwrap();
    let line = text.lines().nth(1).unwrap();
    let (stamp, payload) = line.split_at(19);
    assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").is_ok());
    assert_eq!(payload, " o3 35.1");
}

#[test]
fn test_zip_round_trip_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let logger = logger(&dir, true);
    let first = logger.append(at(10, 58), "flags 0C100000 o3 30.1").unwrap();
    logger.append(at(10, 59), "flags 0C100000 o3 30.4").unwrap();
    let original = fs::read(&first.file).unwrap();

    let rotated = logger.append(at(11, 0), "flags 0C100000 o3 31.0").unwrap();
    let artifact = rotated.rotation.unwrap().staged.unwrap().unwrap();
    assert!(artifact.compressed);
    assert_eq!(
        artifact.path,
        dir.path().join("staging").join("tei49i").join("tei49i-202401011100.zip")
    );

    let mut archive = zip::ZipArchive::new(File::open(&artifact.path).unwrap()).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_name("tei49i-202401011100.dat").unwrap();
    let mut restored = Vec::new();
    entry.read_to_end(&mut restored).unwrap();
    assert_eq!(restored, original);
}

#[test]
fn test_staging_dir_named_after_endpoint_dir() {
    let dir = TempDir::new().unwrap();
    let ep_dir = dir.path().join("data").join("tei49c");
    fs::create_dir_all(&ep_dir).unwrap();
    let file = ep_dir.join("tei49c-202401011100.dat");
    fs::write(&file, "h\n").unwrap();

    let artifact = stage(&file, &ep_dir, &dir.path().join("out"), false).unwrap();
    assert_eq!(artifact.path, dir.path().join("out").join("tei49c").join("tei49c-202401011100.dat"));
    assert!(file.exists());
}
