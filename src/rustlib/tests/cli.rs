use assert_cmd::Command;
use predicates::prelude::*;

fn spikedetect() -> Command {
    Command::cargo_bin("spikedetect").unwrap()
}

#[test]
fn simulate_then_detect_writes_spikes() {
    let dir = tempfile::tempdir().unwrap();
    let recording = dir.path().join("recording");
    let config = dir.path().join("tetrode.yaml");
    let truth = dir.path().join("truth.csv");
    let spikes = dir.path().join("spikes.csv");

    spikedetect()
        .args(["simulate", "--duration", "0.5", "--seed", "7", "--output"])
        .arg(&recording)
        .arg("--truth")
        .arg(&truth)
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulated 1 record(s), 4 channels"));

    spikedetect()
        .args(["init-config", "--type", "tetrode", "--channels", "0,1,2,3", "--output"])
        .arg(&config)
        .assert()
        .success();

    spikedetect()
        .arg("detect")
        .arg("--input")
        .arg(recording.join("structure.oebin"))
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(&spikes)
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulated-100.0:"))
        .stdout(predicate::str::contains("spikes in 15000 samples"));

    let truth_rows = std::fs::read_to_string(&truth).unwrap().lines().count();
    let spike_rows = std::fs::read_to_string(&spikes).unwrap().lines().count();
    assert!(truth_rows > 1);
    assert_eq!(spike_rows, truth_rows);
}

#[test]
fn init_config_rejects_mismatched_group() {
    let dir = tempfile::tempdir().unwrap();
    spikedetect()
        .args(["init-config", "--type", "stereotrode", "--channels", "0,1,2", "--output"])
        .arg(dir.path().join("bad.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs 2 source channels"));
    assert!(!dir.path().join("bad.yaml").exists());
}

#[test]
fn detect_reports_missing_recording() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("single.yaml");
    spikedetect()
        .args(["init-config", "--type", "single", "--channels", "0", "--output"])
        .arg(&config)
        .assert()
        .success();

    spikedetect()
        .arg("detect")
        .arg("--input")
        .arg(dir.path().join("missing").join("structure.oebin"))
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn detect_reads_csv_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("single.yaml");
    let table = dir.path().join("signal.csv");

    let mut rows = vec!["ch1".to_string()];
    rows.extend((0..3000).map(|i| match i {
        1199 => "-70".to_string(),
        1200 => "-100".to_string(),
        1201 => "-60".to_string(),
        _ => "0".to_string(),
    }));
    std::fs::write(&table, rows.join("\n")).unwrap();

    spikedetect()
        .args(["init-config", "--type", "single", "--channels", "0", "--output"])
        .arg(&config)
        .assert()
        .success();

    spikedetect()
        .arg("detect")
        .arg("--input")
        .arg(&table)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("spikes in 3000 samples"));
}
