//! Integration tests for the hpcload binary

use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Generate a replayed CSV dump into `dir` and return its path
fn generate_dump(dir: &Path) -> PathBuf {
    let dump = dir.join("jobs.csv");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hpcload");
    cmd.arg("generate")
        .arg("--config")
        .arg(fixture("experiment.toml"))
        .arg("--output")
        .arg(dir.join("trace.bin"))
        .arg("--dump")
        .arg(&dump)
        .arg("--replay");
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Wrote"));
    dump
}

#[test]
fn test_generate_writes_binary_trace() {
    let dir = TempDir::new().unwrap();
    generate_dump(dir.path());

    let bytes = std::fs::read(dir.path().join("trace.bin")).unwrap();
    let records = hpcload::trace_format::decode_records(bytes.as_slice()).unwrap();
    assert!(!records.is_empty());
    assert!(records.iter().any(|r| r.workflow_name.is_some()));
}

#[test]
fn test_generate_seed_override_changes_trace() {
    let dir = TempDir::new().unwrap();
    let run = |seed: &str, out: &str| {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hpcload");
        cmd.arg("generate")
            .arg("-c")
            .arg(fixture("experiment.toml"))
            .arg("-o")
            .arg(dir.path().join(out))
            .arg("--seed")
            .arg(seed);
        cmd.assert().success();
        std::fs::read(dir.path().join(out)).unwrap()
    };
    let a = run("1", "a.bin");
    let b = run("1", "b.bin");
    let c = run("2", "c.bin");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_debug_flag_enables_tracing() {
    let dir = TempDir::new().unwrap();
    let run = |debug: bool| {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hpcload");
        cmd.arg("generate")
            .arg("-c")
            .arg(fixture("experiment.toml"))
            .arg("-o")
            .arg(dir.path().join("t.bin"))
            .env_remove("RUST_LOG");
        if debug {
            cmd.arg("--debug");
        }
        cmd.assert()
    };

    run(true)
        .success()
        .stderr(predicate::str::contains("synthesis finished"))
        .stderr(predicate::str::contains("pattern fired"));
    run(false)
        .success()
        .stderr(predicate::str::contains("synthesis finished").not());
}

#[test]
fn test_analyze_text_report() {
    let dir = TempDir::new().unwrap();
    let dump = generate_dump(dir.path());

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hpcload");
    cmd.arg("analyze")
        .arg(&dump)
        .arg("--capacity")
        .arg("288")
        .arg("--manifests")
        .arg(fixture("manifests"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("=== Jobs"))
        .stdout(predicate::str::contains("=== Workflows"))
        .stdout(predicate::str::contains("=== Utilization (288 cores) ==="));
}

#[test]
fn test_analyze_json_report_to_file() {
    let dir = TempDir::new().unwrap();
    let dump = generate_dump(dir.path());
    let report_path = dir.path().join("report.json");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hpcload");
    cmd.arg("analyze")
        .arg(&dump)
        .arg("--capacity")
        .arg("288")
        .arg("--manifests")
        .arg(fixture("manifests"))
        .arg("--format")
        .arg("json")
        .arg("--timeline")
        .arg("--output")
        .arg(&report_path);
    cmd.assert().success();

    let text = std::fs::read_to_string(&report_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["workflows"]["incomplete"], 0);
    assert!(parsed["utilization"]["timeline"].is_array());
    assert!(parsed["job_groups"]["all"]["runtime"]["p95"].is_number());
}

#[test]
fn test_analyze_missing_trace_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hpcload");
    cmd.arg("analyze").arg("does-not-exist.csv").arg("--capacity").arg("10");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to open trace"));
}

#[test]
fn test_generate_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(
        &config,
        r#"
        seed = 1
        start = 0
        run_limit_s = 0

        [system]
        capacity_cores = 10

        [clock]
        inter_arrival = { kind = "constant", value = 1.0 }
        "#,
    )
    .unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hpcload");
    cmd.arg("generate").arg("-c").arg(&config).arg("-o").arg(dir.path().join("t.bin"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}
