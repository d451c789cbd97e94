use std::io::Write;
use std::process::Command;

fn run_reclaim(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_reclaim"))
        .args(args)
        .output()
        .expect("failed to execute reclaim");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn assert_success(args: &[&str]) -> (String, String) {
    let (stdout, stderr, success) = run_reclaim(args);
    assert!(success, "command should succeed, stderr:\n{}", stderr);
    (stdout, stderr)
}

#[test]
fn test_scenario_cycle() {
    let (stdout, _) = assert_success(&["scenario", "cycle"]);
    assert_eq!(
        stdout,
        "cycle:\n  table reclaimed: true\n  closure reclaimed: true\n"
    );
}

#[test]
fn test_scenario_hold_ref() {
    let (stdout, _) = assert_success(&["scenario", "hold-ref"]);
    assert!(stdout.contains("before collection: held"));
    assert!(stdout.contains("after first cycle: collected"));
    assert!(stdout.contains("after second cycle: collected"));
}

#[test]
fn test_scenario_finalizer_order() {
    let (stdout, _) = assert_success(&["scenario", "finalizer-order"]);
    assert!(stdout.contains("finalized: 10 then 7"));
}

#[test]
fn test_config_prints_defaults() {
    let (stdout, _) = assert_success(&["config"]);
    assert!(stdout.contains("initial_threshold = 65536"));
    assert!(stdout.contains("stats_format = \"human\""));
}

#[test]
fn test_config_file_overrides() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "string_table_floor = 16").unwrap();
    writeln!(file, "heap_limit = 1000000").unwrap();
    let path = file.path().to_str().unwrap();

    let (stdout, _) = assert_success(&["config", "--config", path]);
    assert!(stdout.contains("string_table_floor = 16"));
    assert!(stdout.contains("heap_limit = 1000000"));

    let (stdout, _) = assert_success(&["scenario", "intern-shrink", "--config", path]);
    assert!(stdout.contains("floor: 16"));
}

#[test]
fn test_invalid_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "string_table_floor = 0").unwrap();
    let path = file.path().to_str().unwrap();

    let (_, stderr, success) = run_reclaim(&["config", "--config", path]);
    assert!(!success);
    assert!(stderr.contains("string_table_floor"));
}

#[test]
fn test_stress_human_with_stats() {
    let (stdout, stderr) = assert_success(&[
        "stress", "--rounds", "3", "--tables", "50", "--strings", "50", "--userdata", "10",
        "--gc-stats",
    ]);
    assert!(stdout.starts_with("rounds: 3,"));
    assert!(stdout.contains("finalized:"));
    assert!(stderr.contains("[GC] Collections:"));
}

#[test]
fn test_stress_json() {
    let (stdout, _) = assert_success(&[
        "stress", "--rounds", "2", "--tables", "20", "--strings", "20", "--userdata", "5",
        "--stats-format", "json",
    ]);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["rounds"], 2);
    assert!(report["gc"]["cycles"].as_u64().unwrap() >= 1);
    assert!(report["live"]["tables"].is_u64());
}

#[test]
fn test_unknown_scenario_rejected() {
    let (_, _, success) = run_reclaim(&["scenario", "nonexistent"]);
    assert!(!success);
}
