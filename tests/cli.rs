//! Command-line integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("coded-exposure").unwrap();
    cmd.current_dir(dir);
    cmd
}

/// Temp dir holding the demo background and object
fn demo_dir(size: u32) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["demo", "-o", "demo", "--size", &size.to_string()])
        .assert()
        .success();
    dir
}

#[test]
fn test_info() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("coded-exposure v"))
        .stdout(predicate::str::contains("Config File Locations"));
}

#[test]
fn test_code_prints_mura() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["code", "--kind", "mura", "--length", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0110100"));
}

#[test]
fn test_unknown_code_kind_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["code", "--kind", "spiral"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("spiral"));
}

#[test]
fn test_config_file_sets_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("settings.toml");
    fs::write(&config, "[blur]\ncode_kind = \"box\"\ncode_length = 5\n").unwrap();
    cmd(dir.path())
        .args(["code", "--config", "settings.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("11111"));

    // Command-line values win over the file
    cmd(dir.path())
        .args(["code", "--config", "settings.toml", "--length", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Length:        3"));
}

#[test]
fn test_missing_input_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["blur", "nope.png", "nope_bg.png"])
        .assert()
        .code(3);
}

#[test]
fn test_invalid_lambda_exit_code() {
    let dir = demo_dir(64);
    cmd(dir.path())
        .args(["deblur", "demo/background.png", "--lambda", "0", "-q"])
        .assert()
        .code(2);
}

#[test]
fn test_blur_then_deblur_with_session() {
    let dir = demo_dir(96);
    cmd(dir.path())
        .args([
            "blur",
            "demo/object.png",
            "demo/background.png",
            "--offset",
            "16,16",
            "--kind",
            "mura",
            "--length",
            "7",
            "--angle",
            "20",
            "-o",
            "blur",
        ])
        .assert()
        .success();
    for file in ["blurred.png", "blurred_foreground.png", "psf.png", "params.json"] {
        assert!(dir.path().join("blur").join(file).is_file(), "missing {}", file);
    }

    cmd(dir.path())
        .args([
            "deblur",
            "blur/blurred.png",
            "--kind",
            "mura",
            "--length",
            "7",
            "--quad",
            "10,10,80,10,80,60,10,60",
            "--reference",
            "demo/background.png",
            "--session",
            "-o",
            "deblur",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("PSNR"));
    assert!(dir.path().join("deblur/deblurred.png").is_file());
    assert!(dir.path().join("deblur/deblurred_region.png").is_file());

    let sessions: Vec<_> = fs::read_dir(dir.path().join("deblur/sessions"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(sessions.len(), 1);
    let text = fs::read_to_string(sessions[0].path()).unwrap();
    assert!(text.contains("\"deblur\""));
    assert!(text.contains("\"quad\""));
}

#[test]
fn test_sweep_writes_csv_and_json() {
    let dir = demo_dir(64);
    cmd(dir.path())
        .args([
            "sweep",
            "demo/object.png",
            "demo/background.png",
            "--start",
            "0",
            "--end",
            "20",
            "--step",
            "10",
            "--kind",
            "mura",
            "--length",
            "7",
            "-o",
            "sweep",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Best angle"));

    let files: Vec<_> = fs::read_dir(dir.path().join("sweep"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    let csv = files
        .iter()
        .find(|p| p.extension().is_some_and(|e| e == "csv"))
        .expect("csv written");
    let text = fs::read_to_string(csv).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "angle,psnr,elapsed_seconds,error");
    assert_eq!(lines.len(), 3);
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "json")));
}

#[test]
fn test_verbose_blur_reports_load_and_save_stages() {
    let dir = demo_dir(64);
    cmd(dir.path())
        .args([
            "blur",
            "demo/object.png",
            "demo/background.png",
            "--kind",
            "box",
            "--length",
            "5",
            "-o",
            "blur",
            "-v",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stage: Loading"))
        .stdout(predicate::str::contains("Stage: Blurring"))
        .stdout(predicate::str::contains("Stage: Saving"))
        .stdout(predicate::str::contains("Completed in"));
}

#[test]
fn test_sweep_takes_newest_session_from_directory() {
    let dir = demo_dir(64);
    cmd(dir.path())
        .args([
            "deblur",
            "demo/background.png",
            "--kind",
            "box",
            "--length",
            "5",
            "--session",
            "-o",
            "deblur",
            "-q",
        ])
        .assert()
        .success();

    cmd(dir.path())
        .args([
            "sweep",
            "demo/object.png",
            "demo/background.png",
            "--start",
            "0",
            "--end",
            "10",
            "--step",
            "10",
            "--session",
            "deblur/sessions",
            "-o",
            "sweep",
            "-v",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Using session"));

    let json = fs::read_dir(dir.path().join("sweep"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|e| e == "json"))
        .expect("json written");
    let text = fs::read_to_string(json).unwrap();
    assert!(text.contains("\"code_kind\": \"box\""));
    assert!(text.contains("\"code_length\": 5"));
}

#[test]
fn test_sweep_with_empty_session_directory_fails() {
    let dir = demo_dir(64);
    fs::create_dir_all(dir.path().join("empty")).unwrap();
    cmd(dir.path())
        .args([
            "sweep",
            "demo/object.png",
            "demo/background.png",
            "--session",
            "empty",
            "-q",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no session logs"));
}

#[test]
fn test_constant_background_rejects_diagonal_motion() {
    let dir = demo_dir(64);
    cmd(dir.path())
        .args([
            "deblur",
            "demo/background.png",
            "--method",
            "constant-background",
            "--angle",
            "30",
            "-q",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("horizontal motion"));
}
