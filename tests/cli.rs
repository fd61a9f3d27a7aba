use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn stepmark(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stepmark"))
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_run_exits_with_the_failing_step_code() {
    let dir = TempDir::new().unwrap();
    let out = stepmark(
        dir.path(),
        &["run", "-q", "-s", "ok: true", "-s", "boom:$ exit 3", "-s", "never: true"],
    );
    assert_eq!(out.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("boom"), "{stderr}");
    assert!(dir.path().join("ok.done").is_file());
    assert!(!dir.path().join("boom.done").exists());
    assert!(!dir.path().join("never.done").exists());
}

#[test]
fn test_plan_file_and_status() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("plan.txt"),
        "# three stages\nalign: touch aligned\ncall:$ test -e aligned && touch called\nfilter: false\n",
    )
    .unwrap();

    let out = stepmark(
        dir.path(),
        &["run", "--plan", "plan.txt", "--marker-dir", "markers"],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(dir.path().join("called").is_file());

    let out = stepmark(
        dir.path(),
        &["status", "--plan", "plan.txt", "--marker-dir", "markers"],
    );
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    let states: Vec<&str> = stdout
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    assert_eq!(states, vec!["done", "done", "pending"]);
}

#[test]
fn test_check_reports_missing_programs() {
    let dir = TempDir::new().unwrap();
    let out = stepmark(dir.path(), &["check", "-s", "x: no-such-tool-xyz --help"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no-such-tool-xyz"));

    let out = stepmark(dir.path(), &["check", "-s", "x: sh -c true"]);
    assert!(out.status.success());
}

#[test]
fn test_bad_step_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let out = stepmark(dir.path(), &["run", "-s", "missing separator"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid step"));
}
