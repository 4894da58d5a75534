//! Integration tests for the command-line interface.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_metrics-gen");

/// Helper to create a small crate with one define and one timed function
fn setup_test_crate() -> TempDir {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    fs::create_dir(&src).unwrap();

    fs::write(
        src.join("main.rs"),
        r#"mod worker;

// +trace:define
fn main() {
    worker::work();
}
"#,
    )
    .unwrap();

    fs::write(
        src.join("worker.rs"),
        r#"// +trace:func-exec-time name=work_seconds
pub fn work() {
    println!("working");
}
"#,
    )
    .unwrap();

    fs::write(
        dir.path().join("Cargo.toml"),
        r#"[package]
name = "test-crate"
version = "0.1.0"
edition = "2021"
"#,
    )
    .unwrap();

    dir
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_generate_help() {
    let output = Command::new(BIN)
        .args(["generate", "--help"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Render every directive"));
    assert!(stdout.contains("--inplace"));
    assert!(stdout.contains("--suffix"));
}

#[test]
fn test_generate_in_place() {
    let dir = setup_test_crate();

    let output = run(dir.path(), &["generate", "-r", "src", "-i", "--no-fetch"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("Wrote"));
    assert!(stdout.contains("Summary:"));

    let worker = fs::read_to_string(dir.path().join("src/worker.rs")).unwrap();
    assert!(worker.contains("\"work_seconds\""));
    assert!(worker.contains("let _metrics_gen_timer = "));
    let main = fs::read_to_string(dir.path().join("src/main.rs")).unwrap();
    assert!(main.contains("fn metrics_gen_init()"));
}

#[test]
fn test_generate_twice_fails() {
    let dir = setup_test_crate();

    let first = run(dir.path(), &["generate", "-r", "src", "-i", "--no-fetch"]);
    assert!(first.status.success());
    let after_first = fs::read_to_string(dir.path().join("src/main.rs")).unwrap();

    let second = run(dir.path(), &["generate", "-r", "src", "-i", "--no-fetch"]);
    assert_eq!(second.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("already"), "{stderr}");
    assert_eq!(
        fs::read_to_string(dir.path().join("src/main.rs")).unwrap(),
        after_first
    );
}

#[test]
fn test_dry_run_with_diff() {
    let dir = setup_test_crate();
    let before = fs::read_to_string(dir.path().join("src/worker.rs")).unwrap();

    let output = run(
        dir.path(),
        &["generate", "-r", "src", "-s", "gen", "-n", "--diff"],
    );

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DRY RUN"));
    assert!(stdout.contains("Would write"));
    assert!(stdout.contains("worker_gen.rs"));
    assert!(stdout.contains("+// +trace:begin-generated"));

    assert_eq!(
        fs::read_to_string(dir.path().join("src/worker.rs")).unwrap(),
        before
    );
    assert!(!dir.path().join("src/worker_gen.rs").exists());
}

#[test]
fn test_output_mode_is_required() {
    let dir = setup_test_crate();

    let output = run(dir.path(), &["generate", "-r", "src"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("in-place output or a suffix"), "{stderr}");
}

#[test]
fn test_conflicting_output_modes() {
    let dir = setup_test_crate();

    let output = run(dir.path(), &["generate", "-r", "src", "-i", "-s", "gen"]);

    assert!(!output.status.success());
}

#[test]
fn test_config_file_is_picked_up() {
    let dir = setup_test_crate();
    fs::write(
        dir.path().join("metrics-gen.toml"),
        "recursive-dirs = [\"src\"]\nsuffix = \"inst\"\nprovider = \"metrics\"\nfetch-dependencies = false\n",
    )
    .unwrap();

    let output = run(dir.path(), &["generate"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let generated = fs::read_to_string(dir.path().join("src/worker_inst.rs")).unwrap();
    assert!(generated.contains("metrics::histogram!(\"work_seconds\")"));
}

#[test]
fn test_scan_lists_directives() {
    let dir = setup_test_crate();

    let output = run(dir.path(), &["scan", "-r", "src"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("main.rs"));
    assert!(stdout.contains("worker.rs"));
    assert!(stdout.contains("func-exec-time"));
    assert!(stdout.contains("name=work_seconds"));
    assert!(stdout.contains("2 directive(s) in 2 file(s)"));
}
