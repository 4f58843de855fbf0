#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use tokenizers::{Tokenizer, models::wordlevel::WordLevel};

const NATIVE_SCRIPT: &str = r#"#!/bin/sh
text="$(cat "$1")"
case "$text" in
  "hello world") printf '===== TOKENS START=====\n1\n2\n===== TOKENS END ======\n' ;;
  "world hello") printf '===== TOKENS START=====\n2\n2\n===== TOKENS END ======\n' ;;
  *) exit 9 ;;
esac
"#;

fn write_reference(dir: &Path) {
    let vocab: HashMap<String, u32> = [("<unk>", 0), ("hello", 1), ("world", 2)]
        .into_iter()
        .map(|(token, id)| (token.to_owned(), id))
        .collect();
    let vocab_path = dir.join("vocab.json");
    fs::write(&vocab_path, serde_json::to_string(&vocab).expect("vocab")).expect("write vocab");

    let model = WordLevel::from_file(vocab_path.to_str().expect("utf8 path"), "<unk>".into())
        .expect("model");
    let mut tokenizer = Tokenizer::new(model);
    tokenizer.with_pre_tokenizer(Some(
        tokenizers::pre_tokenizers::whitespace::Whitespace::default(),
    ));
    fs::write(
        dir.join("tokenizer.json"),
        tokenizer.to_string(true).expect("serialize"),
    )
    .expect("write tokenizer");
}

fn project(fixtures: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write_reference(dir.path());
    fs::write(dir.path().join("native.sh"), NATIVE_SCRIPT).expect("native");
    fs::write(
        dir.path().join("build.sh"),
        "cp native.sh tokenizer && chmod +x tokenizer\n",
    )
    .expect("build script");
    let fixture_dir = dir.path().join("tests/input_texts");
    fs::create_dir_all(&fixture_dir).expect("fixtures");
    for (name, body) in fixtures {
        fs::write(fixture_dir.join(name), body).expect("fixture");
    }
    dir
}

fn run_cli(dir: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tp-conformance-cli"))
        .arg("--work-dir")
        .arg(dir)
        .args(["--build", "sh build.sh"])
        .args(extra)
        .output()
        .expect("run cli")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn green_run_exits_zero() {
    let dir = project(&[("hello.txt", "hello world\n")]);
    let output = run_cli(dir.path(), &[]);
    let text = stdout(&output);

    assert_eq!(output.status.code(), Some(0), "{text}");
    assert!(text.contains("test_file_1_hello_txt ... ok"), "{text}");
    assert!(text.contains("Ran 1 tests: passed=1 failed=0"), "{text}");
    assert!(text.trim_end().ends_with("OK"), "{text}");
    assert!(!dir.path().join("tokenizer").exists());
}

#[test]
fn mismatch_prints_diagnostics_and_exits_one() {
    let dir = project(&[("a.txt", "hello world"), ("b.txt", "world hello")]);
    let output = run_cli(dir.path(), &["--write-artifacts"]);
    let text = stdout(&output);

    assert_eq!(output.status.code(), Some(1), "{text}");
    assert!(text.contains("test_file_2_b_txt ... FAIL"), "{text}");
    assert!(text.contains("Mismatch in file: b.txt"), "{text}");
    assert!(text.contains("Mismatch detected at token index 1"), "{text}");
    assert!(text.contains("Native Token: 2 at position 1"), "{text}");
    assert!(text.contains("FAILED (failures=1)"), "{text}");

    let artifacts = dir.path().join("artifacts/tokparity");
    assert!(artifacts.join("parity_report.json").is_file());
    assert!(artifacts.join("parity_mismatch_corpus.json").is_file());
    assert!(artifacts.join("drift_history.jsonl").is_file());
}

#[test]
fn failing_native_run_does_not_stop_later_cases() {
    let dir = project(&[("a.txt", "unexpected"), ("b.txt", "hello world")]);
    let output = run_cli(dir.path(), &[]);
    let text = stdout(&output);

    assert_eq!(output.status.code(), Some(1), "{text}");
    assert!(text.contains("test_file_1_a_txt ... FAIL"), "{text}");
    assert!(text.contains("Failed file: a.txt"), "{text}");
    assert!(!text.contains("Mismatch in file: a.txt"), "{text}");
    assert!(text.contains("execution error"), "{text}");
    assert!(text.contains("test_file_2_b_txt ... ok"), "{text}");
}

#[test]
fn build_failure_exits_two_without_running_cases() {
    let dir = project(&[("hello.txt", "hello world")]);
    let output = run_cli(dir.path(), &["--build", "sh missing-build.sh"]);
    let text = stdout(&output);

    assert_eq!(output.status.code(), Some(2), "{text}");
    assert!(!text.contains("test_file_"), "{text}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("tp-conformance-cli error"));
}

#[test]
fn hung_build_is_cut_off_by_build_timeout() {
    let dir = project(&[("hello.txt", "hello world")]);
    fs::write(dir.path().join("slow-build.sh"), "sleep 8\nsh build.sh\n").expect("script");
    let started = Instant::now();
    let output = run_cli(
        dir.path(),
        &["--build", "sh slow-build.sh", "--build-timeout-ms", "150"],
    );

    assert_eq!(output.status.code(), Some(2));
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    assert!(String::from_utf8_lossy(&output.stderr).contains("timed out"));
}

#[test]
fn missing_reference_exits_two() {
    let dir = project(&[("hello.txt", "hello world")]);
    let output = run_cli(dir.path(), &["--reference", "absent.json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.json"));
}

#[test]
fn empty_fixture_directory_is_a_failed_run() {
    let dir = project(&[]);
    let output = run_cli(dir.path(), &[]);
    let text = stdout(&output);
    assert_eq!(output.status.code(), Some(1), "{text}");
    assert!(text.contains("FAILED (no fixtures ran)"), "{text}");
}

#[test]
fn unknown_flag_is_rejected() {
    let output = Command::new(env!("CARGO_BIN_EXE_tp-conformance-cli"))
        .arg("--frobnicate")
        .output()
        .expect("run cli");
    assert_eq!(output.status.code(), Some(2));
}
