//! Integration tests for the `witness-corpus` binary.
//!
//! These invoke the compiled binary end to end and check exit codes, stdout,
//! and the files each subcommand writes. Nothing here needs witness, openssl,
//! git, or opa to be installed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

use witness_corpus::attestor::Attestor;
use witness_corpus::policy::Policy;
use witness_corpus::record::{read_jsonl, write_jsonl, TrainingRecord, SYSTEM_PROMPT};
use witness_corpus::render::{render_answer, AnswerSpec};

fn bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_witness-corpus"))
}

fn run(args: &[&str], cwd: &Path) -> Output {
    Command::new(bin())
        .args(args)
        .current_dir(cwd)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch witness-corpus")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn verified_record(question: &str) -> TrainingRecord {
    let attestors = [Attestor::Git, Attestor::Environment];
    let policy = Policy::build(
        "build",
        &attestors,
        "abc123",
        b"-----BEGIN PUBLIC KEY-----\n",
        "2027-12-31T23:59:59Z",
    );
    let answer = render_answer(&AnswerSpec {
        step: "build",
        attestors: &attestors,
        command: "cat input.txt > output.txt",
        policy_json: &policy.to_pretty_json().unwrap(),
    });
    TrainingRecord::new(SYSTEM_PROMPT, question, answer)
}

fn corpus_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_jsonl(
        &dir.path().join("data/verified/train.jsonl"),
        &[
            verified_record("How do I attest a build with git and environment?"),
            verified_record("Show me a verified git, environment configuration."),
        ],
    )
    .unwrap();
    dir
}

#[test]
fn test_validate_passes_on_clean_corpus() {
    let dir = corpus_dir();
    let out = run(&["validate", "--data-dir", "data"], dir.path());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("Total examples: 2"));
    assert!(text.contains("All validations passed!"));
    assert!(text.contains("verified/train: 2 examples"));
}

#[test]
fn test_validate_fails_on_malformed_record() {
    let dir = corpus_dir();
    fs::write(
        dir.path().join("data/verified/bad.jsonl"),
        r#"{"messages": [{"role": "system", "content": "s"}, {"role": "user", "content": "q"}]}"#,
    )
    .unwrap();
    let out = run(&["validate", "--data-dir", "data"], dir.path());
    assert!(!out.status.success());
    assert!(stdout(&out).contains("Errors: 1"));
}

#[test]
fn test_validate_fails_on_empty_directory() {
    let dir = TempDir::new().unwrap();
    let out = run(&["validate", "--data-dir", "."], dir.path());
    assert!(!out.status.success());
    assert!(stdout(&out).contains("No JSONL files found"));
}

#[test]
fn test_check_accepts_rendered_records() {
    let dir = corpus_dir();
    let out = run(
        &["check", "--input", "data/verified/train.jsonl"],
        dir.path(),
    );
    assert!(out.status.success(), "stdout: {}", stdout(&out));
    assert!(stdout(&out).contains("Valid examples: 2"));
}

#[test]
fn test_check_flags_missing_policy() {
    let dir = TempDir::new().unwrap();
    write_jsonl(
        &dir.path().join("in.jsonl"),
        &[TrainingRecord::new(
            SYSTEM_PROMPT,
            "q",
            "```bash\nwitness run --step build -- make\n```",
        )],
    )
    .unwrap();
    let out = run(&["check", "--input", "in.jsonl"], dir.path());
    assert!(!out.status.success());
    let text = stdout(&out);
    assert!(text.contains("No policy JSON found"));
    assert!(text.contains("Missing --attestations flag"));
}

#[test]
fn test_knowledge_troubleshooting_writes_records() {
    let dir = TempDir::new().unwrap();
    let out = run(
        &["knowledge", "--kind", "troubleshooting", "--output", "out/t.jsonl"],
        dir.path(),
    );
    assert!(out.status.success());
    let records = read_jsonl(&dir.path().join("out/t.jsonl")).unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(TrainingRecord::is_well_formed));
}

#[test]
fn test_knowledge_complex_rego_is_seeded() {
    let dir = TempDir::new().unwrap();
    for (seed, file) in [("5", "a.jsonl"), ("5", "b.jsonl"), ("6", "c.jsonl")] {
        let out = run(
            &["knowledge", "--kind", "complex-rego", "--seed", seed, "--output", file],
            dir.path(),
        );
        assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    }
    let a = fs::read_to_string(dir.path().join("a.jsonl")).unwrap();
    assert_eq!(a, fs::read_to_string(dir.path().join("b.jsonl")).unwrap());
    assert_ne!(a, fs::read_to_string(dir.path().join("c.jsonl")).unwrap());
    let records = read_jsonl(&dir.path().join("a.jsonl")).unwrap();
    assert!(records.len() >= 32);
    assert!(records.iter().all(|r| r.assistant().contains("```rego\npackage ")));
}

#[test]
fn test_knowledge_attack_detection_writes_records() {
    let dir = TempDir::new().unwrap();
    let out = run(
        &["knowledge", "--kind", "attack-detection", "--output", "attacks.jsonl"],
        dir.path(),
    );
    assert!(out.status.success());
    let records = read_jsonl(&dir.path().join("attacks.jsonl")).unwrap();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(TrainingRecord::is_well_formed));
}

#[test]
fn test_split_writes_both_files() {
    let dir = TempDir::new().unwrap();
    let records: Vec<_> = (0..10)
        .map(|i| TrainingRecord::new(SYSTEM_PROMPT, format!("q{i}"), "a"))
        .collect();
    write_jsonl(&dir.path().join("all.jsonl"), &records).unwrap();

    let out = run(
        &["split", "--input", "all.jsonl", "--output-dir", "splits", "--ratio", "0.8"],
        dir.path(),
    );
    assert!(out.status.success());
    assert_eq!(read_jsonl(&dir.path().join("splits/train.jsonl")).unwrap().len(), 8);
    assert_eq!(read_jsonl(&dir.path().join("splits/valid.jsonl")).unwrap().len(), 2);
}

#[test]
fn test_generate_reports_missing_tools() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.json"),
        r#"{"tools": {"witness": "/nonexistent/witness", "openssl": "/nonexistent/openssl", "git": "/nonexistent/git"}}"#,
    )
    .unwrap();
    let out = run(
        &["--config", "config.json", "generate", "--target", "1"],
        dir.path(),
    );
    assert!(!out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("missing required tools"));
    assert!(err.contains("witness: not found"));
    assert!(!dir.path().join("data").exists());
}

#[test]
fn test_bad_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.json"),
        r#"{"policy_expires": "next year"}"#,
    )
    .unwrap();
    let out = run(&["--config", "config.json", "validate"], dir.path());
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("RFC 3339"));
}

#[test]
fn test_view_stats_and_search() {
    let dir = corpus_dir();
    let out = run(&["view", "--stats"], dir.path());
    assert!(out.status.success());
    assert!(stdout(&out).contains("Total examples: 2"));

    let out = run(&["view", "--search", "SHOW ME", "--max-chars", "40"], dir.path());
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("Found 1 examples matching 'SHOW ME'"));
    assert!(text.contains("Example #1 of 1"));
    assert!(text.contains("[truncated]"));
}
