//! `verify-rego` filtering driven against a stub `opa` (and, for real-data
//! mode, stub `witness` and `openssl`).
//!
//! One test function only: the stubs are written and then executed, and
//! doing that from parallel test threads can hit ETXTBSY.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use witness_corpus::config::CorpusConfig;
use witness_corpus::record::{read_jsonl, write_jsonl, TrainingRecord, SYSTEM_PROMPT};
use witness_corpus::rego::{filter_dataset, RealAttestations, RegoStats, RegoVerifier};

/// `check` fails on files containing BROKEN; `eval` appends the `-i` file to
/// `__LOG__`, one document per line, and prints an empty result.
const FAKE_OPA: &str = r#"#!/bin/sh
sub="$1"; shift
case "$sub" in
  check)
    if grep -q BROKEN "$1"; then
      echo "1 error occurred: policy.rego:3: rego_parse_error: unexpected ident token" >&2
      exit 1
    fi
    ;;
  eval)
    while [ $# -gt 0 ]; do
      case "$1" in
        -i) cat "$2" >> "__LOG__"; echo >> "__LOG__"; shift 2 ;;
        *) shift ;;
      esac
    done
    echo '{"result":[]}'
    ;;
esac
"#;

const FAKE_OPENSSL: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-out" ]; then out="$2"; fi
  shift
done
[ -n "$out" ] || exit 0
printf '%s\n' '-----BEGIN PUBLIC KEY-----' 'MCowBQYDK2VwAyEAZmFrZWtleQ==' '-----END PUBLIC KEY-----' > "$out"
"#;

/// `run` logs its `--attestations` value to `__LOG__` and copies a canned
/// envelope to `--outfile`.
const FAKE_WITNESS: &str = r#"#!/bin/sh
sub="$1"; shift
[ "$sub" = "run" ] || exit 0
out=""; att=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outfile) out="$2"; shift 2 ;;
    --attestations) att="$2"; shift 2 ;;
    --) break ;;
    *) shift ;;
  esac
done
echo "$att" >> "__LOG__"
cp "__ENVELOPE__" "$out"
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn rego_answer(blocks: &[&str]) -> String {
    let mut answer = String::from("Use this policy:\n");
    for b in blocks {
        answer.push_str(&format!("```rego\n{b}\n```\n"));
    }
    answer
}

fn rego_record(question: &str, blocks: &[&str]) -> TrainingRecord {
    TrainingRecord::new(SYSTEM_PROMPT, question, rego_answer(blocks))
}

const VALID: &str = "package witness.verify\n\ndeny[msg] {\n  not input.attestation\n  msg := \"missing\"\n}";
const EXIT_CODE: &str = "package witness.commandrun\n\ndeny[msg] {\n  input.attestation.exitcode != 0\n  msg := \"build failed\"\n}";

fn logged_inputs(log: &Path) -> Vec<Value> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn stub_opa_filtering() {
    let dir = tempfile::tempdir().unwrap();
    let opa_log = dir.path().join("opa-inputs.log");
    let witness_log = dir.path().join("witness-runs.log");
    let opa = write_script(
        dir.path(),
        "opa",
        &FAKE_OPA.replace("__LOG__", opa_log.to_str().unwrap()),
    );
    let verifier = RegoVerifier::new(&opa);

    // Default mode: syntax failures drop the record, everything else is kept
    // and evaluated against an empty input document.
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out/rego_verified.jsonl");
    write_jsonl(
        &input,
        &[
            rego_record("How do I deny missing attestations?", &[VALID]),
            rego_record("A broken one", &[VALID, "package x\n\nBROKEN {"]),
            TrainingRecord::new(SYSTEM_PROMPT, "No rego here", "witness run --help"),
            rego_record("Two policies", &[VALID, EXIT_CODE]),
        ],
    )
    .unwrap();

    let stats = filter_dataset(&verifier, None, &input, &output).unwrap();
    assert_eq!(
        stats,
        RegoStats {
            examples: 4,
            kept: 3,
            blocks_valid: 3,
            examples_invalid: 1,
            skipped: 0,
        }
    );
    let kept = read_jsonl(&output).unwrap();
    let questions: Vec<&str> = kept.iter().map(TrainingRecord::user).collect();
    assert_eq!(
        questions,
        vec!["How do I deny missing attestations?", "No rego here", "Two policies"]
    );
    // the broken record's first block still reached eval before its second failed check
    let inputs = logged_inputs(&opa_log);
    assert_eq!(inputs.len(), 4);
    assert!(inputs.iter().all(|doc| *doc == json!({})));

    // Real-data mode: command-run data comes from a plain run, produced once
    // and reused; records with no locally producible target are skipped.
    fs::write(&opa_log, "").unwrap();
    write_script(dir.path(), "openssl", FAKE_OPENSSL);
    let statement = json!({
        "predicate": {
            "attestations": [
                {
                    "type": "https://witness.dev/attestations/environment/v0.1",
                    "attestation": {"os": "linux"}
                },
                {
                    "type": "https://witness.dev/attestations/command-run/v0.1",
                    "attestation": {"cmd": ["echo", "test"], "exitcode": 0}
                }
            ]
        }
    });
    let envelope = dir.path().join("envelope.json");
    fs::write(
        &envelope,
        serde_json::to_vec(&json!({
            "payloadType": "application/vnd.in-toto+json",
            "payload": STANDARD.encode(serde_json::to_vec(&statement).unwrap()),
            "signatures": [{"keyid": "fakekeyid", "sig": ""}]
        }))
        .unwrap(),
    )
    .unwrap();
    let witness = write_script(
        dir.path(),
        "witness",
        &FAKE_WITNESS
            .replace("__LOG__", witness_log.to_str().unwrap())
            .replace("__ENVELOPE__", envelope.to_str().unwrap()),
    );

    let mut config = CorpusConfig::default();
    config.tools.witness = witness;
    config.tools.openssl = dir.path().join("openssl");
    config.tools.opa = opa.clone();
    let mut real = RealAttestations::new(&config);

    write_jsonl(
        &input,
        &[
            rego_record("Require a clean exit", &[EXIT_CODE]),
            rego_record("Check the CI workflow run", &[VALID]),
            rego_record("Does the commandrun exit code matter?", &[VALID]),
        ],
    )
    .unwrap();
    let stats = filter_dataset(&verifier, Some(&mut real), &input, &output).unwrap();
    assert_eq!(
        stats,
        RegoStats {
            examples: 3,
            kept: 3,
            blocks_valid: 2,
            examples_invalid: 0,
            skipped: 1,
        }
    );

    let inputs = logged_inputs(&opa_log);
    assert_eq!(inputs.len(), 2);
    for doc in &inputs {
        assert_eq!(doc["attestation"]["exitcode"], 0);
        assert_eq!(doc["attestation"]["cmd"][1], "test");
    }
    let runs = fs::read_to_string(&witness_log).unwrap();
    assert_eq!(runs.lines().collect::<Vec<_>>(), vec!["environment"]);
}
