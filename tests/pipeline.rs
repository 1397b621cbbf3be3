//! The verified-example procedure driven against stub `witness` and `openssl`
//! scripts, so no real tools are needed.
//!
//! Every scenario lives in one test function: the stubs are written and then
//! executed, and doing that from parallel test threads can hit ETXTBSY.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use witness_corpus::attestor::Attestor;
use witness_corpus::config::CorpusConfig;
use witness_corpus::extract::policy_json;
use witness_corpus::pipeline::{ExampleOutcome, ExampleSpec, RejectReason, VerifiedPipeline};
use witness_corpus::record::write_jsonl;
use witness_corpus::replay::{replay_file, replay_record, ReplayOutcome};

const FAKE_OPENSSL: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-out" ]; then out="$2"; fi
  shift
done
[ -n "$out" ] || exit 0
printf '%s\n' '-----BEGIN PUBLIC KEY-----' 'MCowBQYDK2VwAyEAZmFrZWtleQ==' '-----END PUBLIC KEY-----' > "$out"
"#;

/// `run` executes the command after `--` and writes a minimal envelope;
/// `sign` copies its input; `verify` prints `__VERDICT__` to stderr.
const FAKE_WITNESS: &str = r#"#!/bin/sh
sub="$1"; shift
case "$sub" in
  run)
    out=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --outfile) out="$2"; shift 2 ;;
        --) shift; break ;;
        *) shift ;;
      esac
    done
    "$@" || exit 3
    printf '%s' '{"payloadType":"application/vnd.in-toto+json","payload":"","signatures":[{"keyid":"fakekeyid","sig":""}]}' > "$out"
    ;;
  sign)
    in=""; out=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --infile) in="$2"; shift 2 ;;
        --outfile) out="$2"; shift 2 ;;
        *) shift ;;
      esac
    done
    cp "$in" "$out"
    ;;
  verify)
    echo "__VERDICT__" >&2
    ;;
  *)
    exit 0
    ;;
esac
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn stub_config(dir: &Path, verdict: &str) -> CorpusConfig {
    let witness = write_script(
        dir,
        &format!("witness-{}", verdict.replace(' ', "-")),
        &FAKE_WITNESS.replace("__VERDICT__", verdict),
    );
    let mut cfg = CorpusConfig::default();
    cfg.tools.witness = witness;
    cfg.tools.openssl = dir.join("openssl");
    cfg.tools.shell = PathBuf::from("/bin/sh");
    cfg
}

fn spec(command: &str) -> ExampleSpec {
    ExampleSpec {
        example_num: 7,
        step: "build".to_string(),
        attestors: vec![Attestor::Environment, Attestor::Product],
        command: command.to_string(),
        question: "How do I attest my build step?".to_string(),
    }
}

#[test]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
fn stub_tools_end_to_end() {
    let tools = tempfile::tempdir().unwrap();
    write_script(tools.path(), "openssl", FAKE_OPENSSL);

    // Accepted: the record is rendered from the executed values.
    let good = stub_config(tools.path(), "Verification succeeded");
    let pipeline = VerifiedPipeline::new(&good);
    let outcome = pipeline.attempt(&spec("echo hello > output.txt")).unwrap();
    let ExampleOutcome::Accepted(accepted) = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };
    assert_eq!(accepted.key_id, "fakekeyid");
    let answer = accepted.record.assistant();
    assert!(answer.contains("--attestations environment,product \\\n"));
    assert!(answer.contains("-- bash -c \"echo hello > output.txt\""));
    assert!(accepted.record.is_well_formed());

    let policy = policy_json(answer).unwrap();
    let attestations = policy["steps"]["build"]["attestations"].as_array().unwrap();
    assert_eq!(attestations.len(), 2);
    assert_eq!(
        policy["steps"]["build"]["functionaries"][0]["publickeyid"],
        "fakekeyid"
    );
    assert!(policy["publickeys"]["fakekeyid"].is_object());

    // Replaying the accepted record reproduces it.
    assert_eq!(
        replay_record(&pipeline, &accepted.record, 1).unwrap(),
        ReplayOutcome::Reproduced
    );
    let corpus = tools.path().join("corpus.jsonl");
    write_jsonl(&corpus, &[accepted.record.clone()]).unwrap();
    let summary = replay_file(&good, &corpus, None).unwrap();
    assert_eq!((summary.replayed, summary.reproduced), (1, 1));
    assert!(summary.passed());

    // A command with double quotes is single-quoted in the answer and still
    // replays from the extracted text.
    let outcome = pipeline
        .attempt(&spec("echo \"hi\" > output.txt"))
        .unwrap();
    let ExampleOutcome::Accepted(quoted) = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };
    assert!(quoted
        .record
        .assistant()
        .contains("-- bash -c 'echo \"hi\" > output.txt'"));
    assert_eq!(
        replay_record(&pipeline, &quoted.record, 2).unwrap(),
        ReplayOutcome::Reproduced
    );

    // A failing build command is a witness run rejection, not a fatal error.
    let outcome = pipeline.attempt(&spec("exit 9")).unwrap();
    match outcome {
        ExampleOutcome::Rejected(RejectReason::ToolFailed { tool, code, .. }) => {
            assert_eq!(tool, "witness run");
            assert_eq!(code, "3");
        }
        other => panic!("expected witness run failure, got {other:?}"),
    }

    // Exit status 0 without the marker is still a rejection.
    let quiet = stub_config(tools.path(), "something else");
    let outcome = VerifiedPipeline::new(&quiet)
        .attempt(&spec("echo hello > output.txt"))
        .unwrap();
    match outcome {
        ExampleOutcome::Rejected(reason @ RejectReason::MissingSuccessMarker { .. }) => {
            assert_eq!(reason.kind(), "missing-success-marker");
        }
        other => panic!("expected missing marker, got {other:?}"),
    }
}
