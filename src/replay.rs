//! Round-trip check: re-run the commands a record teaches and confirm they
//! still verify.
//!
//! A replay uses fresh keys and a fresh work directory, so key ids differ from
//! the original; the comparison is on the command lines and the attestation
//! types the regenerated policy requires.

use anyhow::Result;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

use crate::config::CorpusConfig;
use crate::extract::{parse_run_command, policy_json, witness_commands};
use crate::pipeline::{ExampleOutcome, ExampleSpec, VerifiedPipeline};
use crate::record::{read_jsonl, TrainingRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The commands verified again and produced an equivalent policy.
    Reproduced,
    /// The commands ran but did not reproduce the record.
    Diverged(String),
    /// The record does not carry enough to be replayed.
    NotReplayable(String),
}

fn embedded_attestation_types<'a>(policy: &'a Value, step: &str) -> Option<Vec<&'a str>> {
    policy
        .pointer(&format!("/steps/{step}/attestations"))
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|t| t.get("type").and_then(Value::as_str))
                .collect()
        })
}

/// Replays one record. `Err` only for fatal setup failures.
pub fn replay_record(
    pipeline: &VerifiedPipeline,
    record: &TrainingRecord,
    example_num: usize,
) -> Result<ReplayOutcome> {
    let answer = record.assistant();
    let commands = witness_commands(answer);
    let Some(run_line) = commands.iter().find(|c| c.starts_with("witness run")) else {
        return Ok(ReplayOutcome::NotReplayable(
            "no witness run command".to_string(),
        ));
    };
    let run = match parse_run_command(run_line) {
        Ok(run) => run,
        Err(e) => return Ok(ReplayOutcome::NotReplayable(format!("{e:#}"))),
    };
    let Some(embedded) = policy_json(answer) else {
        return Ok(ReplayOutcome::NotReplayable("no policy JSON".to_string()));
    };
    let Some(expected_types) = embedded_attestation_types(&embedded, &run.step) else {
        return Ok(ReplayOutcome::NotReplayable(format!(
            "policy has no step '{}'",
            run.step
        )));
    };

    let spec = ExampleSpec {
        example_num,
        step: run.step.clone(),
        attestors: run.attestors,
        command: run.build_command,
        question: record.user().to_string(),
    };

    let accepted = match pipeline.attempt(&spec)? {
        ExampleOutcome::Accepted(accepted) => accepted,
        ExampleOutcome::Rejected(reason) => return Ok(ReplayOutcome::Diverged(reason.to_string())),
    };

    let regenerated_types = accepted.policy.attestation_types(&run.step).unwrap_or_default();
    if regenerated_types != expected_types {
        return Ok(ReplayOutcome::Diverged(format!(
            "attestation types differ: embedded {expected_types:?}, regenerated {regenerated_types:?}"
        )));
    }
    if witness_commands(accepted.record.assistant()) != commands {
        return Ok(ReplayOutcome::Diverged(
            "regenerated command lines differ".to_string(),
        ));
    }
    Ok(ReplayOutcome::Reproduced)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub reproduced: usize,
    pub diverged: usize,
    pub not_replayable: usize,
}

impl ReplaySummary {
    pub fn passed(&self) -> bool {
        self.diverged == 0 && self.not_replayable == 0
    }
}

/// Replays the first `limit` records of `input` (all when `None`).
pub fn replay_file(config: &CorpusConfig, input: &Path, limit: Option<usize>) -> Result<ReplaySummary> {
    let pipeline = VerifiedPipeline::new(config);
    let records = read_jsonl(input)?;
    let mut summary = ReplaySummary::default();

    for (i, record) in records.iter().take(limit.unwrap_or(usize::MAX)).enumerate() {
        let n = i + 1;
        summary.replayed += 1;
        match replay_record(&pipeline, record, n)? {
            ReplayOutcome::Reproduced => {
                summary.reproduced += 1;
                info!("record {n}: reproduced");
            }
            ReplayOutcome::Diverged(why) => {
                summary.diverged += 1;
                warn!("record {n}: diverged: {why}");
            }
            ReplayOutcome::NotReplayable(why) => {
                summary.not_replayable += 1;
                warn!("record {n}: not replayable: {why}");
            }
        }
    }

    info!(
        replayed = summary.replayed,
        reproduced = summary.reproduced,
        diverged = summary.diverged,
        not_replayable = summary.not_replayable,
        "replay complete"
    );
    Ok(summary)
}
