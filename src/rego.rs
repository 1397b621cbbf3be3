//! Rego blocks in answers, checked with `opa`.
//!
//! Every `rego` fenced block is written to a scratch file, syntax-checked with
//! `opa check`, then evaluated with `opa eval -d <file> -i <input> data`. The
//! input is `{}` by default; in real-data mode it is
//! `{"attestation": <attestor data>}` taken from an attestation freshly
//! produced by `witness run`.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::attestor::Attestor;
use crate::config::CorpusConfig;
use crate::envelope::Envelope;
use crate::exec::run_tool;
use crate::extract::fenced_blocks;
use crate::fixture::{self, WorkDir, ARTIFACT_FILE};
use crate::record::{read_jsonl, write_jsonl, TrainingRecord};
use crate::witness::{RunRequest, WitnessCli};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockVerdict {
    Valid,
    Invalid(String),
}

pub struct RegoVerifier {
    opa: PathBuf,
}

impl RegoVerifier {
    pub fn new(opa: impl Into<PathBuf>) -> Self {
        Self { opa: opa.into() }
    }

    /// `opa check` then `opa eval` one block against `input`.
    pub fn check_block(&self, code: &str, input: &Value) -> Result<BlockVerdict> {
        let dir = tempfile::tempdir().context("creating rego scratch directory")?;
        let rego_file = dir.path().join("policy.rego");
        let input_file = dir.path().join("input.json");
        fs::write(&rego_file, code).context("writing policy.rego")?;
        fs::write(&input_file, serde_json::to_vec(input)?).context("writing input.json")?;

        let check = run_tool(
            Command::new(&self.opa).arg("check").arg(&rego_file),
            "opa check",
        )?;
        if !check.success {
            return Ok(BlockVerdict::Invalid(format!(
                "Syntax error: {}",
                check.stderr_excerpt()
            )));
        }

        let eval = run_tool(
            Command::new(&self.opa)
                .arg("eval")
                .arg("-d")
                .arg(&rego_file)
                .arg("-i")
                .arg(&input_file)
                .arg("data"),
            "opa eval",
        )?;
        if !eval.success {
            return Ok(BlockVerdict::Invalid(format!(
                "Eval error: {}",
                eval.stderr_excerpt()
            )));
        }
        if serde_json::from_str::<Value>(&eval.stdout).is_err() {
            return Ok(BlockVerdict::Invalid(
                "Could not parse OPA output".to_string(),
            ));
        }
        Ok(BlockVerdict::Valid)
    }

    /// First failing block of `record`, as `Block <n>: <why>`.
    pub fn verify_record(&self, record: &TrainingRecord, input: &Value) -> Result<Option<String>> {
        for (i, block) in fenced_blocks(record.assistant(), "rego").into_iter().enumerate() {
            if let BlockVerdict::Invalid(why) = self.check_block(block, input)? {
                return Ok(Some(format!("Block {}: {why}", i + 1)));
            }
        }
        Ok(None)
    }
}

/// Attestors whose data a local `witness run` can produce. CI and cloud
/// attestors (github, gitlab, aws, gcp-iit) need their platform and are
/// never targeted.
pub const REAL_DATA_ATTESTORS: [Attestor; 5] = [
    Attestor::Git,
    Attestor::Environment,
    Attestor::Material,
    Attestor::Product,
    Attestor::CommandRun,
];

/// `command-run`, `commandrun` and `command_run` all name the same attestor.
fn name_matches(attestor: Attestor, text: &str) -> bool {
    let name = attestor.name();
    text == name || text == name.replace('-', "") || text == name.replace('-', "_")
}

/// Attestor a record's rego targets: the `package` path first, the question
/// text as a fallback.
pub fn target_attestor(record: &TrainingRecord) -> Option<Attestor> {
    let answer = record.assistant();
    if let Ok(re) = Regex::new(r"(?m)^\s*package\s+([A-Za-z0-9_.]+)") {
        for caps in re.captures_iter(answer) {
            let Some(path) = caps.get(1) else { continue };
            if let Some(a) = path.as_str().split('.').find_map(|seg| {
                REAL_DATA_ATTESTORS
                    .into_iter()
                    .find(|a| name_matches(*a, seg))
            }) {
                return Some(a);
            }
        }
    }
    let question = record.user().to_lowercase();
    REAL_DATA_ATTESTORS.into_iter().find(|a| {
        let name = a.name();
        question.contains(name) || question.contains(&name.replace('-', ""))
    })
}

/// Produces (and caches) real attestor data with `witness run`.
pub struct RealAttestations {
    witness: WitnessCli,
    openssl: PathBuf,
    git: PathBuf,
    cache: HashMap<Attestor, Option<Value>>,
}

impl RealAttestations {
    pub fn new(config: &CorpusConfig) -> Self {
        Self {
            witness: WitnessCli::new(&config.tools.witness, &config.success_marker),
            openssl: config.tools.openssl.clone(),
            git: config.tools.git.clone(),
            cache: HashMap::new(),
        }
    }

    /// Data captured by `attestor`, or `None` when witness could not produce it.
    pub fn data_for(&mut self, attestor: Attestor) -> Result<Option<Value>> {
        if let Some(cached) = self.cache.get(&attestor) {
            return Ok(cached.clone());
        }
        let data = self.produce(attestor)?;
        self.cache.insert(attestor, data.clone());
        Ok(data)
    }

    fn produce(&self, attestor: Attestor) -> Result<Option<Value>> {
        let work = WorkDir::new()?;
        let keys = fixture::generate_keys(&self.openssl, work.path())?;
        if attestor.needs_git() {
            fixture::init_git_repo(&self.git, work.path())?;
        }
        if attestor.needs_material() {
            fixture::write_material(work.path())?;
        }
        fs::write(work.join(ARTIFACT_FILE), "test").context("writing artifact")?;

        // command-run is recorded on every run; ask for something cheap.
        let requested = match attestor {
            Attestor::CommandRun => Attestor::Environment,
            other => other,
        };
        let att_file = work.join("attestation.json");
        let out = self.witness.run(&RunRequest {
            step: "test",
            attestors: &[requested],
            signer_key: &keys.private_pem,
            outfile: &att_file,
            work_dir: work.path(),
            env: &[],
            command: vec!["echo".into(), "test".into()],
        })?;
        if !out.success || !att_file.exists() {
            warn!("could not create {attestor} attestation: {}", out.stderr_excerpt());
            return Ok(None);
        }
        Ok(Envelope::load(&att_file)
            .and_then(|env| env.attestor_data(attestor.name()))
            .unwrap_or_else(|e| {
                warn!("unusable {attestor} attestation: {e:#}");
                None
            }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegoStats {
    pub examples: usize,
    pub kept: usize,
    pub blocks_valid: usize,
    pub examples_invalid: usize,
    /// Real-data mode: rego present but no attestation to test against.
    pub skipped: usize,
}

/// Keeps records whose rego all passes and writes them to `output`.
pub fn filter_dataset(
    verifier: &RegoVerifier,
    mut real: Option<&mut RealAttestations>,
    input: &Path,
    output: &Path,
) -> Result<RegoStats> {
    let records = read_jsonl(input)?;
    let mut stats = RegoStats {
        examples: records.len(),
        ..RegoStats::default()
    };
    let mut kept = Vec::new();

    for (i, record) in records.into_iter().enumerate() {
        let n = i + 1;
        if n % 100 == 0 {
            info!(
                "progress: {n}/{} (valid blocks: {}, invalid examples: {})",
                stats.examples, stats.blocks_valid, stats.examples_invalid
            );
        }

        let blocks = fenced_blocks(record.assistant(), "rego").len();
        if blocks == 0 {
            kept.push(record);
            continue;
        }

        let input_doc = match real.as_deref_mut() {
            None => json!({}),
            Some(real) => {
                let data = match target_attestor(&record) {
                    Some(a) => real.data_for(a)?,
                    None => None,
                };
                match data {
                    Some(data) => json!({ "attestation": data }),
                    None => {
                        stats.skipped += 1;
                        kept.push(record);
                        continue;
                    }
                }
            }
        };

        match verifier.verify_record(&record, &input_doc)? {
            None => {
                stats.blocks_valid += blocks;
                kept.push(record);
            }
            Some(why) => {
                stats.examples_invalid += 1;
                if n <= 10 {
                    warn!("example {n}: {why}");
                }
            }
        }
    }

    stats.kept = kept.len();
    write_jsonl(output, &kept)?;
    info!(
        examples = stats.examples,
        kept = stats.kept,
        rejected = stats.examples - stats.kept,
        skipped = stats.skipped,
        "rego verification complete, output {}",
        output.display()
    );
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rego_record(question: &str, package: &str) -> TrainingRecord {
        TrainingRecord::new(
            "s",
            question,
            format!("```rego\npackage {package}\n\ndeny[msg] {{\n  msg := \"x\"\n}}\n```"),
        )
    }

    #[test]
    fn test_target_attestor_prefers_package() {
        let r = rego_record("How do I check the environment?", "witness.git");
        assert_eq!(target_attestor(&r), Some(Attestor::Git));
    }

    #[test]
    fn test_target_attestor_falls_back_to_question() {
        let r = rego_record("Validate material hashes", "policy");
        assert_eq!(target_attestor(&r), Some(Attestor::Material));
        let r = rego_record("Something else", "policy");
        assert_eq!(target_attestor(&r), None);
    }

    #[test]
    fn test_target_attestor_command_run_spellings() {
        for package in ["witness.commandrun", "witness.command_run", "verify.commandrun.exit"] {
            let r = rego_record("Check the exit code", package);
            assert_eq!(target_attestor(&r), Some(Attestor::CommandRun), "{package}");
        }
        let r = rego_record("Require exit code 0 in command-run data", "policy");
        assert_eq!(target_attestor(&r), Some(Attestor::CommandRun));
        let r = rego_record("What does the commandrun attestor record?", "policy");
        assert_eq!(target_attestor(&r), Some(Attestor::CommandRun));
    }

    #[test]
    fn test_cloud_attestors_are_not_targets() {
        let r = rego_record("Check the CI workflow run", "witness.github");
        assert_eq!(target_attestor(&r), None);
    }

    #[test]
    fn test_missing_opa_is_an_error() {
        let v = RegoVerifier::new("/nonexistent/opa");
        assert!(v.check_block("package x", &json!({})).is_err());
    }

    #[test]
    fn test_records_without_rego_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out/verified.jsonl");
        write_jsonl(&input, &[TrainingRecord::new("s", "q", "no rego here")]).unwrap();

        let v = RegoVerifier::new("/nonexistent/opa");
        let stats = filter_dataset(&v, None, &input, &output).unwrap();
        assert_eq!(stats.kept, 1);
        assert_eq!(read_jsonl(&output).unwrap().len(), 1);
    }
}
