//! Post-hoc corpus checks.
//!
//! [`DatasetValidator`] checks record shape across every `*.jsonl` under a
//! directory. [`RecordChecker`] goes deeper on verified records: the policy
//! embedded in the answer must be structurally sound and agree with the
//! `witness run` line next to it.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::extract::{attestation_flag_count, policy_json, witness_commands};
use crate::fs_guard::{read_validated_string, MAX_JSONL_BYTES};
use crate::policy::consistency_issues;
use crate::record::{read_jsonl, Role, TrainingRecord};

const MIN_ANSWER_CHARS: usize = 100;

/// Examples counted per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCount {
    pub category: String,
    pub name: String,
    pub examples: usize,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub total_examples: usize,
    pub unique_prompts: usize,
    pub files: Vec<FileCount>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn print_summary(&self) {
        println!("Total examples: {}", self.total_examples);
        println!("Unique prompts: {}", self.unique_prompts);
        if !self.warnings.is_empty() {
            println!("\nWarnings: {}", self.warnings.len());
            for w in &self.warnings {
                println!("  {w}");
            }
        }
        if self.errors.is_empty() {
            println!("\nAll validations passed!");
        } else {
            println!("\nErrors: {}", self.errors.len());
            for e in &self.errors {
                println!("  {e}");
            }
        }
        println!("\nDataset statistics:");
        for f in &self.files {
            println!("  {}/{}: {} examples", f.category, f.name, f.examples);
        }
    }
}

/// Every `*.jsonl` under `dir`, sorted.
pub fn jsonl_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    files
}

/// Structural problem with one raw record, if any.
pub fn structure_error(example: &Value) -> Option<String> {
    let Some(messages) = example.get("messages") else {
        return Some("Missing 'messages' field".to_string());
    };
    let Some(messages) = messages.as_array() else {
        return Some("'messages' must be a list".to_string());
    };
    if messages.len() != Role::ORDER.len() {
        return Some(format!(
            "Expected 3 messages (system, user, assistant), got {}",
            messages.len()
        ));
    }
    for (i, (msg, expected)) in messages.iter().zip(Role::ORDER).enumerate() {
        let Some(msg) = msg.as_object() else {
            return Some(format!("Message {i} is not an object"));
        };
        let Some(role) = msg.get("role") else {
            return Some(format!("Message {i} missing 'role'"));
        };
        if role.as_str() != Some(expected.as_str()) {
            return Some(format!(
                "Message {i} has role {role}, expected '{}'",
                expected.as_str()
            ));
        }
        let Some(content) = msg.get("content") else {
            return Some(format!("Message {i} missing 'content'"));
        };
        let Some(content) = content.as_str() else {
            return Some(format!("Message {i} content must be string"));
        };
        if content.trim().is_empty() {
            return Some(format!("Message {i} content is empty"));
        }
    }
    None
}

pub struct DatasetValidator {
    data_dir: PathBuf,
    seen_prompts: HashSet<String>,
    report: ValidationReport,
}

impl DatasetValidator {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            seen_prompts: HashSet::new(),
            report: ValidationReport::default(),
        }
    }

    pub fn validate_all(mut self) -> Result<ValidationReport> {
        let files = jsonl_files(&self.data_dir);
        if files.is_empty() {
            self.report
                .errors
                .push(format!("No JSONL files found in {}", self.data_dir.display()));
        }
        for file in &files {
            self.validate_file(file)?;
        }
        self.report.unique_prompts = self.seen_prompts.len();
        Ok(self.report)
    }

    fn validate_file(&mut self, path: &Path) -> Result<()> {
        let text = read_validated_string(path, MAX_JSONL_BYTES)?;
        let loc = path.display().to_string();
        let mut examples = 0;

        for (i, line) in text.lines().enumerate() {
            let line_num = i + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let example: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    self.report
                        .errors
                        .push(format!("{loc}:{line_num} - Invalid JSON: {e}"));
                    continue;
                }
            };
            if let Some(err) = structure_error(&example) {
                self.report.errors.push(format!("{loc}:{line_num} - {err}"));
                continue;
            }
            let user = example
                .pointer("/messages/1/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let assistant = example
                .pointer("/messages/2/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            self.check_duplicate(user, &loc, line_num);
            self.check_content_quality(assistant, &loc, line_num);
            examples += 1;
        }

        self.report.total_examples += examples;
        self.report.files.push(FileCount {
            category: path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            name: path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            examples,
        });
        Ok(())
    }

    fn check_duplicate(&mut self, prompt: &str, loc: &str, line_num: usize) {
        let digest = hex::encode(Sha256::digest(prompt.as_bytes()));
        if !self.seen_prompts.insert(digest) {
            let preview: String = prompt.chars().take(50).collect();
            self.report
                .warnings
                .push(format!("{loc}:{line_num} - Duplicate user prompt: '{preview}...'"));
        }
    }

    fn check_content_quality(&mut self, answer: &str, loc: &str, line_num: usize) {
        if answer.matches("```").count() % 2 != 0 {
            self.report
                .errors
                .push(format!("{loc}:{line_num} - Unclosed code block in assistant response"));
        }
        let chars = answer.chars().count();
        if chars < MIN_ANSWER_CHARS {
            self.report.warnings.push(format!(
                "{loc}:{line_num} - Assistant response is very short ({chars} chars)"
            ));
        }
        if !answer.contains("witness run") && !answer.contains("witness verify") {
            self.report
                .warnings
                .push(format!("{loc}:{line_num} - No witness commands in response"));
        }
    }
}

/// Missing required flags in one joined witness command line.
pub fn command_syntax_issues(command: &str) -> Vec<String> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let has = |flags: &[&str]| tokens.iter().any(|t| flags.contains(t));
    let mut issues = Vec::new();

    let mut require = |flags: &[&str], what: &str| {
        if !has(flags) {
            issues.push(format!("Missing {what} flag"));
        }
    };

    if command.starts_with("witness run") {
        require(&["--step", "-s"], "--step");
        require(&["--attestations", "-a"], "--attestations");
        require(&["--outfile", "-o"], "--outfile");
        require(&["--signer-file-key-path"], "--signer-file-key-path");
        if !command.contains(" -- ") {
            issues.push("Missing command separator ' -- '".to_string());
        }
    } else if command.starts_with("witness sign") {
        require(&["--infile", "-f"], "--infile");
        require(&["--outfile", "-o"], "--outfile");
        require(&["--signer-file-key-path"], "--signer-file-key-path");
    } else if command.starts_with("witness verify") {
        require(&["--policy", "-p"], "--policy");
        require(&["--publickey", "-k"], "--publickey");
        require(&["--attestations", "-a"], "--attestations");
        require(&["-f", "--artifactfile"], "artifact (-f)");
    }
    issues
}

/// Deep checks for records produced by the verified generator.
#[derive(Debug, Default)]
pub struct RecordChecker;

impl RecordChecker {
    pub fn check(&self, record: &TrainingRecord) -> Vec<String> {
        let answer = record.assistant();
        let mut issues = Vec::new();

        match policy_json(answer) {
            Some(policy) => {
                issues.extend(consistency_issues(&policy));
                if let Some(named) = attestation_flag_count(answer) {
                    let steps = policy.get("steps").and_then(Value::as_object);
                    for (name, step) in steps.into_iter().flatten() {
                        let required = step
                            .get("attestations")
                            .and_then(Value::as_array)
                            .map_or(0, Vec::len);
                        if required != named {
                            issues.push(format!(
                                "Step '{name}' requires {required} attestations but --attestations names {named}"
                            ));
                        }
                    }
                }
            }
            None => issues.push("No policy JSON found".to_string()),
        }

        let commands = witness_commands(answer);
        if commands.is_empty() {
            issues.push("No witness commands found".to_string());
        }
        for cmd in &commands {
            issues.extend(command_syntax_issues(cmd));
        }
        issues
    }
}

/// Outcome of checking a sample of one file.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub checked: usize,
    pub valid: usize,
    /// (1-based record number, issues) for every record with problems.
    pub failures: Vec<(usize, Vec<String>)>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn print_summary(&self) {
        for (n, issues) in &self.failures {
            println!("Example #{n}: {} issue(s)", issues.len());
            for issue in issues {
                println!("  - {issue}");
            }
        }
        println!("Examples checked: {}", self.checked);
        println!("Valid examples: {}", self.valid);
        println!("Examples with issues: {}", self.checked - self.valid);
    }
}

/// Runs [`RecordChecker`] over `input`, or over a seeded sample of `sample` records.
pub fn check_file(input: &Path, sample: Option<usize>, seed: u64) -> Result<CheckReport> {
    let records = read_jsonl(input)?;
    let mut indices: Vec<usize> = (0..records.len()).collect();
    if let Some(n) = sample.filter(|n| *n < records.len()) {
        let mut rng = StdRng::seed_from_u64(seed);
        indices = indices.choose_multiple(&mut rng, n).copied().collect();
    }

    let checker = RecordChecker;
    let mut report = CheckReport::default();
    for idx in indices {
        let Some(record) = records.get(idx) else {
            continue;
        };
        report.checked += 1;
        let issues = checker.check(record);
        if issues.is_empty() {
            report.valid += 1;
        } else {
            report.failures.push((idx + 1, issues));
        }
    }
    Ok(report)
}
