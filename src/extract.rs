//! Pulls code blocks, witness command lines and policy JSON back out of
//! generated answers.

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use serde_json::Value;

use crate::attestor::{parse_csv, Attestor};

/// Bodies of every fenced block tagged `lang` (e.g. `bash`, `json`, `rego`).
pub fn fenced_blocks<'a>(text: &'a str, lang: &str) -> Vec<&'a str> {
    let pattern = format!(r"(?s)```{}\n(.*?)```", regex::escape(lang));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Joins shell line continuations so each logical command is one line.
pub fn join_continuations(block: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in block.lines() {
        let line = line.trim();
        if let Some(head) = line.strip_suffix('\\') {
            current.push_str(head.trim_end());
            current.push(' ');
            continue;
        }
        current.push_str(line);
        if !current.trim().is_empty() {
            out.push(current.trim().to_string());
        }
        current.clear();
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

/// `witness run|sign|verify` lines from the answer's bash blocks, continuations joined.
pub fn witness_commands(answer: &str) -> Vec<String> {
    fenced_blocks(answer, "bash")
        .into_iter()
        .flat_map(join_continuations)
        .filter(|line| {
            ["witness run", "witness sign", "witness verify"]
                .iter()
                .any(|p| line.starts_with(p))
        })
        .collect()
}

/// First JSON block that parses and looks like a policy.
pub fn policy_json(answer: &str) -> Option<Value> {
    fenced_blocks(answer, "json")
        .into_iter()
        .filter_map(|block| serde_json::from_str::<Value>(block).ok())
        .find(|v| v.get("steps").is_some() || v.get("publickeys").is_some())
}

/// Parsed `witness run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub step: String,
    pub attestors: Vec<Attestor>,
    /// The one-liner given to `<shell> -c`, unquoted.
    pub build_command: String,
}

/// Value following `flag` in a whitespace-split flag list.
fn flag_value<'a>(tokens: &[&'a str], flag: &str) -> Option<&'a str> {
    tokens
        .iter()
        .position(|t| *t == flag)
        .and_then(|i| tokens.get(i + 1))
        .copied()
}

/// Reverses [`crate::render::shell_quote`].
pub fn shell_unquote(quoted: &str) -> Result<String> {
    let q = quoted.trim();
    if q.len() >= 2 && q.starts_with('"') && q.ends_with('"') {
        return Ok(q[1..q.len() - 1].to_string());
    }
    if q.len() >= 2 && q.starts_with('\'') && q.ends_with('\'') {
        return Ok(q[1..q.len() - 1].replace(r"'\''", "'"));
    }
    bail!("build command is not quoted: {q}")
}

/// Parses a joined `witness run ... -- <shell> -c "<cmd>"` line.
pub fn parse_run_command(line: &str) -> Result<RunCommand> {
    let rest = line
        .strip_prefix("witness run")
        .ok_or_else(|| anyhow!("not a witness run command"))?;
    let (flags, command) = rest
        .split_once(" -- ")
        .ok_or_else(|| anyhow!("missing command separator ' -- '"))?;
    let tokens: Vec<&str> = flags.split_whitespace().collect();

    let step = flag_value(&tokens, "--step").ok_or_else(|| anyhow!("missing --step"))?;
    let csv = flag_value(&tokens, "--attestations")
        .or_else(|| flag_value(&tokens, "-a"))
        .ok_or_else(|| anyhow!("missing --attestations"))?;
    let attestors = parse_csv(csv)?;

    let mut parts = command.trim().splitn(3, ' ');
    let (_shell, dash_c, script) = (parts.next(), parts.next(), parts.next());
    if dash_c != Some("-c") {
        bail!("build command is not '<shell> -c <script>': {}", command.trim());
    }
    let build_command = shell_unquote(script.unwrap_or_default())?;

    Ok(RunCommand {
        step: step.to_string(),
        attestors,
        build_command,
    })
}

/// Attestor count named by the first `--attestations` flag in the answer.
pub fn attestation_flag_count(answer: &str) -> Option<usize> {
    witness_commands(answer)
        .iter()
        .filter(|l| l.starts_with("witness run"))
        .find_map(|l| {
            let tokens: Vec<&str> = l.split_whitespace().collect();
            flag_value(&tokens, "--attestations")
        })
        .map(|csv| csv.split(',').filter(|s| !s.trim().is_empty()).count())
}
