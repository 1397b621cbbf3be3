//! Thin wrapper over the external `witness` CLI.
//!
//! Flag spellings are exactly those the generated answers teach, so a record
//! and the command that produced it never drift apart.

use anyhow::Result;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::attestor::{join_csv, Attestor};
use crate::exec::{run_tool, ToolOutput};

/// Inputs to one `witness run` invocation.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub step: &'a str,
    pub attestors: &'a [Attestor],
    pub signer_key: &'a Path,
    pub outfile: &'a Path,
    pub work_dir: &'a Path,
    pub env: &'a [(String, String)],
    /// The attested build command, passed after `--`.
    pub command: Vec<OsString>,
}

/// Result of `witness verify`. Acceptance requires both a zero exit code and
/// the success marker in stderr.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub output: ToolOutput,
    pub marker_seen: bool,
}

impl VerifyOutcome {
    pub fn passed(&self) -> bool {
        self.output.success && self.marker_seen
    }
}

#[derive(Debug, Clone)]
pub struct WitnessCli {
    binary: PathBuf,
    success_marker: String,
}

impl WitnessCli {
    pub fn new(binary: impl Into<PathBuf>, success_marker: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            success_marker: success_marker.into(),
        }
    }

    pub fn success_marker(&self) -> &str {
        &self.success_marker
    }

    pub fn run(&self, req: &RunRequest<'_>) -> Result<ToolOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg("--step")
            .arg(req.step)
            .arg("--signer-file-key-path")
            .arg(req.signer_key)
            .arg("--outfile")
            .arg(req.outfile)
            .arg("--attestations")
            .arg(join_csv(req.attestors))
            .arg("--")
            .args(&req.command)
            .current_dir(req.work_dir)
            .envs(req.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        run_tool(&mut cmd, "witness run")
    }

    pub fn sign(
        &self,
        signer_key: &Path,
        infile: &Path,
        outfile: &Path,
        work_dir: &Path,
    ) -> Result<ToolOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("sign")
            .arg("--signer-file-key-path")
            .arg(signer_key)
            .arg("--infile")
            .arg(infile)
            .arg("--outfile")
            .arg(outfile)
            .current_dir(work_dir);
        run_tool(&mut cmd, "witness sign")
    }

    pub fn verify(
        &self,
        signed_policy: &Path,
        public_key: &Path,
        attestation: &Path,
        artifact: &Path,
        work_dir: &Path,
    ) -> Result<VerifyOutcome> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("verify")
            .arg("--policy")
            .arg(signed_policy)
            .arg("--publickey")
            .arg(public_key)
            .arg("--attestations")
            .arg(attestation)
            .arg("-f")
            .arg(artifact)
            .current_dir(work_dir);
        let output = run_tool(&mut cmd, "witness verify")?;
        // witness logs everything, including the verdict, to stderr.
        let marker_seen = output.stderr.contains(&self.success_marker);
        Ok(VerifyOutcome {
            output,
            marker_seen,
        })
    }

    /// Attestor names from `witness attestors list`.
    pub fn attestors_list(&self) -> Result<Vec<String>> {
        let out = run_tool(
            Command::new(&self.binary).args(["attestors", "list"]),
            "witness attestors list",
        )?;
        Ok(parse_attestor_table(&out.stdout))
    }

    /// JSON schema from `witness attestors schema <name>`, if the tool has one.
    pub fn attestor_schema(&self, name: &str) -> Result<Option<Value>> {
        let out = run_tool(
            Command::new(&self.binary).args(["attestors", "schema", name]),
            "witness attestors schema",
        )?;
        if !out.success {
            return Ok(None);
        }
        Ok(serde_json::from_str(&out.stdout).ok())
    }
}

/// Parses the `| NAME | TYPE | RUN TYPE |` table printed by `attestors list`.
pub fn parse_attestor_table(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.contains('|') && !line.contains("NAME") && !line.contains("---"))
        .filter_map(|line| line.split('|').map(str::trim).nth(1))
        .map(|name| {
            name.replace(" (default)", "")
                .replace(" (always run)", "")
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attestor_table() {
        let table = "\
+--------------------+------------------------------------+-----------+
|        NAME        |                TYPE                |  RUN TYPE |
+--------------------+------------------------------------+-----------+
| environment (always run) | https://witness.dev/attestations/environment/v0.1 | prematerial |
| git (default)      | https://witness.dev/attestations/git/v0.1 | prematerial |
| product            | https://witness.dev/attestations/product/v0.1 | postproduct |
+--------------------+------------------------------------+-----------+
";
        assert_eq!(
            parse_attestor_table(table),
            vec!["environment", "git", "product"]
        );
    }

    #[test]
    fn test_verify_outcome_requires_marker_and_exit() {
        let ok = ToolOutput {
            success: true,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(!VerifyOutcome {
            output: ok.clone(),
            marker_seen: false
        }
        .passed());
        assert!(VerifyOutcome {
            output: ok,
            marker_seen: true
        }
        .passed());
    }

    #[test]
    fn test_missing_binary_is_error() {
        let cli = WitnessCli::new("/nonexistent/witness", "Verification succeeded");
        assert!(cli.attestors_list().is_err());
    }
}
