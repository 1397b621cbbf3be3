//! Subprocess plumbing shared by every external tool wrapper.
//!
//! All tools are launched with `std::process::Command` (no shell unless the
//! caller explicitly asks for one) and their output is captured. Nothing here
//! applies a timeout: a hung tool blocks the caller, matching the sequential
//! generation model.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::process::Command;

const MAX_TOOL_ERR_BYTES: usize = 8 * 1024; // 8KB

/// Captured result of one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Stderr trimmed and redacted for inclusion in logs or reject reasons.
    pub fn stderr_excerpt(&self) -> String {
        sanitize_tool_stderr(self.stderr.as_bytes())
    }
}

/// Runs `cmd` and captures its output. A non-zero exit is *not* an error here;
/// only a launch failure (binary missing, permission denied) is.
pub fn run_tool(cmd: &mut Command, name: &str) -> Result<ToolOutput> {
    let out = cmd.output().with_context(|| format!("running {name}"))?;
    Ok(ToolOutput {
        success: out.status.success(),
        exit_code: out.status.code(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

/// Runs an external tool, returning an error with sanitized stderr on failure.
pub fn run_checked(cmd: &mut Command, name: &str) -> Result<ToolOutput> {
    let out = run_tool(cmd, name)?;
    if !out.success {
        return Err(anyhow!("{name} failed: {}", out.stderr_excerpt()));
    }
    Ok(out)
}

pub fn sanitize_tool_stderr(stderr: &[u8]) -> String {
    let mut s = String::from_utf8_lossy(stderr).to_string();
    if s.len() > MAX_TOOL_ERR_BYTES {
        let mut cut = MAX_TOOL_ERR_BYTES;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("\n[TRUNCATED]");
    }

    // Best-effort secret redaction: completion API keys and signer material
    // must never reach the corpus logs.
    let patterns = [
        (r"sk-[A-Za-z0-9_\-]{20,200}", "sk-****************"),
        (r"(?i)ghp_[A-Za-z0-9]{30,60}", "ghp_****************"),
        (
            r"(?i)BEGIN (RSA |EC |OPENSSH )?PRIVATE KEY",
            "BEGIN [REDACTED] PRIVATE KEY",
        ),
        (
            r"(?i)(password|token|api_key)\s*[:=]\s*[^\s]+",
            "[REDACTED]=[REDACTED]",
        ),
        (r"(?i)bearer\s+[a-z0-9\-_\.=]{1,500}", "bearer [REDACTED]"),
    ];
    for (pat, repl) in patterns {
        if let Ok(re) = Regex::new(pat) {
            s = re.replace_all(&s, repl).to_string();
        }
    }
    s.trim().to_string()
}
