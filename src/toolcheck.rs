//! External tool availability detection.
//!
//! The corpus never attests, signs, or evaluates policies itself. It drives
//! `witness`, `openssl`, `git`, and `opa`, so a missing binary is a setup
//! failure that must stop the run before any example is attempted, with a
//! message naming what to install.
//!
//! Each tool is probed by spawning it with a version argument. A non-zero exit
//! is fine (the binary exists); only a launch failure counts as unavailable.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::ToolPaths;

/// External binaries the corpus can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Witness,
    Openssl,
    Git,
    Opa,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Self::Witness => "witness",
            Self::Openssl => "openssl",
            Self::Git => "git",
            Self::Opa => "opa",
        }
    }

    fn install_hint(self) -> &'static str {
        match self {
            Self::Witness => "https://github.com/in-toto/witness#installation",
            Self::Openssl => "install OpenSSL 1.1.1+ (Ed25519 support required)",
            Self::Git => "https://git-scm.com/downloads",
            Self::Opa => "https://www.openpolicyagent.org/docs/latest/#running-opa",
        }
    }

    fn version_args(self) -> &'static [&'static str] {
        match self {
            Self::Witness | Self::Openssl | Self::Opa => &["version"],
            Self::Git => &["--version"],
        }
    }
}

/// Summary of which configured tools launched successfully.
#[derive(Debug, Clone)]
pub struct ToolAvailability {
    pub witness: bool,
    pub openssl: bool,
    pub git: bool,
    pub opa: bool,
}

impl ToolAvailability {
    pub fn is_available(&self, tool: Tool) -> bool {
        match tool {
            Tool::Witness => self.witness,
            Tool::Openssl => self.openssl,
            Tool::Git => self.git,
            Tool::Opa => self.opa,
        }
    }

    /// Human-readable lines for each of `needed` that is missing.
    pub fn missing_tools_report(&self, needed: &[Tool]) -> Vec<String> {
        needed
            .iter()
            .filter(|t| !self.is_available(**t))
            .map(|t| format!("{}: not found. Install: {}", t.name(), t.install_hint()))
            .collect()
    }

    /// Fails with every missing tool listed, or returns `Ok(())`.
    pub fn require(&self, needed: &[Tool]) -> Result<()> {
        let missing = self.missing_tools_report(needed);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("missing required tools:\n  {}", missing.join("\n  ")))
        }
    }
}

/// Probes the configured tool paths. Never fails: a missing tool is `false`.
pub fn detect_tools(paths: &ToolPaths) -> ToolAvailability {
    ToolAvailability {
        witness: probe(&paths.witness, Tool::Witness.version_args()),
        openssl: probe(&paths.openssl, Tool::Openssl.version_args()),
        git: probe(&paths.git, Tool::Git.version_args()),
        opa: probe(&paths.opa, Tool::Opa.version_args()),
    }
}

/// Attempts to spawn `cmd args...` and returns `true` if the process
/// launched (regardless of exit code).
fn probe(cmd: &Path, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}
