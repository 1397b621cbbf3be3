use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::record::SYSTEM_PROMPT;

/// Maximum config file size (1 MB).
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Literal the `witness verify` log stream prints on success. The tool does not
/// document this wording, so it is configurable rather than baked into callers.
pub const DEFAULT_SUCCESS_MARKER: &str = "Verification succeeded";

/// Fixed expiry keeps generated policies byte-stable across runs.
pub const DEFAULT_POLICY_EXPIRES: &str = "2027-12-31T23:59:59Z";

/// Paths (or `$PATH` names) of the external binaries the corpus drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolPaths {
    pub witness: PathBuf,
    pub openssl: PathBuf,
    pub git: PathBuf,
    pub opa: PathBuf,
    /// Shell used to run the attested build command (`<shell> -c <cmd>`).
    pub shell: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            witness: PathBuf::from("witness"),
            openssl: PathBuf::from("openssl"),
            git: PathBuf::from("git"),
            opa: PathBuf::from("opa"),
            shell: PathBuf::from("bash"),
        }
    }
}

/// Chat-completion endpoint settings used by `augment`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionSettings {
    pub base_url: String,
    pub model: String,
    pub max_completion_tokens: u32,
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-5".to_string(),
            max_completion_tokens: 8000,
            timeout_secs: 300,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorpusConfig {
    pub tools: ToolPaths,
    pub policy_expires: String,
    pub success_marker: String,
    pub system_prompt: String,
    pub completion: CompletionSettings,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            policy_expires: DEFAULT_POLICY_EXPIRES.to_string(),
            success_marker: DEFAULT_SUCCESS_MARKER.to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            completion: CompletionSettings::default(),
        }
    }
}

impl CorpusConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg: Self = match path {
            Some(p) => serde_json::from_slice(&crate::fs_guard::read_validated(
                p,
                MAX_CONFIG_BYTES,
            )?)
            .with_context(|| format!("parsing config {}", p.display()))?,
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        OffsetDateTime::parse(&self.policy_expires, &Rfc3339).with_context(|| {
            format!(
                "policy_expires is not an RFC 3339 timestamp: {}",
                self.policy_expires
            )
        })?;
        if self.success_marker.trim().is_empty() {
            return Err(anyhow!("success_marker must not be empty"));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(anyhow!("system_prompt must not be empty"));
        }
        Ok(())
    }
}
