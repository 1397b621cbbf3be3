//! Witness policy document model.
//!
//! A policy maps step names to the attestation types they must carry and to
//! the functionaries (public keys) allowed to sign them. The generator builds
//! one single-step policy per example; the validators parse policies back out
//! of generated answers and check them for internal consistency.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::attestor::Attestor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub expires: String,
    pub steps: BTreeMap<String, Step>,
    pub publickeys: BTreeMap<String, PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub attestations: Vec<AttestationRequirement>,
    pub functionaries: Vec<Functionary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRequirement {
    #[serde(rename = "type")]
    pub type_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Functionary {
    #[serde(rename = "type")]
    pub kind: String,
    pub publickeyid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub keyid: String,
    /// Base64 of the PEM-encoded public key file.
    pub key: String,
}

impl Policy {
    /// Single-step policy requiring every attestor in `attestors` and trusting
    /// exactly one public key.
    pub fn build(
        step: &str,
        attestors: &[Attestor],
        key_id: &str,
        public_key_pem: &[u8],
        expires: &str,
    ) -> Self {
        let step_def = Step {
            name: step.to_string(),
            attestations: attestors
                .iter()
                .map(|a| AttestationRequirement {
                    type_uri: a.type_uri(),
                })
                .collect(),
            functionaries: vec![Functionary {
                kind: "publickey".to_string(),
                publickeyid: key_id.to_string(),
            }],
        };
        let key = PublicKey {
            keyid: key_id.to_string(),
            key: STANDARD.encode(public_key_pem),
        };
        Self {
            expires: expires.to_string(),
            steps: BTreeMap::from([(step.to_string(), step_def)]),
            publickeys: BTreeMap::from([(key_id.to_string(), key)]),
        }
    }

    /// Two-space indented JSON, the form embedded in answers and written to disk.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_pretty_json()?)
            .with_context(|| format!("writing policy {}", path.display()))
    }

    /// Attestation type URIs required by `step`, in policy order.
    pub fn attestation_types(&self, step: &str) -> Option<Vec<&str>> {
        self.steps.get(step).map(|s| {
            s.attestations
                .iter()
                .map(|a| a.type_uri.as_str())
                .collect()
        })
    }
}

/// Structural problems in an arbitrary policy JSON value. Works on untyped
/// JSON so partially-wrong policies still yield every issue instead of a
/// single deserialization error.
pub fn consistency_issues(policy: &Value) -> Vec<String> {
    let Some(obj) = policy.as_object() else {
        return vec!["Policy is not a JSON object".to_string()];
    };

    let mut issues = Vec::new();
    let keys = obj.get("publickeys").and_then(Value::as_object);

    if obj.get("steps").is_none() {
        issues.push("Missing 'steps' field".to_string());
    }
    if keys.is_none() {
        issues.push("Missing 'publickeys' field".to_string());
    }

    if let Some(keys) = keys {
        for (key_id, key_data) in keys {
            if key_data.get("keyid").is_none() {
                issues.push(format!("Public key '{key_id}' missing 'keyid'"));
            }
            if key_data.get("key").is_none() {
                issues.push(format!("Public key '{key_id}' missing 'key'"));
            }
        }
    }

    if let Some(steps) = obj.get("steps").and_then(Value::as_object) {
        for (step_name, step) in steps {
            if step.get("attestations").is_none() {
                issues.push(format!("Step '{step_name}' missing 'attestations'"));
            }
            let Some(functionaries) = step.get("functionaries").and_then(Value::as_array) else {
                issues.push(format!("Step '{step_name}' missing 'functionaries'"));
                continue;
            };
            for f in functionaries {
                let Some(id) = f.get("publickeyid").and_then(Value::as_str) else {
                    continue;
                };
                if !keys.is_some_and(|k| k.contains_key(id)) {
                    issues.push(format!(
                        "Step '{step_name}' functionary references unknown key '{id}'"
                    ));
                }
            }
        }
    }

    issues
}
