//! Read-only view of the DSSE envelope `witness run` writes.
//!
//! The envelope is treated as opaque except for the signer key id and the
//! decoded attestation collection; nothing here checks signatures.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::fs_guard::{read_validated, MAX_JSON_BYTES};

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub payload: String,
    #[serde(rename = "payloadType", default)]
    pub payload_type: String,
    #[serde(default)]
    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeSignature {
    #[serde(default)]
    pub keyid: String,
    #[serde(default)]
    pub sig: String,
}

/// One entry of `predicate.attestations[]` in the decoded statement.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionEntry {
    #[serde(rename = "type", default)]
    pub type_uri: String,
    #[serde(default)]
    pub attestation: Value,
}

impl Envelope {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("attestation envelope is not valid JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_slice(&read_validated(path, MAX_JSON_BYTES)?)
            .with_context(|| format!("reading envelope {}", path.display()))
    }

    /// Key id of the first signature.
    pub fn key_id(&self) -> Result<&str> {
        self.signatures
            .first()
            .map(|s| s.keyid.as_str())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("envelope has no signatures[0].keyid"))
    }

    /// Base64-decodes the payload into the in-toto statement.
    pub fn decode_statement(&self) -> Result<Value> {
        let raw = STANDARD
            .decode(self.payload.trim())
            .context("envelope payload is not base64")?;
        serde_json::from_slice(&raw).context("envelope payload is not JSON")
    }

    /// The attestation collection entries, in collection order.
    pub fn attestations(&self) -> Result<Vec<CollectionEntry>> {
        let statement = self.decode_statement()?;
        let entries = statement
            .pointer("/predicate/attestations")
            .cloned()
            .ok_or_else(|| anyhow!("statement has no predicate.attestations"))?;
        serde_json::from_value(entries).context("predicate.attestations is malformed")
    }

    /// The captured data of the first attestor whose type URI mentions `name`.
    pub fn attestor_data(&self, name: &str) -> Result<Option<Value>> {
        Ok(self
            .attestations()?
            .into_iter()
            .find(|e| e.type_uri.contains(name))
            .map(|e| e.attestation))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_with(statement: &Value) -> Envelope {
        let payload = STANDARD.encode(serde_json::to_vec(statement).unwrap());
        let raw = json!({
            "payload": payload,
            "payloadType": "application/vnd.in-toto+json",
            "signatures": [{"keyid": "abc123", "sig": "c2ln"}]
        });
        Envelope::from_slice(&serde_json::to_vec(&raw).unwrap()).unwrap()
    }

    #[test]
    fn test_key_id() {
        let env = envelope_with(&json!({}));
        assert_eq!(env.key_id().unwrap(), "abc123");
    }

    #[test]
    fn test_missing_signature_is_error() {
        let env = Envelope::from_slice(br#"{"payload":"","signatures":[]}"#).unwrap();
        assert!(env.key_id().is_err());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(Envelope::from_slice(b"{not json").is_err());
    }

    #[test]
    fn test_attestor_data_lookup() {
        let env = envelope_with(&json!({
            "_type": "https://in-toto.io/Statement/v0.1",
            "predicate": {
                "name": "build",
                "attestations": [
                    {"type": "https://witness.dev/attestations/environment/v0.1",
                     "attestation": {"os": "linux"}},
                    {"type": "https://witness.dev/attestations/git/v0.1",
                     "attestation": {"commithash": "deadbeef"}}
                ]
            }
        }));
        assert_eq!(env.attestations().unwrap().len(), 2);
        let git = env.attestor_data("git").unwrap().unwrap();
        assert_eq!(git["commithash"], "deadbeef");
        assert!(env.attestor_data("product").unwrap().is_none());
    }

    #[test]
    fn test_payload_without_collection() {
        let env = envelope_with(&json!({"predicate": {}}));
        assert!(env.attestations().is_err());
    }
}
