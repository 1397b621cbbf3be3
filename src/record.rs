//! Training record model and JSON Lines I/O.
//!
//! One record is one line: `{"messages":[system,user,assistant],"_metadata":{..}}`.
//! Fine-tuning consumers require exactly three messages in that role order,
//! each with non-empty string content.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::fs_guard::{read_validated_string, MAX_JSONL_BYTES};

pub const SYSTEM_PROMPT: &str = "You are an expert in the Witness supply chain attestation framework. You help users instrument CI/CD pipelines with witness, create policy documents, and write Rego policies to validate attestations. You understand all attestors in go-witness and how to use them effectively.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Required position of each role in a record.
    pub const ORDER: [Role; 3] = [Role::System, Role::User, Role::Assistant];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub messages: Vec<Message>,
    #[serde(rename = "_metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TrainingRecord {
    pub fn new(
        system: impl Into<String>,
        user: impl Into<String>,
        assistant: impl Into<String>,
    ) -> Self {
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: system.into(),
                },
                Message {
                    role: Role::User,
                    content: user.into(),
                },
                Message {
                    role: Role::Assistant,
                    content: assistant.into(),
                },
            ],
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    fn content_of(&self, role: Role) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == role)
            .map_or("", |m| m.content.as_str())
    }

    pub fn system(&self) -> &str {
        self.content_of(Role::System)
    }

    pub fn user(&self) -> &str {
        self.content_of(Role::User)
    }

    pub fn assistant(&self) -> &str {
        self.content_of(Role::Assistant)
    }

    /// True when the record has exactly system/user/assistant with non-empty content.
    pub fn is_well_formed(&self) -> bool {
        self.messages.len() == Role::ORDER.len()
            && self
                .messages
                .iter()
                .zip(Role::ORDER)
                .all(|(m, role)| m.role == role && !m.content.trim().is_empty())
    }

    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Appends records to a JSONL file, one flushed line per record so an
/// interrupted run keeps everything accepted so far.
pub struct JsonlWriter {
    path: PathBuf,
    file: File,
    written: usize,
}

impl JsonlWriter {
    /// Opens `path` for appending, creating parent directories.
    pub fn append(path: &Path) -> Result<Self> {
        Self::open(path, true)
    }

    /// Opens `path` truncated.
    pub fn create(path: &Path) -> Result<Self> {
        Self::open(path, false)
    }

    fn open(path: &Path, append: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    pub fn write(&mut self, record: &TrainingRecord) -> Result<()> {
        let mut line = record.to_json_line()?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every record of a JSONL file. Blank lines are skipped; the first
/// malformed line aborts with its line number.
pub fn read_jsonl(path: &Path) -> Result<Vec<TrainingRecord>> {
    let text = read_validated_string(path, MAX_JSONL_BYTES)?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| anyhow!("{}:{} - invalid record: {e}", path.display(), i + 1))
        })
        .collect()
}

/// Writes `records` to `path`, replacing any existing file.
pub fn write_jsonl(path: &Path, records: &[TrainingRecord]) -> Result<()> {
    let mut w = JsonlWriter::create(path)?;
    for r in records {
        w.write(r)?;
    }
    Ok(())
}

/// Counts non-empty lines without parsing them.
pub fn count_lines(path: &Path) -> Result<usize> {
    let text = read_validated_string(path, MAX_JSONL_BYTES)?;
    Ok(text.lines().filter(|l| !l.trim().is_empty()).count())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_shape() {
        let r = TrainingRecord::new(SYSTEM_PROMPT, "q?", "a.");
        let v: Value = serde_json::from_str(&r.to_json_line().unwrap()).unwrap();
        assert_eq!(v["messages"].as_array().unwrap().len(), 3);
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["role"], "user");
        assert_eq!(v["messages"][2]["role"], "assistant");
        assert!(v.get("_metadata").is_none());
        assert!(r.is_well_formed());
    }

    #[test]
    fn test_metadata_serialized_with_underscore() {
        let r = TrainingRecord::new("s", "q", "a").with_metadata("source", "human");
        let v: Value = serde_json::from_str(&r.to_json_line().unwrap()).unwrap();
        assert_eq!(v["_metadata"]["source"], "human");
    }

    #[test]
    fn test_empty_content_not_well_formed() {
        let r = TrainingRecord::new("s", " ", "a");
        assert!(!r.is_well_formed());
    }

    #[test]
    fn test_writer_appends_and_reader_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.jsonl");
        {
            let mut w = JsonlWriter::append(&path).unwrap();
            w.write(&TrainingRecord::new("s", "q1", "a1")).unwrap();
            assert_eq!(w.written(), 1);
        }
        {
            let mut w = JsonlWriter::append(&path).unwrap();
            w.write(&TrainingRecord::new("s", "q2", "a2")).unwrap();
        }
        let mut text = fs::read_to_string(&path).unwrap();
        text.push('\n');
        fs::write(&path, text).unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].user(), "q2");
        assert_eq!(count_lines(&path).unwrap(), 2);
    }

    #[test]
    fn test_read_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        let good = TrainingRecord::new("s", "q", "a").to_json_line().unwrap();
        fs::write(&path, format!("{good}\n{{oops\n")).unwrap();
        let err = read_jsonl(&path).unwrap_err().to_string();
        assert!(err.contains(":2 -"), "{err}");
    }
}
