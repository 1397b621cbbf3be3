//! Rephrasing verified records through a chat-completion API.
//!
//! The model may restyle questions and answers, but every fenced code block of
//! the source answer must survive byte-for-byte: those blocks are the part
//! that was verified. Variations that alter them are dropped.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CompletionSettings;
use crate::record::{read_jsonl, JsonlWriter, TrainingRecord};

const AUGMENT_SYSTEM_PROMPT: &str = "You create diverse training data variations.";

/// A chat-completion backend.
pub trait CompletionClient {
    /// Model name recorded in `_metadata.source`.
    fn model(&self) -> &str;

    fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client over blocking HTTP.
pub struct OpenAiClient {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_key: String,
}

impl OpenAiClient {
    /// Reads the API key from the configured environment variable; a missing
    /// key is a setup error.
    pub fn from_settings(settings: &CompletionSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("{} is not set", settings.api_key_env))?;
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(settings.timeout_secs)))
            .build()
            .new_agent();
        Ok(Self {
            agent,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            max_tokens: settings.max_completion_tokens,
            api_key,
        })
    }
}

impl CompletionClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::to_string(&ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_completion_tokens: self.max_tokens,
        })?;

        let response = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header(
                "User-Agent",
                &format!("witness-corpus/{}", env!("CARGO_PKG_VERSION")),
            )
            .send(body.as_bytes())
            .with_context(|| format!("POST {}", self.endpoint))?;

        let text = response
            .into_body()
            .read_to_string()
            .context("reading completion response")?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).context("completion response is not valid JSON")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion response has no message content"))
    }
}

#[derive(Debug, Deserialize)]
struct Variation {
    question: String,
    answer: String,
}

/// Bodies of every fenced block, whatever the language tag.
pub fn code_blocks(text: &str) -> Vec<&str> {
    let Ok(re) = Regex::new(r"(?s)```[A-Za-z0-9_-]*\n(.*?)```") else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// True when every code block of `original` appears verbatim in `candidate`.
pub fn preserves_code_blocks(original: &str, candidate: &str) -> bool {
    code_blocks(original)
        .iter()
        .all(|block| candidate.contains(block))
}

pub fn augmentation_prompt(question: &str, answer: &str, variations: usize) -> String {
    format!(
        r#"Create {variations} diverse variations of this witness training example.

CRITICAL: Keep ALL code blocks EXACTLY as-is (they're formally verified):
- Witness commands
- Policy JSON
- Rego code

Only vary:
- Question phrasing (beginner, intermediate, expert, troubleshooting)
- Answer structure (step-by-step, concise, detailed, reference)
- Explanation style
- Section organization

Original Q: {question}

Original A: {answer}

Output {variations} variations as a JSON array:
[
  {{"question": "...", "answer": "..."}},
  ...
]

Make each variation feel natural and different while preserving exact code."#
    )
}

/// The first `[...]` span of `reply` parsed as variations; `None` if absent or malformed.
fn parse_variations(reply: &str) -> Option<Vec<Variation>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(reply.get(start..=end)?).ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Augmented {
    pub records: Vec<TrainingRecord>,
    /// Variations discarded because a code block changed.
    pub dropped: usize,
}

/// Asks `client` for `variations` rewrites of `record`. A failed request is
/// an `Err`; an unparseable reply is an empty result.
pub fn augment_record(
    client: &dyn CompletionClient,
    record: &TrainingRecord,
    variations: usize,
    system_prompt: &str,
) -> Result<Augmented> {
    let prompt = augmentation_prompt(record.user(), record.assistant(), variations);
    let reply = client.complete(AUGMENT_SYSTEM_PROMPT, &prompt)?;

    let Some(parsed) = parse_variations(&reply) else {
        warn!("could not parse variations from completion reply");
        return Ok(Augmented::default());
    };

    let mut out = Augmented::default();
    for v in parsed {
        if v.question.trim().is_empty() || v.answer.trim().is_empty() {
            out.dropped += 1;
            continue;
        }
        if !preserves_code_blocks(record.assistant(), &v.answer) {
            out.dropped += 1;
            continue;
        }
        out.records.push(
            TrainingRecord::new(system_prompt, v.question, v.answer)
                .with_metadata("augmented", true)
                .with_metadata("source", client.model()),
        );
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AugmentStats {
    pub sources: usize,
    pub generated: usize,
    pub dropped: usize,
    /// Records whose completion request failed; they are skipped.
    pub failed: usize,
}

pub fn augment_file(
    client: &dyn CompletionClient,
    input: &Path,
    output: &Path,
    variations: usize,
    limit: Option<usize>,
    system_prompt: &str,
) -> Result<AugmentStats> {
    if variations == 0 {
        bail!("--variations must be at least 1");
    }
    let records = read_jsonl(input)?;
    let take = limit.unwrap_or(records.len()).min(records.len());
    info!(
        "augmenting {take} examples with {} ({variations} variations each)",
        client.model()
    );

    let mut writer = JsonlWriter::create(output)?;
    let mut stats = AugmentStats::default();
    for (i, record) in records.iter().take(take).enumerate() {
        if (i + 1) % 10 == 0 {
            info!("  {}/{take} ({} variations generated)", i + 1, stats.generated);
        }
        stats.sources += 1;
        let augmented = match augment_record(client, record, variations, system_prompt) {
            Ok(augmented) => augmented,
            Err(e) => {
                warn!("example {}: completion failed: {e:#}", i + 1);
                stats.failed += 1;
                continue;
            }
        };
        stats.dropped += augmented.dropped;
        for r in &augmented.records {
            writer.write(r)?;
            stats.generated += 1;
        }
    }

    info!(
        generated = stats.generated,
        dropped = stats.dropped,
        failed = stats.failed,
        "augmentation complete, output {}",
        output.display()
    );
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::record::write_jsonl;
    use std::cell::RefCell;

    struct CannedClient {
        reply: String,
        prompts: RefCell<Vec<String>>,
    }

    impl CannedClient {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompletionClient for CannedClient {
        fn model(&self) -> &str {
            "canned-model"
        }

        fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.borrow_mut().push(user.to_string());
            Ok(self.reply.clone())
        }
    }

    const ANSWER: &str = "Run this:\n```bash\nwitness run --step build -- make\n```\nDone.";

    fn source() -> TrainingRecord {
        TrainingRecord::new("sys", "How do I attest?", ANSWER)
    }

    #[test]
    fn test_keeps_variations_that_preserve_code() {
        let reply = serde_json::json!([
            {"question": "Beginner: how to attest?", "answer": "Step 1:\n```bash\nwitness run --step build -- make\n```"},
            {"question": "Edited", "answer": "```bash\nwitness run --step test -- make\n```"}
        ])
        .to_string();
        let client = CannedClient::new(&format!("Sure! Here you go:\n{reply}\nEnjoy."));
        let out = augment_record(&client, &source(), 2, "sys").unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.dropped, 1);
        let rec = &out.records[0];
        assert_eq!(rec.user(), "Beginner: how to attest?");
        let meta = rec.metadata.as_ref().unwrap();
        assert_eq!(meta["augmented"], true);
        assert_eq!(meta["source"], "canned-model");
        assert!(client.prompts.borrow()[0].contains("Create 2 diverse variations"));
    }

    #[test]
    fn test_unparseable_reply_yields_nothing() {
        let client = CannedClient::new("I cannot help with that.");
        let out = augment_record(&client, &source(), 3, "sys").unwrap();
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_code_blocks_any_language() {
        let text = "```json\n{}\n```\n```rego\npackage x\n```\n```\nplain\n```";
        assert_eq!(code_blocks(text), vec!["{}\n", "package x\n", "plain\n"]);
    }

    #[test]
    fn test_augment_file_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        write_jsonl(&input, &[source(), source(), source()]).unwrap();

        let reply = serde_json::json!([{"question": "Q", "answer": ANSWER}]).to_string();
        let client = CannedClient::new(&reply);
        let stats = augment_file(&client, &input, &output, 1, Some(2), "sys").unwrap();
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.generated, 2);
        assert_eq!(read_jsonl(&output).unwrap().len(), 2);
    }

    /// Fails every `fail_every`-th call.
    struct FlakyClient {
        calls: RefCell<usize>,
        fail_every: usize,
    }

    impl CompletionClient for FlakyClient {
        fn model(&self) -> &str {
            "flaky-model"
        }

        fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let mut calls = self.calls.borrow_mut();
            *calls += 1;
            if *calls % self.fail_every == 0 {
                bail!("429 Too Many Requests");
            }
            Ok(serde_json::json!([{"question": "Q", "answer": ANSWER}]).to_string())
        }
    }

    #[test]
    fn test_failed_request_skips_only_that_record() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        write_jsonl(&input, &vec![source(); 5]).unwrap();

        let client = FlakyClient {
            calls: RefCell::new(0),
            fail_every: 2,
        };
        let stats = augment_file(&client, &input, &output, 1, None, "sys").unwrap();
        assert_eq!(*client.calls.borrow(), 5);
        assert_eq!(
            stats,
            AugmentStats {
                sources: 5,
                generated: 3,
                dropped: 0,
                failed: 2,
            }
        );
        assert_eq!(read_jsonl(&output).unwrap().len(), 3);
    }

    #[test]
    fn test_augment_record_propagates_request_error() {
        let client = FlakyClient {
            calls: RefCell::new(0),
            fail_every: 1,
        };
        assert!(augment_record(&client, &source(), 1, "sys").is_err());
    }

    #[test]
    fn test_augmented_results_compare_equal() {
        let reply = serde_json::json!([{"question": "Q", "answer": ANSWER}]).to_string();
        let client = CannedClient::new(&reply);
        let a = augment_record(&client, &source(), 1, "sys").unwrap();
        let b = augment_record(&client, &source(), 1, "sys").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.records.len(), 1);
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let settings = CompletionSettings {
            api_key_env: "WITNESS_CORPUS_TEST_UNSET_KEY".to_string(),
            ..CompletionSettings::default()
        };
        assert!(OpenAiClient::from_settings(&settings).is_err());
    }
}
