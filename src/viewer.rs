//! Browsing a corpus directory from the terminal.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::warn;

use crate::fs_guard::{read_validated_string, MAX_JSONL_BYTES};
use crate::record::TrainingRecord;
use crate::validate::jsonl_files;

/// A record plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedExample {
    /// Parent directory name of the file.
    pub category: String,
    pub file: String,
    pub line: usize,
    pub record: TrainingRecord,
}

#[derive(Debug, Default)]
pub struct ExampleViewer {
    pub examples: Vec<LoadedExample>,
}

impl ExampleViewer {
    /// Loads every `*.jsonl` under `data_dir`; unparseable lines are skipped with a warning.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut examples = Vec::new();
        for path in jsonl_files(data_dir) {
            let category = path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let file = path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let text = read_validated_string(&path, MAX_JSONL_BYTES)?;
            for (i, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TrainingRecord>(line) {
                    Ok(record) => examples.push(LoadedExample {
                        category: category.clone(),
                        file: file.clone(),
                        line: i + 1,
                        record,
                    }),
                    Err(_) => warn!("invalid record at {}:{}", path.display(), i + 1),
                }
            }
        }
        Ok(Self { examples })
    }

    pub fn filter_category(&self, category: &str) -> Vec<&LoadedExample> {
        self.examples
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    /// Per-category example counts.
    pub fn stats(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for e in &self.examples {
            *counts.entry(e.category.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Case-insensitive substring match over the user and assistant text.
pub fn matches_query(example: &LoadedExample, query: &str) -> bool {
    let q = query.to_lowercase();
    example.record.user().to_lowercase().contains(&q)
        || example.record.assistant().to_lowercase().contains(&q)
}

/// Up to `n` examples drawn with a seeded RNG.
pub fn sample<'a>(examples: &[&'a LoadedExample], n: usize, seed: u64) -> Vec<&'a LoadedExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    examples.choose_multiple(&mut rng, n).copied().collect()
}

fn truncated(text: &str, max_chars: Option<usize>) -> String {
    match max_chars {
        Some(max) if text.chars().count() > max => {
            let head: String = text.chars().take(max).collect();
            format!("{head}\n... [truncated]")
        }
        _ => text.to_string(),
    }
}

/// Readable multi-section rendering of one example.
pub fn render(example: &LoadedExample, index: usize, total: usize, max_chars: Option<usize>) -> String {
    let rule = "=".repeat(80);
    let thin = "-".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Example #{} of {total}", index + 1);
    let _ = writeln!(out, "Category: {}/{}", example.category, example.file);
    let _ = writeln!(out, "Location: {}.jsonl:{}", example.file, example.line);
    let _ = writeln!(out, "{rule}");
    for (label, text) in [
        ("SYSTEM", example.record.system()),
        ("USER", example.record.user()),
        ("ASSISTANT", example.record.assistant()),
    ] {
        let _ = writeln!(out, "\n{label}:\n{thin}\n{}", truncated(text, max_chars));
    }
    let _ = writeln!(out, "\n{rule}");
    out
}

pub fn render_stats(viewer: &ExampleViewer) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total examples: {}\n", viewer.examples.len());
    let _ = writeln!(out, "Examples by category:");
    for (cat, count) in viewer.stats() {
        let _ = writeln!(out, "  {cat:20}: {count:3} examples");
    }
    out
}
