//! Seeded train/validation splits.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::record::{read_jsonl, write_jsonl};

pub const DEFAULT_RATIO: f64 = 0.9;
pub const TRAIN_FILE: &str = "train.jsonl";
pub const VALID_FILE: &str = "valid.jsonl";

#[derive(Debug, Clone, PartialEq)]
pub struct SplitSummary {
    pub train: usize,
    pub valid: usize,
    pub train_path: PathBuf,
    pub valid_path: PathBuf,
}

/// Number of training records for `total` records at `ratio` (floored).
pub fn train_len(total: usize, ratio: f64) -> usize {
    ((total as f64) * ratio).floor() as usize
}

/// Shuffles `input` with a `seed`-ed RNG and writes the first
/// `floor(len * ratio)` records to `train.jsonl`, the rest to `valid.jsonl`.
pub fn split_dataset(input: &Path, out_dir: &Path, ratio: f64, seed: u64) -> Result<SplitSummary> {
    if !(ratio > 0.0 && ratio <= 1.0) {
        bail!("split ratio must be in (0, 1], got {ratio}");
    }
    let mut records = read_jsonl(input)?;
    info!("loaded {} examples from {}", records.len(), input.display());

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    let valid = records.split_off(train_len(records.len(), ratio).min(records.len()));

    let train_path = out_dir.join(TRAIN_FILE);
    let valid_path = out_dir.join(VALID_FILE);
    write_jsonl(&train_path, &records)?;
    write_jsonl(&valid_path, &valid)?;

    info!(
        "train: {} examples -> {}",
        records.len(),
        train_path.display()
    );
    info!("valid: {} examples -> {}", valid.len(), valid_path.display());

    Ok(SplitSummary {
        train: records.len(),
        valid: valid.len(),
        train_path,
        valid_path,
    })
}
