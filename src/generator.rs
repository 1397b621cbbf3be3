//! Dataset generation loop over the verified-example pipeline.

use anyhow::Result;
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::attestor::{all_combinations, join_human, Attestor, CLASSIC_COMBINATIONS, SAFE_ATTESTORS};
use crate::config::CorpusConfig;
use crate::pipeline::{ExampleOutcome, ExampleSpec, VerifiedPipeline};
use crate::record::{count_lines, JsonlWriter};
use crate::render::{
    default_command, render_question, usable_patterns, QUESTION_TEMPLATES, STEP_NAMES,
};

pub const DEFAULT_SEED: u64 = 42;

/// How attempts are parameterised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenerationProfile {
    /// Step `build`, the fixed 15-entry attestor cycle, first question template.
    Classic,
    /// Every safe attestor subset, random step names and question templates.
    Diverse,
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub profile: GenerationProfile,
    pub seed: u64,
    /// Diverse profile only: pick among all usable command patterns.
    pub vary_commands: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            profile: GenerationProfile::Classic,
            seed: DEFAULT_SEED,
            vary_commands: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub attempts: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Rejection counts keyed by [`crate::pipeline::RejectReason::kind`].
    pub by_reason: BTreeMap<String, usize>,
}

impl GenerationStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.accepted as f64 * 100.0 / self.attempts as f64
    }

    fn record(&mut self, outcome: &ExampleOutcome) {
        self.attempts += 1;
        match outcome {
            ExampleOutcome::Accepted(_) => self.accepted += 1,
            ExampleOutcome::Rejected(reason) => {
                self.rejected += 1;
                *self.by_reason.entry(reason.kind().to_string()).or_default() += 1;
            }
        }
    }
}

pub struct DatasetGenerator {
    pipeline: VerifiedPipeline,
    output: PathBuf,
    options: GeneratorOptions,
    rng: StdRng,
    combinations: Vec<Vec<Attestor>>,
}

impl DatasetGenerator {
    pub fn new(config: &CorpusConfig, output: &Path, options: GeneratorOptions) -> Self {
        let combinations = match options.profile {
            GenerationProfile::Classic => CLASSIC_COMBINATIONS.iter().map(|c| c.to_vec()).collect(),
            GenerationProfile::Diverse => all_combinations(&SAFE_ATTESTORS),
        };
        Self {
            pipeline: VerifiedPipeline::new(config),
            output: output.to_path_buf(),
            rng: StdRng::seed_from_u64(options.seed),
            options,
            combinations,
        }
    }

    /// Parameters for attempt `example_num` (1-based). Random choices are
    /// drawn here, before any tool runs, so the sequence depends only on the seed.
    pub fn plan(&mut self, example_num: usize) -> ExampleSpec {
        let attestors = self
            .combinations
            .get(example_num % self.combinations.len().max(1))
            .cloned()
            .unwrap_or_default();

        let (step, template, pattern) = match self.options.profile {
            GenerationProfile::Classic => ("build", QUESTION_TEMPLATES[0], default_command(&attestors)),
            GenerationProfile::Diverse => {
                let step = STEP_NAMES.choose(&mut self.rng).copied().unwrap_or("build");
                let pattern = if self.options.vary_commands {
                    usable_patterns(&attestors)
                        .choose(&mut self.rng)
                        .copied()
                        .unwrap_or_else(|| default_command(&attestors))
                } else {
                    default_command(&attestors)
                };
                let template = QUESTION_TEMPLATES
                    .choose(&mut self.rng)
                    .copied()
                    .unwrap_or(QUESTION_TEMPLATES[0]);
                (step, template, pattern)
            }
        };

        ExampleSpec {
            example_num,
            question: render_question(template, step, &attestors),
            step: step.to_string(),
            command: pattern.command.to_string(),
            attestors,
        }
    }

    /// Attempts `target` examples, appending each accepted record to the output
    /// file as it is produced. Returns `Err` only on fatal setup failure.
    pub fn run(&mut self, target: usize) -> Result<GenerationStats> {
        info!(
            requested = target,
            profile = ?self.options.profile,
            combinations = self.combinations.len(),
            output = %self.output.display(),
            "generating verified witness examples"
        );

        let mut writer: Option<JsonlWriter> = None;
        let mut stats = GenerationStats::default();

        for i in 1..=target {
            if i % 100 == 1 || i <= 10 {
                info!(
                    "progress: {i}/{target} (accepted: {}, rejected: {})",
                    stats.accepted, stats.rejected
                );
            }

            let spec = self.plan(i);
            let outcome = self.pipeline.attempt(&spec)?;
            stats.record(&outcome);

            match outcome {
                ExampleOutcome::Accepted(example) => {
                    if i <= 10 {
                        info!("example {i} verified: {}", join_human(&spec.attestors));
                    }
                    if writer.is_none() {
                        writer = Some(JsonlWriter::append(&self.output)?);
                    }
                    if let Some(w) = writer.as_mut() {
                        w.write(&example.record)?;
                    }
                }
                ExampleOutcome::Rejected(reason) => {
                    if i <= 10 {
                        warn!("example {i} failed ({}): {reason}", join_human(&spec.attestors));
                    }
                }
            }
        }

        self.log_summary(&stats)?;
        Ok(stats)
    }

    fn log_summary(&self, stats: &GenerationStats) -> Result<()> {
        info!(
            attempts = stats.attempts,
            accepted = stats.accepted,
            rejected = stats.rejected,
            "generation complete, success rate {:.1}%",
            stats.success_rate()
        );
        for (kind, count) in &stats.by_reason {
            info!("  rejected by {kind}: {count}");
        }
        if self.output.exists() {
            let bytes = std::fs::metadata(&self.output)?.len();
            info!(
                "output {} ({:.1} MB, {} examples)",
                self.output.display(),
                bytes as f64 / 1024.0 / 1024.0,
                count_lines(&self.output)?
            );
        } else {
            warn!("no output file created (all examples failed)");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::pipeline::RejectReason;

    fn generator(profile: GenerationProfile, vary_commands: bool) -> DatasetGenerator {
        DatasetGenerator::new(
            &CorpusConfig::default(),
            Path::new("unused.jsonl"),
            GeneratorOptions {
                profile,
                seed: DEFAULT_SEED,
                vary_commands,
            },
        )
    }

    #[test]
    fn test_classic_plan_cycles_combinations() {
        let mut g = generator(GenerationProfile::Classic, false);
        let spec = g.plan(15);
        assert_eq!(spec.attestors, CLASSIC_COMBINATIONS[0].to_vec());
        assert_eq!(spec.step, "build");
        assert_eq!(
            spec.question,
            "How do I create a complete witness configuration for a build step with git, environment attestors that passes verification?"
        );
        assert_eq!(spec.command, "echo 'Building...' > output.txt");
    }

    #[test]
    fn test_diverse_plan_is_seed_deterministic() {
        let mut a = generator(GenerationProfile::Diverse, true);
        let mut b = generator(GenerationProfile::Diverse, true);
        for i in 1..=40 {
            let (x, y) = (a.plan(i), b.plan(i));
            assert_eq!(x.step, y.step);
            assert_eq!(x.question, y.question);
            assert_eq!(x.command, y.command);
            assert_eq!(x.attestors, y.attestors);
        }
    }

    #[test]
    fn test_diverse_plan_cycles_fifteen_subsets() {
        let mut g = generator(GenerationProfile::Diverse, false);
        let subsets = all_combinations(&SAFE_ATTESTORS);
        assert_eq!(g.plan(14).attestors, subsets[14]);
        assert_eq!(g.plan(14).attestors.len(), 4);
        // no duplicated full set: index 15 wraps to the first single attestor
        assert_eq!(g.plan(15).attestors, vec![Attestor::Git]);
        assert_eq!(g.plan(31).attestors, subsets[1]);
    }

    #[test]
    fn test_diverse_plan_never_reads_missing_material() {
        let mut g = generator(GenerationProfile::Diverse, true);
        for i in 1..=60 {
            let spec = g.plan(i);
            if !spec.attestors.contains(&Attestor::Material) {
                assert!(!spec.command.contains("input.txt"), "{}", spec.command);
            }
            assert!(STEP_NAMES.contains(&spec.step.as_str()));
        }
    }

    #[test]
    fn test_stats_bucket_reasons() {
        let mut s = GenerationStats::default();
        s.record(&ExampleOutcome::Rejected(RejectReason::MissingSuccessMarker {
            marker: "x".into(),
        }));
        s.record(&ExampleOutcome::Rejected(RejectReason::Envelope("bad".into())));
        s.record(&ExampleOutcome::Rejected(RejectReason::Envelope("worse".into())));
        assert_eq!(s.attempts, 3);
        assert_eq!(s.rejected, 3);
        assert_eq!(s.by_reason["envelope"], 2);
        assert_eq!(s.success_rate(), 0.0);
    }
}
