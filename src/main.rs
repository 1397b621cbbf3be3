use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use witness_corpus::augment::{augment_file, OpenAiClient};
use witness_corpus::collector::Collector;
use witness_corpus::config::CorpusConfig;
use witness_corpus::generator::{
    DatasetGenerator, GenerationProfile, GeneratorOptions, DEFAULT_SEED,
};
use witness_corpus::knowledge::{self, KnowledgeKind};
use witness_corpus::record::{write_jsonl, JsonlWriter};
use witness_corpus::rego::{filter_dataset, RealAttestations, RegoVerifier};
use witness_corpus::replay::replay_file;
use witness_corpus::splits::{split_dataset, DEFAULT_RATIO};
use witness_corpus::toolcheck::{detect_tools, Tool};
use witness_corpus::validate::{check_file, DatasetValidator};
use witness_corpus::viewer::{self, ExampleViewer, LoadedExample};
use witness_corpus::witness::WitnessCli;

#[derive(Parser)]
#[command(
    name = "witness-corpus",
    about = "Verified training corpus for the Witness attestation framework",
    version
)]
struct Cli {
    /// JSON config file (tool paths, policy expiry, completion API settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Generate verified examples by executing witness end to end
    Generate {
        /// Number of attempts to make
        #[arg(long, default_value_t = 100)]
        target: usize,

        /// JSONL file accepted examples are appended to
        #[arg(long, default_value = "data/verified/train.jsonl")]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = GenerationProfile::Classic)]
        profile: GenerationProfile,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Vary the build command (diverse profile)
        #[arg(long)]
        vary_commands: bool,
    },

    /// Structural validation of every JSONL file under a directory
    Validate {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Semantic checks of policies and commands inside answers
    Check {
        #[arg(long)]
        input: PathBuf,

        /// Check a random sample of this many records
        #[arg(long)]
        sample: Option<usize>,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Re-execute each record's witness commands and compare policies
    Replay {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Keep only records whose Rego blocks pass `opa check` and `opa eval`
    VerifyRego {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Evaluate against attestation data from a real `witness run`
        #[arg(long)]
        real_data: bool,
    },

    /// Seeded train/validation split
    Split {
        #[arg(long)]
        input: PathBuf,

        #[arg(long, default_value = "data/splits")]
        output_dir: PathBuf,

        #[arg(long, default_value_t = DEFAULT_RATIO)]
        ratio: f64,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Rephrase records through a completion API, keeping code blocks verbatim
    Augment {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value_t = 3)]
        variations: usize,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Template-based conceptual Q/A
    Knowledge {
        #[arg(long, value_enum)]
        kind: KnowledgeKind,

        #[arg(long)]
        output: PathBuf,

        /// Question phrasing seed (complex-rego)
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Interactive collection of human-written Q/A
    Collect {
        #[arg(long, default_value = "data/human/qa_pairs.jsonl")]
        output: PathBuf,
    },

    /// Browse a corpus directory
    View {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(long)]
        category: Option<String>,

        /// Case-insensitive search over questions and answers
        #[arg(long)]
        search: Option<String>,

        /// Show this many random examples
        #[arg(long)]
        random: Option<usize>,

        /// Print per-category counts only
        #[arg(long)]
        stats: bool,

        /// Truncate each message to this many characters
        #[arg(long)]
        max_chars: Option<usize>,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CorpusConfig::load(cli.config.as_deref())?;

    match cli.cmd {
        Cmd::Generate {
            target,
            output,
            profile,
            seed,
            vary_commands,
        } => {
            detect_tools(&config.tools).require(&[Tool::Witness, Tool::Openssl, Tool::Git])?;
            let options = GeneratorOptions {
                profile,
                seed,
                vary_commands,
            };
            DatasetGenerator::new(&config, &output, options).run(target)?;
            Ok(())
        }
        Cmd::Validate { data_dir } => {
            let report = DatasetValidator::new(&data_dir).validate_all()?;
            report.print_summary();
            if !report.passed() {
                return Err(anyhow!("validation failed with {} error(s)", report.errors.len()));
            }
            Ok(())
        }
        Cmd::Check {
            input,
            sample,
            seed,
        } => {
            let report = check_file(&input, sample, seed)?;
            report.print_summary();
            if !report.passed() {
                return Err(anyhow!(
                    "{} example(s) failed semantic checks",
                    report.failures.len()
                ));
            }
            Ok(())
        }
        Cmd::Replay { input, limit } => {
            detect_tools(&config.tools).require(&[Tool::Witness, Tool::Openssl, Tool::Git])?;
            let summary = replay_file(&config, &input, limit)?;
            println!("Replayed: {}", summary.replayed);
            println!("Reproduced: {}", summary.reproduced);
            println!("Diverged: {}", summary.diverged);
            println!("Not replayable: {}", summary.not_replayable);
            if !summary.passed() {
                return Err(anyhow!("replay found records that do not reproduce"));
            }
            Ok(())
        }
        Cmd::VerifyRego {
            input,
            output,
            real_data,
        } => verify_rego(&config, &input, &output, real_data),
        Cmd::Split {
            input,
            output_dir,
            ratio,
            seed,
        } => {
            split_dataset(&input, &output_dir, ratio, seed)?;
            Ok(())
        }
        Cmd::Augment {
            input,
            output,
            variations,
            limit,
        } => {
            let client = OpenAiClient::from_settings(&config.completion)?;
            let stats = augment_file(
                &client,
                &input,
                &output,
                variations,
                limit,
                &config.system_prompt,
            )?;
            println!(
                "Generated {} variations from {} examples ({} dropped, {} failed)",
                stats.generated, stats.sources, stats.dropped, stats.failed
            );
            Ok(())
        }
        Cmd::Knowledge { kind, output, seed } => {
            let records = match kind {
                KnowledgeKind::Troubleshooting => knowledge::troubleshooting(&config.system_prompt),
                KnowledgeKind::Concepts => knowledge::concepts(&config.system_prompt),
                KnowledgeKind::Fields => knowledge::fields(&config.system_prompt),
                KnowledgeKind::ComplexRego => knowledge::complex_rego(&config.system_prompt, seed),
                KnowledgeKind::AttackDetection => knowledge::attack_detection(&config.system_prompt),
                KnowledgeKind::ErrorScenarios => knowledge::error_scenarios(&config.system_prompt),
                KnowledgeKind::EdgeCases => knowledge::edge_cases(&config.system_prompt),
                KnowledgeKind::Schema => {
                    detect_tools(&config.tools).require(&[Tool::Witness])?;
                    let cli = WitnessCli::new(&config.tools.witness, config.success_marker.as_str());
                    knowledge::schema_records(&cli, &config.system_prompt)?
                }
            };
            write_jsonl(&output, &records)?;
            info!("wrote {} examples to {}", records.len(), output.display());
            Ok(())
        }
        Cmd::Collect { output } => {
            let mut writer = JsonlWriter::append(&output)?;
            let stdin = io::stdin();
            Collector::new(stdin.lock(), io::stdout(), &config.system_prompt).run(&mut writer)?;
            Ok(())
        }
        Cmd::View {
            data_dir,
            category,
            search,
            random,
            stats,
            max_chars,
            seed,
        } => view(
            &data_dir,
            category.as_deref(),
            search.as_deref(),
            random,
            stats,
            max_chars,
            seed,
        ),
    }
}

fn verify_rego(config: &CorpusConfig, input: &Path, output: &Path, real_data: bool) -> Result<()> {
    let mut needed = vec![Tool::Opa];
    if real_data {
        needed.extend([Tool::Witness, Tool::Openssl, Tool::Git]);
    }
    detect_tools(&config.tools).require(&needed)?;

    let verifier = RegoVerifier::new(&config.tools.opa);
    let mut real = real_data.then(|| RealAttestations::new(config));
    let stats = filter_dataset(&verifier, real.as_mut(), input, output)?;

    println!("Examples: {}", stats.examples);
    println!("Valid rego blocks: {}", stats.blocks_valid);
    println!("Examples with invalid rego: {}", stats.examples_invalid);
    if real_data {
        println!("Skipped (no attestation data): {}", stats.skipped);
    }
    println!("Kept: {} -> {}", stats.kept, output.display());
    Ok(())
}

fn view(
    data_dir: &Path,
    category: Option<&str>,
    search: Option<&str>,
    random: Option<usize>,
    stats: bool,
    max_chars: Option<usize>,
    seed: u64,
) -> Result<()> {
    let loaded = ExampleViewer::load(data_dir)?;
    if stats {
        print!("{}", viewer::render_stats(&loaded));
        return Ok(());
    }

    let mut selected: Vec<&LoadedExample> = match category {
        Some(c) => loaded.filter_category(c),
        None => loaded.examples.iter().collect(),
    };
    if let Some(q) = search {
        selected.retain(|e| viewer::matches_query(e, q));
        println!("Found {} examples matching '{q}'", selected.len());
    }
    if let Some(n) = random {
        selected = viewer::sample(&selected, n, seed);
    }
    if selected.is_empty() {
        println!("No examples found.");
        return Ok(());
    }

    let total = selected.len();
    for (i, example) in selected.into_iter().enumerate() {
        print!("{}", viewer::render(example, i, total, max_chars));
    }
    Ok(())
}
