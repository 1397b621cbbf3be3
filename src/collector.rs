//! Interactive collection of human-written Q/A for under-covered topics.
//!
//! Generic over the input and output streams so sessions can be scripted.
//! Each accepted pair is appended to the output file immediately.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

use crate::record::{JsonlWriter, TrainingRecord};

pub struct GapArea {
    pub name: &'static str,
    pub description: &'static str,
    pub example_questions: [&'static str; 3],
}

pub const GAP_AREAS: [GapArea; 8] = [
    GapArea {
        name: "GitHub Actions Integration",
        description: "How to use witness in GitHub Actions workflows",
        example_questions: [
            "How do I integrate witness into my GitHub Actions workflow?",
            "What GitHub environment variables does the github attestor capture?",
            "Show me a complete GitHub Actions workflow with witness attestations",
        ],
    },
    GapArea {
        name: "Container/Docker Workflows",
        description: "Docker builds, OCI images, container attestations",
        example_questions: [
            "How do I attest a Docker build with witness?",
            "What does the oci attestor capture?",
            "How do I verify container image attestations?",
        ],
    },
    GapArea {
        name: "SBOM Generation",
        description: "Software Bill of Materials with Syft, CycloneDX",
        example_questions: [
            "How do I generate an SBOM with witness?",
            "How do I use syft with the sbom attestor?",
            "What fields does the sbom attestor capture?",
        ],
    },
    GapArea {
        name: "Security Scanning",
        description: "Secret detection, SARIF, vulnerability scanning",
        example_questions: [
            "How do I detect secrets with the secretscan attestor?",
            "What is SARIF and how does witness use it?",
            "How do I attest security scan results?",
        ],
    },
    GapArea {
        name: "Cloud Platform Attestors",
        description: "AWS, GCP identity attestations",
        example_questions: [
            "How does the aws-iid attestor work?",
            "What GCP metadata does gcp-iit capture?",
            "How do I verify cloud instance identity?",
        ],
    },
    GapArea {
        name: "Package Managers",
        description: "Maven, lockfiles, dependency tracking",
        example_questions: [
            "How do I attest a Maven build?",
            "What does the lockfiles attestor capture?",
            "How do I track dependency changes with witness?",
        ],
    },
    GapArea {
        name: "Advanced Rego Policies",
        description: "Complex validation, multiple conditions, security enforcement",
        example_questions: [
            "How do I write Rego with multiple conditions (AND/OR)?",
            "Show me Rego to validate multiple attestor fields together",
            "How do I use regex in Rego policies?",
        ],
    },
    GapArea {
        name: "Troubleshooting",
        description: "Common errors, debugging, solutions",
        example_questions: [
            "Why does witness verify fail with 'no verifiers present'?",
            "How do I debug a Rego policy that's failing?",
            "What does 'predicate type is not a collection' mean?",
        ],
    },
];

pub struct Collector<R, W> {
    input: R,
    out: W,
    system_prompt: String,
}

impl<R: BufRead, W: Write> Collector<R, W> {
    pub fn new(input: R, out: W, system_prompt: &str) -> Self {
        Self {
            input,
            out,
            system_prompt: system_prompt.to_string(),
        }
    }

    /// Next line without its terminator; `None` at end of input.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.input.read_line(&mut line).context("reading input")?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    fn show_menu(&mut self) -> Result<()> {
        writeln!(self.out, "\nKnowledge gap areas (choose one):")?;
        for (i, area) in GAP_AREAS.iter().enumerate() {
            writeln!(self.out, "\n{}. {}\n   {}", i + 1, area.name, area.description)?;
        }
        writeln!(self.out, "\n0. Exit")?;
        write!(self.out, "\nChoose area (0-{}): ", GAP_AREAS.len())?;
        self.out.flush()?;
        Ok(())
    }

    /// Prompts for one pair in `area`. `None` when the user backs out or
    /// leaves the answer empty.
    fn collect_for(&mut self, area: &GapArea) -> Result<Option<TrainingRecord>> {
        writeln!(self.out, "\nCollecting Q/A for: {}\n\n{}\n", area.name, area.description)?;
        writeln!(self.out, "Example questions:")?;
        for (i, q) in area.example_questions.iter().enumerate() {
            writeln!(self.out, "  {}. {q}", i + 1)?;
        }
        write!(self.out, "\nEnter your question (or 'back' to return):\n> ")?;
        self.out.flush()?;

        let question = self.read_line()?.unwrap_or_default().trim().to_string();
        if question.is_empty() || question.eq_ignore_ascii_case("back") {
            return Ok(None);
        }

        writeln!(self.out, "\nEnter the answer (multi-line, end with empty line):")?;
        let mut lines = Vec::new();
        while let Some(line) = self.read_line()? {
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }
        let answer = lines.join("\n");
        if answer.trim().is_empty() {
            writeln!(self.out, "Answer cannot be empty")?;
            return Ok(None);
        }

        Ok(Some(
            TrainingRecord::new(self.system_prompt.as_str(), question, answer)
                .with_metadata("source", "human")
                .with_metadata("gap_area", area.name),
        ))
    }

    /// Runs the menu loop until `0` or end of input; returns pairs collected.
    pub fn run(&mut self, writer: &mut JsonlWriter) -> Result<usize> {
        let mut collected = 0;
        loop {
            self.show_menu()?;
            let Some(choice) = self.read_line()? else {
                break;
            };
            let choice = choice.trim();
            if choice == "0" {
                break;
            }
            let Some(area) = choice
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| GAP_AREAS.get(i))
            else {
                writeln!(self.out, "Invalid choice")?;
                continue;
            };
            if let Some(record) = self.collect_for(area)? {
                writer.write(&record)?;
                collected += 1;
                writeln!(self.out, "\nAdded! Total collected: {collected}")?;
            }
        }
        writeln!(
            self.out,
            "\nSession complete. Collected {collected} Q/A pairs, saved to {}",
            writer.path().display()
        )?;
        Ok(collected)
    }
}
