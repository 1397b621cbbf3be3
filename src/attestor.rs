//! The attestor vocabulary the verified generator is allowed to use.
//!
//! Only attestors that need no cloud, CI, or container context are "safe":
//! each of them can be satisfied by a scratch directory, a few environment
//! variables, and a shell one-liner. `file` parses but is excluded from the
//! safe set because `witness verify` rejects the collections it produces in
//! that setup. `command-run` is recorded by every `witness run` whether or
//! not it is requested, so it is never passed in `--attestations` by the
//! generator.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attestor {
    Git,
    Environment,
    Material,
    Product,
    File,
    #[serde(rename = "command-run")]
    CommandRun,
}

/// Attestors the verified pipeline can satisfy locally, in vocabulary order.
pub const SAFE_ATTESTORS: [Attestor; 4] = [
    Attestor::Git,
    Attestor::Environment,
    Attestor::Material,
    Attestor::Product,
];

/// The fixed 15-entry cycle used by the classic profile. Order inside each
/// entry is significant: it is the order written into `--attestations`.
pub const CLASSIC_COMBINATIONS: [&[Attestor]; 15] = [
    &[Attestor::Git, Attestor::Environment],
    &[Attestor::Material, Attestor::Product],
    &[Attestor::Environment],
    &[Attestor::Git],
    &[Attestor::Product],
    &[Attestor::Material],
    &[Attestor::Git, Attestor::Material, Attestor::Product],
    &[Attestor::Environment, Attestor::Material, Attestor::Product],
    &[
        Attestor::Git,
        Attestor::Environment,
        Attestor::Material,
        Attestor::Product,
    ],
    &[Attestor::Git, Attestor::Product],
    &[Attestor::Environment, Attestor::Product],
    &[Attestor::Git, Attestor::Material],
    &[Attestor::Environment, Attestor::Material],
    &[Attestor::Git, Attestor::Environment, Attestor::Product],
    &[Attestor::Git, Attestor::Environment, Attestor::Material],
];

impl Attestor {
    pub fn name(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Environment => "environment",
            Self::Material => "material",
            Self::Product => "product",
            Self::File => "file",
            Self::CommandRun => "command-run",
        }
    }

    /// Attestation type URI as it appears in policy `attestations[].type`.
    pub fn type_uri(self) -> String {
        format!("https://witness.dev/attestations/{}/v0.1", self.name())
    }

    /// Needs a committed git repository in the work directory.
    pub fn needs_git(self) -> bool {
        self == Self::Git
    }

    /// Needs `CI`/`BUILD_ID` in the build environment.
    pub fn needs_env(self) -> bool {
        self == Self::Environment
    }

    /// Needs an input file present before the build runs.
    pub fn needs_material(self) -> bool {
        self == Self::Material
    }
}

impl fmt::Display for Attestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attestor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "git" => Ok(Self::Git),
            "environment" => Ok(Self::Environment),
            "material" => Ok(Self::Material),
            "product" => Ok(Self::Product),
            "file" => Ok(Self::File),
            "command-run" | "commandrun" => Ok(Self::CommandRun),
            other => Err(anyhow!("unknown attestor: {other:?}")),
        }
    }
}

/// Parses a comma-separated `--attestations` value, preserving order.
pub fn parse_csv(csv: &str) -> Result<Vec<Attestor>> {
    csv.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// `git,environment` form used on the command line.
pub fn join_csv(attestors: &[Attestor]) -> String {
    attestors
        .iter()
        .map(|a| a.name())
        .collect::<Vec<_>>()
        .join(",")
}

/// `git, environment` form used in prose.
pub fn join_human(attestors: &[Attestor]) -> String {
    attestors
        .iter()
        .map(|a| a.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every non-empty subset of `vocab`, grouped by size, each subset sorted by
/// attestor name.
///
/// Vocabularies are de-duplicated first, so the mask never exceeds one bit
/// per distinct attestor.
pub fn all_combinations(vocab: &[Attestor]) -> Vec<Vec<Attestor>> {
    let mut distinct: Vec<Attestor> = Vec::with_capacity(vocab.len());
    for a in vocab {
        if !distinct.contains(a) {
            distinct.push(*a);
        }
    }
    let vocab = distinct.as_slice();
    let n = vocab.len();
    let Some(end) = 1u64.checked_shl(n as u32) else {
        return Vec::new();
    };
    // (vocabulary indices, subset) so each size bucket can be ordered i < j < k.
    let mut subsets: Vec<(Vec<usize>, Vec<Attestor>)> = (1u64..end)
        .map(|mask| {
            let idx: Vec<usize> = (0..n).filter(|i| mask & (1u64 << i) != 0).collect();
            let mut combo: Vec<Attestor> = idx.iter().filter_map(|i| vocab.get(*i)).copied().collect();
            combo.sort_by_key(|a| a.name());
            (idx, combo)
        })
        .collect();
    subsets.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    subsets.into_iter().map(|(_, combo)| combo).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_type_uri() {
        assert_eq!(
            Attestor::Git.type_uri(),
            "https://witness.dev/attestations/git/v0.1"
        );
    }

    #[test]
    fn test_parse_csv_preserves_order() {
        let parsed = parse_csv("git,environment").unwrap();
        assert_eq!(parsed, vec![Attestor::Git, Attestor::Environment]);
        assert_eq!(join_csv(&parsed), "git,environment");
        assert_eq!(join_human(&parsed), "git, environment");
    }

    #[test]
    fn test_parse_csv_rejects_unknown() {
        assert!(parse_csv("git,aws-iid").is_err());
    }

    #[test]
    fn test_all_combinations_of_safe_set() {
        let combos = all_combinations(&SAFE_ATTESTORS);
        assert_eq!(combos.len(), 15);
        assert_eq!(combos[0], vec![Attestor::Git]);
        // pairs are name-sorted
        assert_eq!(combos[4], vec![Attestor::Environment, Attestor::Git]);
        assert_eq!(combos.last().unwrap().len(), 4);
        let mut seen = std::collections::HashSet::new();
        for c in &combos {
            let mut key = c.clone();
            key.sort();
            assert!(seen.insert(key), "duplicate combination {c:?}");
        }
    }

    #[test]
    fn test_classic_combinations_are_safe_and_distinct() {
        let mut seen = std::collections::HashSet::new();
        for combo in CLASSIC_COMBINATIONS {
            assert!(combo.iter().all(|a| SAFE_ATTESTORS.contains(a)));
            let mut key = combo.to_vec();
            key.sort();
            assert!(seen.insert(key));
        }
    }

    #[test]
    fn test_command_run_names() {
        assert_eq!(Attestor::CommandRun.name(), "command-run");
        assert_eq!(
            Attestor::CommandRun.type_uri(),
            "https://witness.dev/attestations/command-run/v0.1"
        );
        assert_eq!("command-run".parse::<Attestor>().unwrap(), Attestor::CommandRun);
        assert_eq!("commandrun".parse::<Attestor>().unwrap(), Attestor::CommandRun);
        assert_eq!(
            serde_json::to_string(&Attestor::CommandRun).unwrap(),
            "\"command-run\""
        );
        assert!(!SAFE_ATTESTORS.contains(&Attestor::CommandRun));
        assert!(!Attestor::CommandRun.needs_git());
        assert!(!Attestor::CommandRun.needs_env());
        assert!(!Attestor::CommandRun.needs_material());
    }

    #[test]
    fn test_all_combinations_edge_vocabularies() {
        assert!(all_combinations(&[]).is_empty());
        assert_eq!(all_combinations(&[Attestor::File]), vec![vec![Attestor::File]]);
        // repeats collapse instead of widening the mask
        let repeated = vec![Attestor::Git; 40];
        assert_eq!(all_combinations(&repeated), vec![vec![Attestor::Git]]);
        let everything = [
            Attestor::Git,
            Attestor::Environment,
            Attestor::Material,
            Attestor::Product,
            Attestor::File,
            Attestor::CommandRun,
        ];
        assert_eq!(all_combinations(&everything).len(), 63);
    }

    #[test]
    fn test_fixture_needs() {
        assert!(Attestor::Git.needs_git());
        assert!(Attestor::Environment.needs_env());
        assert!(Attestor::Material.needs_material());
        assert!(!Attestor::Product.needs_material());
    }
}
