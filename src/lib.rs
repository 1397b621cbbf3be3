//! # witness-corpus
//!
//! Formally verified training data for the Witness supply-chain attestation
//! framework.
//!
//! Every command-line example the corpus contains was executed against the
//! real `witness` binary: attest, build a policy, sign it, verify it. Only
//! examples whose verification succeeded are written out, and the answer text
//! is rendered from exactly the values that were executed.
//!
//! ## Properties
//!
//! - **`#![forbid(unsafe_code)]`** across the crate.
//! - **Bounded input handling**: JSONL and config reads are symlink-checked and
//!   size-bounded via [`fs_guard::read_validated`].
//! - **Delegated crypto**: key generation, signing and verification are done by
//!   `openssl` and `witness`; the crate only hashes prompts with `sha2`.
//! - **Sanitized tool output**: stderr from external tools is truncated and
//!   secret-redacted before it reaches a log line or error.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`fs_guard`] | Symlink-safe, size-bounded file reads |
//! | [`config`] | Tool paths, policy expiry, completion API settings |
//! | [`exec`] | Subprocess capture and stderr sanitizing |
//! | [`toolcheck`] | External binary availability probe |
//! | [`attestor`] | Attestor names, type URIs, combination tables |
//! | [`envelope`] | DSSE envelope decoding and key ids |
//! | [`policy`] | Witness policy documents |
//! | [`fixture`] | Per-example work dirs, keys, git repo, material file |
//! | [`witness`] | Typed `witness` CLI invocations |
//! | [`record`] | Chat training records and JSONL I/O |
//! | [`render`] | Question/answer text from executed values |
//! | [`pipeline`] | The verified-example procedure |
//! | [`generator`] | Generation profiles and the run loop |
//! | [`extract`] | Parsing commands and blocks back out of answers |
//! | [`validate`] | Structural and semantic dataset checks |
//! | [`replay`] | Re-executing a record's commands |
//! | [`rego`] | Rego block checking with `opa` |
//! | [`splits`] | Seeded train/validation splits |
//! | [`augment`] | Code-preserving rephrasing via a completion API |
//! | [`knowledge`] | Template-based conceptual Q/A |
//! | [`collector`] | Interactive human Q/A collection |
//! | [`viewer`] | Terminal corpus browser |

#![forbid(unsafe_code)]

/// Symlink-safe, size-bounded file reads. Every JSONL, JSON and config input
/// goes through here.
pub mod fs_guard;

/// Optional JSON config with per-field defaults.
pub mod config;

/// Running external tools and sanitizing what they print.
pub mod exec;

/// Probes configured binaries so commands fail early with install hints.
pub mod toolcheck;

pub mod attestor;

/// DSSE envelopes written by `witness run`.
pub mod envelope;

/// Builds the policy document for one step and checks policies pulled back
/// out of answers.
pub mod policy;

/// Scratch state for one example: directory, keys, git repo, material file.
pub mod fixture;

pub mod witness;

/// `{"messages": [...]}` records and JSONL reading/writing.
pub mod record;

pub mod render;

/// Attest, build policy, sign, verify, render. Returns a tagged outcome per
/// example instead of a bare boolean.
pub mod pipeline;

pub mod generator;

pub mod extract;

/// Dataset validation: structure, duplicates, and per-record consistency.
pub mod validate;

pub mod replay;

/// Syntax and evaluation checks for Rego snippets in answers.
pub mod rego;

pub mod splits;

pub mod augment;

pub mod knowledge;

pub mod collector;

pub mod viewer;
