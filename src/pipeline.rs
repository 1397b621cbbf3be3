//! The verified-example procedure.
//!
//! One attempt walks a fixed sequence in a fresh work directory:
//!
//! 1. Generate an Ed25519 key pair (failure is fatal for the whole run).
//! 2. Initialise a git repository if the `git` attestor is requested.
//! 3. Add `CI`/`BUILD_ID` to the build environment for `environment`.
//! 4. Write `input.txt` for `material`.
//! 5. Remove any stale `output.txt`, then `witness run` the build command.
//! 6. Read the signer key id from the attestation envelope.
//! 7. Build a single-step policy trusting that key.
//! 8. `witness sign` the policy.
//! 9. `witness verify` it; accept only on exit 0 plus the success marker.
//! 10. Render the question/answer record from the exact inputs used above.
//!
//! Steps 2-10 never abort the run: any failure becomes a typed
//! [`RejectReason`] so callers can count and report causes.

use anyhow::Result;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::attestor::Attestor;
use crate::config::CorpusConfig;
use crate::envelope::Envelope;
use crate::exec::ToolOutput;
use crate::fixture::{
    self, KeyPair, WorkDir, ARTIFACT_FILE, ATTESTATION_FILE, POLICY_FILE, SIGNED_POLICY_FILE,
};
use crate::policy::Policy;
use crate::record::TrainingRecord;
use crate::render::{render_answer, AnswerSpec};
use crate::witness::{RunRequest, WitnessCli};

/// Why a single attempt produced no record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("fixture setup failed: {0}")]
    Fixture(String),

    #[error("could not launch {tool}: {message}")]
    Launch { tool: &'static str, message: String },

    #[error("{tool} exited with {code}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        code: String,
        stderr: String,
    },

    #[error("attestation envelope unusable: {0}")]
    Envelope(String),

    #[error("verifier exited 0 but did not report {marker:?}")]
    MissingSuccessMarker { marker: String },
}

impl RejectReason {
    /// Stable short label used to bucket rejection counts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fixture(_) => "fixture",
            Self::Launch { .. } => "launch",
            Self::ToolFailed { tool, .. } => tool,
            Self::Envelope(_) => "envelope",
            Self::MissingSuccessMarker { .. } => "missing-success-marker",
        }
    }

    fn tool_failed(tool: &'static str, out: &ToolOutput) -> Self {
        Self::ToolFailed {
            tool,
            code: out
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            stderr: out.stderr_excerpt(),
        }
    }

    fn launch(tool: &'static str, err: &anyhow::Error) -> Self {
        Self::Launch {
            tool,
            message: format!("{err:#}"),
        }
    }
}

/// Parameters of one attempt.
#[derive(Debug, Clone)]
pub struct ExampleSpec {
    pub example_num: usize,
    pub step: String,
    pub attestors: Vec<Attestor>,
    /// Shell one-liner producing `output.txt`; also the text shown in the answer.
    pub command: String,
    pub question: String,
}

/// A record that passed `witness verify`, plus the policy it embeds.
#[derive(Debug, Clone)]
pub struct AcceptedExample {
    pub record: TrainingRecord,
    pub policy: Policy,
    pub key_id: String,
}

#[derive(Debug, Clone)]
pub enum ExampleOutcome {
    Accepted(Box<AcceptedExample>),
    Rejected(RejectReason),
}

impl ExampleOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

pub struct VerifiedPipeline {
    witness: WitnessCli,
    openssl: PathBuf,
    git: PathBuf,
    shell: PathBuf,
    policy_expires: String,
    system_prompt: String,
}

impl VerifiedPipeline {
    pub fn new(config: &CorpusConfig) -> Self {
        Self {
            witness: WitnessCli::new(&config.tools.witness, &config.success_marker),
            openssl: config.tools.openssl.clone(),
            git: config.tools.git.clone(),
            shell: config.tools.shell.clone(),
            policy_expires: config.policy_expires.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Runs one attempt. `Err` means a fatal setup failure (work directory or
    /// key generation); everything else is an [`ExampleOutcome`].
    pub fn attempt(&self, spec: &ExampleSpec) -> Result<ExampleOutcome> {
        let work = WorkDir::new()?;
        let keys = fixture::generate_keys(&self.openssl, work.path())?;

        Ok(match self.attest_and_verify(spec, &work, &keys) {
            Ok(accepted) => ExampleOutcome::Accepted(Box::new(accepted)),
            Err(reason) => {
                debug!(example = spec.example_num, reason = %reason, "example rejected");
                ExampleOutcome::Rejected(reason)
            }
        })
    }

    fn attest_and_verify(
        &self,
        spec: &ExampleSpec,
        work: &WorkDir,
        keys: &KeyPair,
    ) -> Result<AcceptedExample, RejectReason> {
        if spec.attestors.iter().any(|a| a.needs_git()) {
            fixture::init_git_repo(&self.git, work.path())
                .map_err(|e| RejectReason::Fixture(format!("{e:#}")))?;
        }

        let env = if spec.attestors.iter().any(|a| a.needs_env()) {
            fixture::environment_overrides(spec.example_num)
        } else {
            Vec::new()
        };

        if spec.attestors.iter().any(|a| a.needs_material()) {
            fixture::write_material(work.path())
                .map_err(|e| RejectReason::Fixture(format!("{e:#}")))?;
        }

        // product only records files created during the step.
        let artifact = work.join(ARTIFACT_FILE);
        if artifact.exists() {
            fs::remove_file(&artifact)
                .map_err(|e| RejectReason::Fixture(format!("removing stale artifact: {e}")))?;
        }

        let att_file = work.join(ATTESTATION_FILE);
        let run = self
            .witness
            .run(&RunRequest {
                step: &spec.step,
                attestors: &spec.attestors,
                signer_key: &keys.private_pem,
                outfile: &att_file,
                work_dir: work.path(),
                env: &env,
                command: vec![
                    self.shell.clone().into_os_string(),
                    OsString::from("-c"),
                    OsString::from(&spec.command),
                ],
            })
            .map_err(|e| RejectReason::launch("witness run", &e))?;
        if !run.success {
            return Err(RejectReason::tool_failed("witness run", &run));
        }

        let envelope =
            Envelope::load(&att_file).map_err(|e| RejectReason::Envelope(format!("{e:#}")))?;
        let key_id = envelope
            .key_id()
            .map_err(|e| RejectReason::Envelope(e.to_string()))?
            .to_string();

        let public_pem = keys
            .public_pem_bytes()
            .map_err(|e| RejectReason::Fixture(format!("{e:#}")))?;
        let policy = Policy::build(
            &spec.step,
            &spec.attestors,
            &key_id,
            &public_pem,
            &self.policy_expires,
        );
        let policy_file = work.join(POLICY_FILE);
        policy
            .write(&policy_file)
            .map_err(|e| RejectReason::Fixture(format!("{e:#}")))?;

        let signed = work.join(SIGNED_POLICY_FILE);
        let sign = self
            .witness
            .sign(&keys.private_pem, &policy_file, &signed, work.path())
            .map_err(|e| RejectReason::launch("witness sign", &e))?;
        if !sign.success {
            return Err(RejectReason::tool_failed("witness sign", &sign));
        }

        let verify = self
            .witness
            .verify(&signed, &keys.public_pem, &att_file, &artifact, work.path())
            .map_err(|e| RejectReason::launch("witness verify", &e))?;
        if !verify.output.success {
            return Err(RejectReason::tool_failed("witness verify", &verify.output));
        }
        if !verify.marker_seen {
            return Err(RejectReason::MissingSuccessMarker {
                marker: self.witness.success_marker().to_string(),
            });
        }

        let policy_json = policy
            .to_pretty_json()
            .map_err(|e| RejectReason::Fixture(format!("{e:#}")))?;
        let answer = render_answer(&AnswerSpec {
            step: &spec.step,
            attestors: &spec.attestors,
            command: &spec.command,
            policy_json: &policy_json,
        });

        Ok(AcceptedExample {
            record: TrainingRecord::new(self.system_prompt.as_str(), spec.question.as_str(), answer),
            policy,
            key_id,
        })
    }
}
