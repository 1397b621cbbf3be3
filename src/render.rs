//! Natural-language templating around a verified configuration.
//!
//! The answer embeds the same command lines and policy JSON the pipeline just
//! executed, so every accepted record is self-consistent by construction.

use crate::attestor::{join_csv, join_human, Attestor};

pub const STEP_NAMES: [&str; 10] = [
    "build",
    "test",
    "package",
    "deploy",
    "scan",
    "compile",
    "lint",
    "security-check",
    "analyze",
    "verify",
];

pub const QUESTION_TEMPLATES: [&str; 7] = [
    "How do I create a complete witness configuration for a {step} step with {attestors} attestors that passes verification?",
    "What's the complete setup for using witness with {attestors} attestors in my {step} step?",
    "Show me a working witness example for {attestors} attestors in a {step} step.",
    "I need a verified witness configuration for {step} with {attestors}. How do I set it up?",
    "Can you provide a complete witness run and verify example using {attestors} for {step}?",
    "Walk me through creating witness attestations with {attestors} in my {step} step.",
    "How do I instrument my {step} step with witness using {attestors} attestors?",
];

/// A shell one-liner that produces `output.txt`, run as `bash -c <command>`
/// inside the work directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPattern {
    pub command: &'static str,
    /// Reads `input.txt`, so only usable when the material file exists.
    pub reads_material: bool,
}

pub const DEFAULT_COMMAND: CommandPattern = CommandPattern {
    command: "echo 'Building...' > output.txt",
    reads_material: false,
};

pub const MATERIAL_COMMAND: CommandPattern = CommandPattern {
    command: "cat input.txt > output.txt",
    reads_material: true,
};

pub const COMMAND_PATTERNS: [CommandPattern; 5] = [
    CommandPattern {
        command: "echo \"Success\" > output.txt",
        reads_material: false,
    },
    MATERIAL_COMMAND,
    CommandPattern {
        command: "echo \"Build complete\" > output.txt",
        reads_material: false,
    },
    CommandPattern {
        command: "cp input.txt output.txt && echo \"Done\" >> output.txt",
        reads_material: true,
    },
    CommandPattern {
        command: "echo \"Processing...\" > output.txt",
        reads_material: false,
    },
];

/// The command the classic profile uses for a given attestor set.
pub fn default_command(attestors: &[Attestor]) -> CommandPattern {
    if attestors.iter().any(|a| a.needs_material()) {
        MATERIAL_COMMAND
    } else {
        DEFAULT_COMMAND
    }
}

/// Patterns usable with `attestors` (material readers need the material attestor).
pub fn usable_patterns(attestors: &[Attestor]) -> Vec<CommandPattern> {
    let has_material = attestors.iter().any(|a| a.needs_material());
    COMMAND_PATTERNS
        .into_iter()
        .filter(|p| has_material || !p.reads_material)
        .collect()
}

pub fn render_question(template: &str, step: &str, attestors: &[Attestor]) -> String {
    template
        .replace("{step}", step)
        .replace("{attestors}", &join_human(attestors))
}

/// Quotes a one-liner for `bash -c`, preferring double quotes.
pub fn shell_quote(command: &str) -> String {
    if !command.contains('"') {
        format!("\"{command}\"")
    } else if !command.contains('\'') {
        format!("'{command}'")
    } else {
        format!("'{}'", command.replace('\'', r"'\''"))
    }
}

/// Everything the answer text needs.
#[derive(Debug, Clone)]
pub struct AnswerSpec<'a> {
    pub step: &'a str,
    pub attestors: &'a [Attestor],
    pub command: &'a str,
    pub policy_json: &'a str,
}

fn setup_sections(attestors: &[Attestor]) -> String {
    let mut out = String::new();
    if attestors.iter().any(|a| a.needs_git()) {
        out.push_str(
            "**Setup Git Repository:**\n```bash\ngit init\ngit config user.email \"test@example.com\"\ngit config user.name \"Test User\"\necho \"test\" > test.txt\ngit add test.txt\ngit commit -m \"initial commit\"\n```\n",
        );
    }
    if attestors.iter().any(|a| a.needs_env()) {
        out.push_str("**Set Environment Variables:**\n```bash\nexport CI=true\nexport BUILD_ID=12345\n```\n");
    }
    if attestors.iter().any(|a| a.needs_material()) {
        out.push_str("**Create Material File:**\n```bash\necho \"source data\" > input.txt\n```\n");
    }
    out
}

pub fn render_answer(spec: &AnswerSpec<'_>) -> String {
    let setup = setup_sections(spec.attestors);
    let csv = join_csv(spec.attestors);
    let quoted = shell_quote(spec.command);
    let step = spec.step;
    let policy = spec.policy_json;

    format!(
        r#"Here's a complete, verified witness configuration:

**1. Generate Ed25519 Keys:**
```bash
openssl genpkey -algorithm ed25519 -out key.pem
openssl pkey -in key.pem -pubout -out pub.pem
```

{setup}**2. Run Witness Attestation:**
```bash
witness run --step {step} \
  --signer-file-key-path key.pem \
  --outfile build.att \
  --attestations {csv} \
  -- bash -c {quoted}
```

**3. Extract Key ID and Create Policy:**
```bash
KEYID=$(jq -r '.signatures[0].keyid' build.att)
PUBKEY_B64=$(base64 < pub.pem | tr -d '\n')
```

**Policy Document:**
```json
{policy}
```

**4. Sign Policy:**
```bash
witness sign --signer-file-key-path key.pem \
  --infile policy.json \
  --outfile policy-signed.json
```

**5. Verify:**
```bash
witness verify \
  --policy policy-signed.json \
  --publickey pub.pem \
  --attestations build.att \
  -f output.txt
```

This configuration has been formally verified to pass witness verify."#
    )
}
