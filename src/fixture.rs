//! Per-example scratch material: signing keys, a one-commit git repository,
//! an input file, and build environment overrides.
//!
//! Everything lives in a [`WorkDir`] that is removed when the example ends.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use crate::exec::run_checked;

pub const MATERIAL_FILE: &str = "input.txt";
pub const MATERIAL_CONTENT: &str = "source data\n";
pub const ARTIFACT_FILE: &str = "output.txt";
pub const ATTESTATION_FILE: &str = "build.att";
pub const POLICY_FILE: &str = "policy.json";
pub const SIGNED_POLICY_FILE: &str = "policy-signed.json";

const GIT_SEED_FILE: &str = "test.txt";
const GIT_USER_EMAIL: &str = "test@example.com";
const GIT_USER_NAME: &str = "Test User";

/// Scoped temporary directory for one example attempt.
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("witness-corpus-")
            .tempdir()
            .context("creating example work directory")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Ed25519 key pair written as PEM files.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_pem: PathBuf,
    pub public_pem: PathBuf,
}

impl KeyPair {
    pub fn public_pem_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.public_pem)
            .with_context(|| format!("reading public key {}", self.public_pem.display()))
    }
}

/// Generates `key.pem` / `pub.pem` with openssl. A failure here means the
/// toolchain itself is broken, so callers treat it as fatal for the run.
pub fn generate_keys(openssl: &Path, dir: &Path) -> Result<KeyPair> {
    let private_pem = dir.join("key.pem");
    let public_pem = dir.join("pub.pem");

    run_checked(
        Command::new(openssl)
            .args(["genpkey", "-algorithm", "ed25519", "-out"])
            .arg(&private_pem),
        "openssl genpkey",
    )?;
    run_checked(
        Command::new(openssl)
            .args(["pkey", "-in"])
            .arg(&private_pem)
            .arg("-pubout")
            .arg("-out")
            .arg(&public_pem),
        "openssl pkey",
    )?;

    Ok(KeyPair {
        private_pem,
        public_pem,
    })
}

/// `git init` plus one commit of `test.txt`, enough for the git attestor to
/// find a HEAD.
pub fn init_git_repo(git: &Path, dir: &Path) -> Result<()> {
    let git_in = |args: &[&str]| {
        let mut cmd = Command::new(git);
        cmd.args(args).current_dir(dir);
        cmd
    };

    run_checked(&mut git_in(&["init", "--quiet"]), "git init")?;
    run_checked(
        &mut git_in(&["config", "user.email", GIT_USER_EMAIL]),
        "git config user.email",
    )?;
    run_checked(
        &mut git_in(&["config", "user.name", GIT_USER_NAME]),
        "git config user.name",
    )?;
    fs::write(dir.join(GIT_SEED_FILE), "test\n")
        .with_context(|| format!("writing {GIT_SEED_FILE}"))?;
    run_checked(&mut git_in(&["add", GIT_SEED_FILE]), "git add")?;
    run_checked(
        &mut git_in(&["-c", "commit.gpgsign=false", "commit", "--quiet", "-m", "init"]),
        "git commit",
    )?;
    Ok(())
}

/// Writes the material attestor's input file and returns its path.
pub fn write_material(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(MATERIAL_FILE);
    fs::write(&path, MATERIAL_CONTENT).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Variables the environment attestor should observe for example `example_num`.
pub fn environment_overrides(example_num: usize) -> Vec<(String, String)> {
    vec![
        ("CI".to_string(), "true".to_string()),
        ("BUILD_ID".to_string(), example_num.to_string()),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ToolPaths;
    use crate::toolcheck::{detect_tools, Tool};

    #[test]
    fn test_workdir_is_removed_on_drop() {
        let path = {
            let wd = WorkDir::new().unwrap();
            assert!(wd.path().is_dir());
            wd.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_write_material() {
        let wd = WorkDir::new().unwrap();
        let p = write_material(wd.path()).unwrap();
        assert_eq!(fs::read_to_string(p).unwrap(), "source data\n");
    }

    #[test]
    fn test_environment_overrides() {
        let env = environment_overrides(7);
        assert!(env.contains(&("CI".to_string(), "true".to_string())));
        assert!(env.contains(&("BUILD_ID".to_string(), "7".to_string())));
    }

    #[test]
    fn test_generate_keys_fails_with_missing_openssl() {
        let wd = WorkDir::new().unwrap();
        assert!(generate_keys(Path::new("/nonexistent/openssl"), wd.path()).is_err());
    }

    #[test]
    fn test_init_git_repo_when_git_available() {
        let paths = ToolPaths::default();
        if !detect_tools(&paths).is_available(Tool::Git) {
            return;
        }
        let wd = WorkDir::new().unwrap();
        init_git_repo(&paths.git, wd.path()).unwrap();
        let head = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(wd.path())
            .output()
            .unwrap();
        assert!(head.status.success());
    }
}
