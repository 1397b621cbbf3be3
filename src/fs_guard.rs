use anyhow::{anyhow, Context, Result};
use std::{fs, path::Path};

/// Upper bound for a single JSONL corpus file read into memory.
pub const MAX_JSONL_BYTES: u64 = 512 * 1024 * 1024;

/// Upper bound for small JSON documents (config, policies, envelopes).
pub const MAX_JSON_BYTES: u64 = 20 * 1024 * 1024;

/// Reads a file after verifying it is not a symlink and is within `max_bytes`.
///
/// NOTE: narrow TOCTOU window between `symlink_metadata()` and `fs::read()`.
/// Corpus inputs are operator-supplied, so the check is about catching
/// accidental links into other trees, not a hostile filesystem.
pub fn read_validated(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.file_type().is_symlink() {
        return Err(anyhow!("Refusing to read symlink: {}", path.display()));
    }
    if meta.len() > max_bytes {
        return Err(anyhow!(
            "File too large: {} ({} bytes, max {max_bytes} bytes)",
            path.display(),
            meta.len(),
        ));
    }
    fs::read(path).with_context(|| format!("read {}", path.display()))
}

/// UTF-8 variant of [`read_validated`].
pub fn read_validated_string(path: &Path, max_bytes: u64) -> Result<String> {
    let bytes = read_validated(path, max_bytes)?;
    String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path.display()))
}
