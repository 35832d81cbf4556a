//! Streaming SHA-256 hashing via `ring::digest`.

use ring::digest::{Context, SHA256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// Buffer size for streaming file reads (64 KiB).
const BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-256 of a file, streaming to avoid loading it all into memory.
///
/// Returns lowercase hex-encoded digest.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut context = Context::new(&SHA256);
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.update(&buf[..n]);
    }

    Ok(hex::encode(context.finish().as_ref()))
}

/// Compute SHA-256 of raw bytes.
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    let digest = ring::digest::digest(&SHA256, data);
    hex::encode(digest.as_ref())
}

/// Compare a computed digest with a declared one, ignoring case and whitespace
#[must_use]
pub fn checksum_matches(actual: &str, declared: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(declared.trim())
}

/// True if `path` exists and hashes to `declared`
pub fn file_matches(path: &Path, declared: &str) -> bool {
    if declared.trim().is_empty() || !path.is_file() {
        return false;
    }
    sha256_file(path)
        .map(|actual| checksum_matches(&actual, declared))
        .unwrap_or(false)
}
