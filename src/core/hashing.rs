//! Content addressing for downloaded artifacts
//!
//! Every file the engine writes is identified by the SHA-256 of its bytes.
//! Server-provided hashes may carry an algorithm prefix (`sha256:`), which
//! is stripped so that comparisons are always between bare lowercase hex.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const HASH_PREFIX: &str = "sha256:";

/// A content hash in normalized form (lowercase hex, no prefix)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Normalize a hash string as published by a server or stored locally
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let bare = trimmed
            .strip_prefix(HASH_PREFIX)
            .or_else(|| trimmed.strip_prefix("SHA256:"))
            .unwrap_or(trimmed);
        Self(bare.to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hash with its algorithm prefix, as written in manifests
    pub fn prefixed(&self) -> String {
        format!("{}{}", HASH_PREFIX, self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentHash {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Failure while streaming bytes through the hasher
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("read failed: {0}")]
    Read(io::Error),

    #[error("write failed: {0}")]
    Write(io::Error),
}

impl From<CopyError> for io::Error {
    fn from(e: CopyError) -> Self {
        match e {
            CopyError::Read(e) | CopyError::Write(e) => e,
        }
    }
}

/// Hash an in-memory buffer
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentHash(format!("{:x}", hasher.finalize()))
}

/// Hash a stream to its end
pub fn hash_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<ContentHash> {
    let (hash, _) = copy_hashing(reader, &mut io::sink())?;
    Ok(hash)
}

/// Hash a file on disk
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

/// Hash a file if it exists, treating a missing file as "no hash"
pub fn hash_file_if_exists(path: &Path) -> io::Result<Option<ContentHash>> {
    match File::open(path) {
        Ok(mut file) => hash_reader(&mut file).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Copy `reader` into `writer`, hashing the bytes as they pass through.
///
/// Returns the hash and the number of bytes copied.
pub fn copy_hashing<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> Result<(ContentHash, u64), CopyError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }

    writer.flush().map_err(CopyError::Write)?;
    Ok((ContentHash(format!("{:x}", hasher.finalize())), total))
}
