//! Resource fetching abstraction
//!
//! The engine never talks to a network itself. Everything it downloads goes
//! through a [`ResourceFetcher`], which turns a URL into a byte stream or a
//! structured [`FetchError`]. Timeouts and retries belong to the fetcher.
//!
//! [`LocalDirFetcher`] serves a catalog mirror from a directory on disk and is
//! what the CLI uses for `file://` catalogs. [`MemoryFetcher`] serves bytes
//! from memory and records every request.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

/// A readable body returned by a fetcher
pub type ByteStream = Box<dyn Read + Send>;

/// Transport-level failures reported by a fetcher
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Server unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Security error fetching {url}: {reason}")]
    SecurityError { url: String, reason: String },

    #[error("Server returned {code} for {url}")]
    ServerError { url: String, code: u16 },

    #[error("Failed to fetch {url}: {message}")]
    Other { url: String, message: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Unreachable { url, .. }
            | FetchError::SecurityError { url, .. }
            | FetchError::ServerError { url, .. }
            | FetchError::Other { url, .. } => url,
        }
    }
}

/// Turns URLs into byte streams
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<ByteStream, FetchError>;
}

impl<T: ResourceFetcher + ?Sized> ResourceFetcher for &T {
    fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        (**self).fetch(url)
    }
}

impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
    fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        (**self).fetch(url)
    }
}

/// Fetch a whole body into memory
pub fn fetch_to_vec(fetcher: &dyn ResourceFetcher, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut stream = fetcher.fetch(url)?;
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).map_err(|e| FetchError::Other {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    Ok(bytes)
}

/// Serves URLs from a directory on disk.
///
/// Accepts `file://` URLs (absolute, or relative to the base directory) and
/// bare relative paths. Relative paths may not climb out of the base directory.
#[derive(Debug, Clone)]
pub struct LocalDirFetcher {
    base: PathBuf,
}

impl LocalDirFetcher {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        let raw = match url.strip_prefix("file://") {
            Some(rest) => rest,
            None if url.contains("://") => {
                return Err(FetchError::Unreachable {
                    url: url.to_string(),
                    reason: "no transport available for this URL scheme".to_string(),
                })
            }
            None => url,
        };

        let path = Path::new(raw);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }

        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(FetchError::SecurityError {
                url: url.to_string(),
                reason: "path escapes the catalog directory".to_string(),
            });
        }

        Ok(self.base.join(path))
    }
}

impl ResourceFetcher for LocalDirFetcher {
    fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        let path = self.resolve(url)?;

        if !path.is_absolute() && !self.base.is_dir() {
            return Err(FetchError::Unreachable {
                url: url.to_string(),
                reason: format!("catalog directory {} does not exist", self.base.display()),
            });
        }
        if path.is_dir() {
            return Err(FetchError::ServerError {
                url: url.to_string(),
                code: 404,
            });
        }

        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) => Err(match e.kind() {
                io::ErrorKind::NotFound => FetchError::ServerError {
                    url: url.to_string(),
                    code: 404,
                },
                io::ErrorKind::PermissionDenied => FetchError::SecurityError {
                    url: url.to_string(),
                    reason: e.to_string(),
                },
                _ => FetchError::Other {
                    url: url.to_string(),
                    message: e.to_string(),
                },
            }),
        }
    }
}

/// Serves resources from memory and records every URL requested
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, FetchError>>,
    requests: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` at `url`, replacing any configured failure
    pub fn insert(&self, url: &str, bytes: impl Into<Vec<u8>>) {
        locked(&self.failures).remove(url);
        locked(&self.resources).insert(url.to_string(), bytes.into());
    }

    /// Make requests for `url` fail with `error`
    pub fn fail(&self, url: &str, error: FetchError) {
        locked(&self.failures).insert(url.to_string(), error);
    }

    pub fn remove(&self, url: &str) {
        locked(&self.resources).remove(url);
    }

    /// Number of requests made for `url`
    pub fn fetch_count(&self, url: &str) -> usize {
        locked(&self.requests).iter().filter(|u| *u == url).count()
    }

    pub fn total_fetches(&self) -> usize {
        locked(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<String> {
        locked(&self.requests).clone()
    }

    pub fn clear_requests(&self) {
        locked(&self.requests).clear();
    }
}

impl ResourceFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        locked(&self.requests).push(url.to_string());

        if let Some(error) = locked(&self.failures).get(url) {
            return Err(error.clone());
        }

        match locked(&self.resources).get(url) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(FetchError::ServerError {
                url: url.to_string(),
                code: 404,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fetch_relative_and_file_url() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("media")).unwrap();
        std::fs::write(tmp.path().join("media/a.txt"), b"alpha").unwrap();
        let fetcher = LocalDirFetcher::new(tmp.path());

        assert_eq!(fetch_to_vec(&fetcher, "media/a.txt").unwrap(), b"alpha");
        assert_eq!(fetch_to_vec(&fetcher, "file://media/a.txt").unwrap(), b"alpha");

        let absolute = format!("file://{}", tmp.path().join("media/a.txt").display());
        assert_eq!(fetch_to_vec(&fetcher, &absolute).unwrap(), b"alpha");
    }

    #[test]
    fn test_missing_file_is_404() {
        let tmp = tempdir().unwrap();
        let fetcher = LocalDirFetcher::new(tmp.path());
        let err = fetcher.fetch("nope.xml").err().unwrap();
        assert_eq!(
            err,
            FetchError::ServerError {
                url: "nope.xml".to_string(),
                code: 404
            }
        );
    }

    #[test]
    fn test_missing_base_is_unreachable() {
        let tmp = tempdir().unwrap();
        let fetcher = LocalDirFetcher::new(tmp.path().join("gone"));
        assert!(matches!(
            fetcher.fetch("forms.json"),
            Err(FetchError::Unreachable { .. })
        ));
    }

    #[test]
    fn test_parent_dir_is_rejected() {
        let tmp = tempdir().unwrap();
        let fetcher = LocalDirFetcher::new(tmp.path());
        assert!(matches!(
            fetcher.fetch("../secret"),
            Err(FetchError::SecurityError { .. })
        ));
    }

    #[test]
    fn test_other_schemes_are_unreachable() {
        let fetcher = LocalDirFetcher::new("/tmp");
        let err = fetcher.fetch("https://example.com/forms").err().unwrap();
        assert!(matches!(err, FetchError::Unreachable { .. }));
        assert_eq!(err.url(), "https://example.com/forms");
    }

    #[test]
    fn test_memory_fetcher_records_requests() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("a", b"alpha".to_vec());

        assert_eq!(fetch_to_vec(&fetcher, "a").unwrap(), b"alpha");
        assert!(fetcher.fetch("b").is_err());
        fetcher.fail(
            "a",
            FetchError::Unreachable {
                url: "a".to_string(),
                reason: "offline".to_string(),
            },
        );
        assert!(matches!(
            fetcher.fetch("a"),
            Err(FetchError::Unreachable { .. })
        ));

        assert_eq!(fetcher.fetch_count("a"), 2);
        assert_eq!(fetcher.total_fetches(), 3);
        fetcher.clear_requests();
        assert_eq!(fetcher.total_fetches(), 0);
    }
}
