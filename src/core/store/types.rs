//! Store type definitions
//!
//! Rows of the local catalog and the summaries built from them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::hashing::ContentHash;

/// A locally downloaded form version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalForm {
    /// Primary key of the row
    pub row_id: i64,
    pub form_id: String,
    pub version: Option<String>,
    pub display_name: String,
    /// Hash of the downloaded definition file
    pub content_hash: ContentHash,
    /// Absolute path of the definition file
    pub definition_path: PathBuf,
    /// Absolute path of the resource (media) directory
    pub resource_dir: PathBuf,
    /// Monotonic insertion counter, used only to order versions of one form
    pub inserted_at: i64,
    pub downloaded_at: DateTime<Utc>,
    pub deleted: bool,
}

impl LocalForm {
    pub fn version_label(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }
}

/// Data needed to register a freshly downloaded form version
#[derive(Debug, Clone)]
pub struct NewForm {
    pub form_id: String,
    pub version: Option<String>,
    pub display_name: String,
    pub content_hash: ContentHash,
    pub definition_path: PathBuf,
    pub resource_dir: PathBuf,
}

/// Identity of a shared versioned resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SharedResourceKey {
    pub name: String,
    pub version: i64,
}

impl SharedResourceKey {
    pub fn new(name: &str, version: i64) -> Self {
        Self {
            name: name.to_string(),
            version,
        }
    }
}

impl std::fmt::Display for SharedResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A shared resource that has been fully imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalSharedResource {
    pub key: SharedResourceKey,
    pub content_hash: ContentHash,
    pub entity_count: usize,
    pub materialized_at: DateTime<Utc>,
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub active_forms: usize,
    pub deleted_forms: usize,
    pub distinct_form_ids: usize,
    pub shared_resources: usize,
    pub entities: usize,
    pub db_size_bytes: u64,
}
