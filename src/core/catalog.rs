//! Remote catalog model and wire parsing
//!
//! A catalog server publishes a listing of forms, and each form may point at
//! a manifest of attached resources. Only the fields the sync engine consults
//! are modelled here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fetcher::{fetch_to_vec, FetchError, ResourceFetcher};
use crate::core::hashing::ContentHash;
use crate::core::store::StoreError;

/// Failures while obtaining or interpreting the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to parse {url}: {message}")]
    Parse { url: String, message: String },

    #[error("{url} is not a form catalog (missing 'forms' listing)")]
    NotOpenRosaServer { url: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One remotely listed form version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default, rename = "hash")]
    pub content_hash: Option<ContentHash>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,

    pub download_url: String,
}

impl CatalogEntry {
    /// Version label used for directory names and display
    pub fn version_label(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// How a manifest resource is materialized locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKind {
    /// A file copied into the form's resource directory
    Plain,
    /// A named, versioned entity list imported once per `(name, version)`
    Shared { name: String, version: i64 },
}

/// One resource attached to a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub content_hash: ContentHash,
    pub download_url: String,
    pub kind: ResourceKind,
}

impl ManifestEntry {
    pub fn plain(filename: &str, content_hash: ContentHash, download_url: &str) -> Self {
        Self {
            filename: filename.to_string(),
            content_hash,
            download_url: download_url.to_string(),
            kind: ResourceKind::Plain,
        }
    }

    pub fn shared(
        filename: &str,
        content_hash: ContentHash,
        download_url: &str,
        name: &str,
        version: i64,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            content_hash,
            download_url: download_url.to_string(),
            kind: ResourceKind::Shared {
                name: name.to_string(),
                version,
            },
        }
    }
}

// =========================================================================
// Wire format
// =========================================================================

#[derive(Debug, Deserialize)]
struct WireListing {
    forms: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct WireManifest {
    #[serde(default)]
    media: Vec<WireMediaFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMediaFile {
    filename: String,
    hash: String,
    download_url: String,
    #[serde(default)]
    entity_list: Option<WireEntityList>,
}

#[derive(Debug, Deserialize)]
struct WireEntityList {
    name: String,
    version: i64,
}

/// Parse a catalog listing document
pub fn parse_catalog(bytes: &[u8], url: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| CatalogError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    if !value.get("forms").is_some_and(|f| f.is_array()) {
        return Err(CatalogError::NotOpenRosaServer {
            url: url.to_string(),
        });
    }

    let listing: WireListing = serde_json::from_value(value).map_err(|e| CatalogError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    for entry in &listing.forms {
        if entry.id.trim().is_empty() {
            return Err(CatalogError::Parse {
                url: url.to_string(),
                message: "catalog entry with empty id".to_string(),
            });
        }
    }

    Ok(listing.forms)
}

/// Parse a manifest document
pub fn parse_manifest(bytes: &[u8], url: &str) -> Result<Vec<ManifestEntry>, CatalogError> {
    let manifest: WireManifest = serde_json::from_slice(bytes).map_err(|e| CatalogError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    manifest
        .media
        .into_iter()
        .map(|file| {
            if !is_plain_filename(&file.filename) {
                return Err(CatalogError::Parse {
                    url: url.to_string(),
                    message: format!("invalid media filename '{}'", file.filename),
                });
            }
            let kind = match file.entity_list {
                Some(list) => ResourceKind::Shared {
                    name: list.name,
                    version: list.version,
                },
                None => ResourceKind::Plain,
            };
            Ok(ManifestEntry {
                filename: file.filename,
                content_hash: ContentHash::new(&file.hash),
                download_url: file.download_url,
                kind,
            })
        })
        .collect()
}

/// Fetch and parse a catalog listing
pub fn fetch_catalog(
    fetcher: &dyn ResourceFetcher,
    url: &str,
) -> Result<Vec<CatalogEntry>, CatalogError> {
    let bytes = fetch_to_vec(fetcher, url)?;
    parse_catalog(&bytes, url)
}

/// Fetch and parse a manifest
pub fn fetch_manifest(
    fetcher: &dyn ResourceFetcher,
    url: &str,
) -> Result<Vec<ManifestEntry>, CatalogError> {
    let bytes = fetch_to_vec(fetcher, url)?;
    parse_manifest(&bytes, url)
}

/// A media filename must name a file directly inside the resource directory
/// A single path component that stays inside the directory it is joined to
pub(crate) fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}
