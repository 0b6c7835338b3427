//! Download of a single catalog entry
//!
//! A download runs entirely inside a fresh staging directory:
//!
//! ```text
//! .formsync/staging/<ulid>/
//!   form.xml        definition, hashed while streaming
//!   media/          manifest resources and the carried-over draft
//! ```
//!
//! Only once every file is written and verified is the staging directory
//! renamed to `forms/<id>/<version>` and the row inserted. A failure at any
//! step removes the staging directory, so partial downloads are never
//! registered.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::core::catalog::{fetch_manifest, CatalogError, ManifestEntry};
use crate::core::draft::{carry_over_draft, DEFAULT_DRAFT_FILENAME};
use crate::core::entities::EntityListError;
use crate::core::fetcher::{FetchError, ResourceFetcher};
use crate::core::hashing::{copy_hashing, ContentHash, CopyError};
use crate::core::media::{reconcile_resources, MediaReport};
use crate::core::project::Project;
use crate::core::reconcile::ClassifiedEntry;
use crate::core::store::{LocalCatalogStore, LocalForm, NewForm, SharedResourceKey, StoreError};

/// File name of the definition inside a version directory
pub const DEFINITION_FILE: &str = "form.xml";

/// Resource directory inside a version directory
pub const MEDIA_DIR: &str = "media";

/// Per-entry download failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("Disk error at {}: {}", .path.display(), .message)]
    Disk { path: PathBuf, message: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid form definition at {url}: {message}")]
    FormParsing { url: String, message: String },

    #[error("Content hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url: String,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("Catalog entry '{form_id}' has no content hash")]
    FormWithNoHash { form_id: String },

    #[error("Failed to import shared resource {key}: {source}")]
    ResourceParse {
        key: SharedResourceKey,
        source: EntityListError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DownloadError {
    pub fn disk(path: &Path, e: io::Error) -> Self {
        DownloadError::Disk {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}

impl From<CatalogError> for DownloadError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Fetch(e) => DownloadError::Fetch(e),
            CatalogError::Store(e) => DownloadError::Store(e),
            CatalogError::Parse { url, message } => DownloadError::FormParsing { url, message },
            CatalogError::NotOpenRosaServer { url } => DownloadError::FormParsing {
                url,
                message: "not a manifest document".to_string(),
            },
        }
    }
}

/// Knobs for the downloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Fail entries that publish no content hash instead of trusting the bytes
    pub reject_unhashed_forms: bool,
    pub draft_filename: String,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            reject_unhashed_forms: false,
            draft_filename: DEFAULT_DRAFT_FILENAME.to_string(),
        }
    }
}

/// A registered form version and what it took to get there
#[derive(Debug, Clone, Serialize)]
pub struct DownloadedForm {
    pub form: LocalForm,
    pub media: MediaReport,
    /// Whether a draft from an earlier version was copied in
    pub draft_carried: bool,
}

impl DownloadedForm {
    pub fn media_changed(&self) -> bool {
        self.media.any_changed
    }
}

/// Stream `url` into `dest`, returning the hash and size of what was written.
///
/// A partially written file is removed on failure.
pub fn fetch_to_file(
    fetcher: &dyn ResourceFetcher,
    url: &str,
    dest: &Path,
) -> Result<(ContentHash, u64), DownloadError> {
    let mut stream = fetcher.fetch(url)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DownloadError::disk(parent, e))?;
    }
    let mut file = File::create(dest).map_err(|e| DownloadError::disk(dest, e))?;

    copy_hashing(&mut stream, &mut file).map_err(|e| {
        drop(fs::remove_file(dest));
        match e {
            CopyError::Read(e) => DownloadError::Fetch(FetchError::Other {
                url: url.to_string(),
                message: e.to_string(),
            }),
            CopyError::Write(e) => DownloadError::disk(dest, e),
        }
    })
}

/// Download one classified entry and register it in `store`
pub fn download_form(
    project: &Project,
    classified: &ClassifiedEntry,
    store: &mut LocalCatalogStore,
    fetcher: &dyn ResourceFetcher,
    options: &DownloadOptions,
) -> Result<DownloadedForm, DownloadError> {
    let entry = &classified.entry;
    if entry.content_hash.is_none() && options.reject_unhashed_forms {
        return Err(DownloadError::FormWithNoHash {
            form_id: entry.id.clone(),
        });
    }

    let staging = project.staging_dir().join(Ulid::new().to_string());
    fs::create_dir_all(&staging).map_err(|e| DownloadError::disk(&staging, e))?;

    let result = stage_and_register(project, classified, &staging, store, fetcher, options);

    if staging.exists() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
        }
    }

    result
}

fn stage_and_register(
    project: &Project,
    classified: &ClassifiedEntry,
    staging: &Path,
    store: &mut LocalCatalogStore,
    fetcher: &dyn ResourceFetcher,
    options: &DownloadOptions,
) -> Result<DownloadedForm, DownloadError> {
    let entry = &classified.entry;

    // Definition
    let definition = staging.join(DEFINITION_FILE);
    let (actual, size) = fetch_to_file(fetcher, &entry.download_url, &definition)?;
    if size == 0 {
        return Err(DownloadError::FormParsing {
            url: entry.download_url.clone(),
            message: "empty form definition".to_string(),
        });
    }
    if let Some(expected) = &entry.content_hash {
        if *expected != actual {
            return Err(DownloadError::HashMismatch {
                url: entry.download_url.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    // Media
    let manifest: Vec<ManifestEntry> = match (&classified.manifest, &entry.manifest_url) {
        (Some(manifest), _) => manifest.clone(),
        (None, Some(url)) => fetch_manifest(fetcher, url)?,
        (None, None) => Vec::new(),
    };
    let staged_media = staging.join(MEDIA_DIR);
    let media = reconcile_resources(&entry.id, &manifest, &staged_media, store, fetcher)?;
    let draft = carry_over_draft(&entry.id, &staged_media, store, &options.draft_filename)?;

    // Promote
    let final_dir = unique_version_dir(project, &entry.id, entry.version.as_deref());
    if let Some(parent) = final_dir.parent() {
        fs::create_dir_all(parent).map_err(|e| DownloadError::disk(parent, e))?;
    }
    fs::rename(staging, &final_dir).map_err(|e| DownloadError::disk(&final_dir, e))?;
    debug!(form_id = %entry.id, dir = %final_dir.display(), "promoted staged download");

    let new_form = NewForm {
        form_id: entry.id.clone(),
        version: entry.version.clone(),
        display_name: entry.display_name().to_string(),
        content_hash: actual,
        definition_path: final_dir.join(DEFINITION_FILE),
        resource_dir: final_dir.join(MEDIA_DIR),
    };

    let form = match store.insert_form(&new_form, &media.shared) {
        Ok(form) => form,
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&final_dir) {
                warn!(path = %final_dir.display(), error = %cleanup, "failed to remove unregistered download");
            }
            return Err(e.into());
        }
    };

    info!(
        form_id = %form.form_id,
        version = form.version_label(),
        fetched = media.fetched,
        reused = media.reused,
        "form downloaded"
    );

    Ok(DownloadedForm {
        form,
        media,
        draft_carried: draft.is_some(),
    })
}

/// `forms/<id>/<version>`, suffixed `-2`, `-3`, ... if already taken
fn unique_version_dir(project: &Project, form_id: &str, version: Option<&str>) -> PathBuf {
    let base = project.forms_dir().join(path_component(form_id));
    let label = path_component(version.unwrap_or("unversioned"));

    let first = base.join(&label);
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| base.join(format!("{}-{}", label, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Make an id or version safe to use as a single directory name
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
