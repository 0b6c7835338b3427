//! Classification of a remote catalog against the local store

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::catalog::{fetch_manifest, CatalogEntry, CatalogError, ManifestEntry};
use crate::core::fetcher::ResourceFetcher;
use crate::core::media::is_satisfied;
use crate::core::store::{LocalCatalogStore, LocalForm};

/// Where a remote entry stands relative to the local mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// No local row has this id
    Absent,
    /// Known locally, but must be downloaded again
    Stale,
    /// The newest active local version already matches
    Current,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Absent => "absent",
            EntryStatus::Stale => "stale",
            EntryStatus::Current => "current",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A catalog entry with its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedEntry {
    pub entry: CatalogEntry,
    pub status: EntryStatus,

    /// Manifest fetched while classifying, reused by the downloader
    #[serde(skip)]
    pub manifest: Option<Vec<ManifestEntry>>,
}

impl ClassifiedEntry {
    pub fn needs_download(&self) -> bool {
        self.status != EntryStatus::Current
    }
}

/// Classify every remote entry, in listing order.
///
/// An entry is current only when its hash matches a non-deleted local
/// version and every manifest resource is satisfied against the newest such
/// version. Entries without a hash are always stale. Manifests are fetched
/// only for entries whose hash matches.
pub fn classify(
    remote: &[CatalogEntry],
    store: &LocalCatalogStore,
    fetcher: &dyn ResourceFetcher,
) -> Result<Vec<ClassifiedEntry>, CatalogError> {
    let grouped = store.forms_grouped_by_id()?;
    let mut classified = Vec::with_capacity(remote.len());

    for entry in remote {
        let local = grouped.get(&entry.id).map(Vec::as_slice).unwrap_or(&[]);
        let (status, manifest) = classify_entry(entry, local, store, fetcher)?;
        debug!(form_id = %entry.id, version = entry.version_label(), %status, "classified");
        classified.push(ClassifiedEntry {
            entry: entry.clone(),
            status,
            manifest,
        });
    }

    let counts = count_by_status(&classified);
    info!(
        absent = counts.get(&EntryStatus::Absent).copied().unwrap_or(0),
        stale = counts.get(&EntryStatus::Stale).copied().unwrap_or(0),
        current = counts.get(&EntryStatus::Current).copied().unwrap_or(0),
        "catalog classified"
    );

    Ok(classified)
}

/// `local` holds every row for the entry's id, newest first
fn classify_entry(
    entry: &CatalogEntry,
    local: &[LocalForm],
    store: &LocalCatalogStore,
    fetcher: &dyn ResourceFetcher,
) -> Result<(EntryStatus, Option<Vec<ManifestEntry>>), CatalogError> {
    if local.is_empty() {
        return Ok((EntryStatus::Absent, None));
    }

    let Some(hash) = &entry.content_hash else {
        return Ok((EntryStatus::Stale, None));
    };

    // Newest active version carrying the same definition
    let Some(candidate) = local
        .iter()
        .find(|form| !form.deleted && form.content_hash == *hash)
    else {
        return Ok((EntryStatus::Stale, None));
    };

    let Some(manifest_url) = &entry.manifest_url else {
        return Ok((EntryStatus::Current, None));
    };

    let manifest = fetch_manifest(fetcher, manifest_url)?;
    for resource in &manifest {
        if !is_satisfied(resource, &candidate.resource_dir, store)? {
            debug!(
                form_id = %entry.id,
                file = %resource.filename,
                "manifest resource not satisfied locally"
            );
            return Ok((EntryStatus::Stale, Some(manifest)));
        }
    }

    Ok((EntryStatus::Current, Some(manifest)))
}

/// Tally entries per status
pub fn count_by_status(classified: &[ClassifiedEntry]) -> HashMap<EntryStatus, usize> {
    let mut counts = HashMap::new();
    for c in classified {
        *counts.entry(c.status).or_insert(0) += 1;
    }
    counts
}
