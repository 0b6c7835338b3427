//! Media diffing for a single catalog entry
//!
//! For every resource in a manifest this decides between three actions:
//! - **reuse**: a byte-identical file already exists in a prior version's
//!   resource directory, so it is copied locally
//! - **skip**: a shared entity list with the same `(name, version)` was
//!   already imported, by any form
//! - **fetch**: download, verify the hash and write (or import) it
//!
//! Only fetches count as a change.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::core::catalog::{ManifestEntry, ResourceKind};
use crate::core::download::{fetch_to_file, DownloadError};
use crate::core::entities::parse_entity_list;
use crate::core::fetcher::{fetch_to_vec, ResourceFetcher};
use crate::core::hashing::{hash_bytes, hash_file_if_exists, ContentHash};
use crate::core::store::{LocalCatalogStore, SharedResourceKey, StoreError};

/// What happened to a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaReport {
    /// True iff at least one resource was actually fetched
    pub any_changed: bool,
    pub fetched: usize,
    pub reused: usize,
    pub skipped: usize,
    /// Shared resources the owning form uses, materialized now or earlier
    pub shared: Vec<SharedResourceKey>,
}

/// Is `entry` already satisfied by `resource_dir` (or the shared-resource table)?
pub fn is_satisfied(
    entry: &ManifestEntry,
    resource_dir: &Path,
    store: &LocalCatalogStore,
) -> Result<bool, StoreError> {
    match &entry.kind {
        ResourceKind::Plain => Ok(file_matches(
            &resource_dir.join(&entry.filename),
            &entry.content_hash,
        )),
        ResourceKind::Shared { name, version } => {
            store.is_materialized(&SharedResourceKey::new(name, *version))
        }
    }
}

/// Does the file at `path` exist with the given hash? Unreadable counts as no.
fn file_matches(path: &Path, expected: &ContentHash) -> bool {
    match hash_file_if_exists(path) {
        Ok(Some(actual)) => actual == *expected,
        Ok(None) => false,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unreadable candidate file");
            false
        }
    }
}

/// Find a byte-identical copy of a plain resource among prior resource
/// directories of the same form, newest first
fn find_reusable(entry: &ManifestEntry, prior_dirs: &[PathBuf]) -> Option<PathBuf> {
    prior_dirs
        .iter()
        .map(|dir| dir.join(&entry.filename))
        .find(|candidate| file_matches(candidate, &entry.content_hash))
}

/// Bring `target_dir` in line with `manifest`.
///
/// Prior versions of `form_id` (deleted or not) are searched for reusable
/// plain files. Shared entity lists are imported into `store` at most once.
pub fn reconcile_resources(
    form_id: &str,
    manifest: &[ManifestEntry],
    target_dir: &Path,
    store: &mut LocalCatalogStore,
    fetcher: &dyn ResourceFetcher,
) -> Result<MediaReport, DownloadError> {
    fs::create_dir_all(target_dir).map_err(|e| DownloadError::disk(target_dir, e))?;

    let prior_dirs: Vec<PathBuf> = store
        .forms_by_id(form_id)?
        .into_iter()
        .map(|form| form.resource_dir)
        .filter(|dir| dir != target_dir)
        .collect();

    let mut report = MediaReport::default();

    for entry in manifest {
        match &entry.kind {
            ResourceKind::Plain => {
                let dest = target_dir.join(&entry.filename);
                if let Some(source) = find_reusable(entry, &prior_dirs) {
                    debug!(form_id, file = %entry.filename, from = %source.display(), "reusing media file");
                    fs::copy(&source, &dest).map_err(|e| DownloadError::disk(&dest, e))?;
                    report.reused += 1;
                    continue;
                }

                debug!(form_id, file = %entry.filename, url = %entry.download_url, "fetching media file");
                let (actual, _) = fetch_to_file(fetcher, &entry.download_url, &dest)?;
                if actual != entry.content_hash {
                    let _ = fs::remove_file(&dest);
                    return Err(DownloadError::HashMismatch {
                        url: entry.download_url.clone(),
                        expected: entry.content_hash.clone(),
                        actual,
                    });
                }
                report.fetched += 1;
                report.any_changed = true;
            }
            ResourceKind::Shared { name, version } => {
                let key = SharedResourceKey::new(name, *version);

                if store.is_materialized(&key)? {
                    debug!(form_id, resource = %key, "shared resource already materialized");
                    report.skipped += 1;
                } else if materialize(entry, &key, store, fetcher)? {
                    report.fetched += 1;
                    report.any_changed = true;
                } else {
                    report.skipped += 1;
                }

                if !report.shared.contains(&key) {
                    report.shared.push(key);
                }
            }
        }
    }

    Ok(report)
}

/// Fetch, verify, parse and import one shared resource.
///
/// Returns `false` if another importer got there first.
fn materialize(
    entry: &ManifestEntry,
    key: &SharedResourceKey,
    store: &mut LocalCatalogStore,
    fetcher: &dyn ResourceFetcher,
) -> Result<bool, DownloadError> {
    debug!(resource = %key, url = %entry.download_url, "fetching shared resource");
    let bytes = fetch_to_vec(fetcher, &entry.download_url)?;

    let actual = hash_bytes(&bytes);
    if actual != entry.content_hash {
        return Err(DownloadError::HashMismatch {
            url: entry.download_url.clone(),
            expected: entry.content_hash.clone(),
            actual,
        });
    }

    let entities = parse_entity_list(&bytes).map_err(|source| DownloadError::ResourceParse {
        key: key.clone(),
        source,
    })?;

    Ok(store.materialize_shared_resource(key, &actual, &entities)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::MemoryFetcher;
    use crate::core::store::NewForm;
    use tempfile::tempdir;

    fn register(store: &mut LocalCatalogStore, root: &Path, id: &str, version: &str) -> PathBuf {
        let dir = root.join("forms").join(id).join(version);
        let media = dir.join("media");
        fs::create_dir_all(&media).unwrap();
        store
            .insert_form(
                &NewForm {
                    form_id: id.to_string(),
                    version: Some(version.to_string()),
                    display_name: id.to_string(),
                    content_hash: hash_bytes(version.as_bytes()),
                    definition_path: dir.join("form.xml"),
                    resource_dir: media.clone(),
                },
                &[],
            )
            .unwrap();
        media
    }

    #[test]
    fn test_identical_file_is_reused_not_fetched() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let v1_media = register(&mut store, tmp.path(), "f", "1");
        fs::write(v1_media.join("logo.png"), b"logo-bytes").unwrap();

        let fetcher = MemoryFetcher::new();
        let manifest = vec![ManifestEntry::plain(
            "logo.png",
            hash_bytes(b"logo-bytes"),
            "m/logo.png",
        )];
        let target = tmp.path().join("staging/media");

        let report =
            reconcile_resources("f", &manifest, &target, &mut store, &fetcher).unwrap();

        assert_eq!(fetcher.total_fetches(), 0);
        assert_eq!(report.reused, 1);
        assert!(!report.any_changed);
        assert_eq!(fs::read(target.join("logo.png")).unwrap(), b"logo-bytes");
    }

    #[test]
    fn test_changed_file_is_fetched() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let v1_media = register(&mut store, tmp.path(), "f", "1");
        fs::write(v1_media.join("logo.png"), b"old").unwrap();

        let fetcher = MemoryFetcher::new();
        fetcher.insert("m/logo.png", b"new".to_vec());
        let manifest = vec![ManifestEntry::plain("logo.png", hash_bytes(b"new"), "m/logo.png")];
        let target = tmp.path().join("staging/media");

        let report =
            reconcile_resources("f", &manifest, &target, &mut store, &fetcher).unwrap();

        assert_eq!(fetcher.fetch_count("m/logo.png"), 1);
        assert!(report.any_changed);
        assert_eq!(fs::read(target.join("logo.png")).unwrap(), b"new");
    }

    #[test]
    fn test_reuse_searches_older_and_deleted_versions() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let v1_media = register(&mut store, tmp.path(), "f", "1");
        register(&mut store, tmp.path(), "f", "2");
        fs::write(v1_media.join("a.txt"), b"A").unwrap();
        store.soft_delete("f", Some("1")).unwrap();

        let fetcher = MemoryFetcher::new();
        let manifest = vec![ManifestEntry::plain("a.txt", hash_bytes(b"A"), "m/a.txt")];
        let target = tmp.path().join("staging/media");

        let report =
            reconcile_resources("f", &manifest, &target, &mut store, &fetcher).unwrap();
        assert_eq!(report.reused, 1);
        assert_eq!(fetcher.total_fetches(), 0);
    }

    #[test]
    fn test_other_form_files_are_not_reused() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let other_media = register(&mut store, tmp.path(), "other", "1");
        fs::write(other_media.join("a.txt"), b"A").unwrap();

        let fetcher = MemoryFetcher::new();
        fetcher.insert("m/a.txt", b"A".to_vec());
        let manifest = vec![ManifestEntry::plain("a.txt", hash_bytes(b"A"), "m/a.txt")];

        let report = reconcile_resources(
            "f",
            &manifest,
            &tmp.path().join("staging/media"),
            &mut store,
            &fetcher,
        )
        .unwrap();
        assert_eq!(report.fetched, 1);
    }

    #[test]
    fn test_hash_mismatch_is_rejected() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("m/a.txt", b"tampered".to_vec());
        let manifest = vec![ManifestEntry::plain("a.txt", hash_bytes(b"A"), "m/a.txt")];
        let target = tmp.path().join("staging/media");

        let err = reconcile_resources("f", &manifest, &target, &mut store, &fetcher).unwrap_err();
        assert!(matches!(err, DownloadError::HashMismatch { .. }));
        assert!(!target.join("a.txt").exists());
    }

    #[test]
    fn test_shared_resource_imported_once() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let csv = b"name,label\nalice,Alice\nbob,Bob\n".to_vec();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("m/people.csv", csv.clone());

        let manifest = vec![ManifestEntry::shared(
            "people.csv",
            hash_bytes(&csv),
            "m/people.csv",
            "people",
            3,
        )];

        let first = reconcile_resources(
            "a",
            &manifest,
            &tmp.path().join("s1/media"),
            &mut store,
            &fetcher,
        )
        .unwrap();
        let second = reconcile_resources(
            "b",
            &manifest,
            &tmp.path().join("s2/media"),
            &mut store,
            &fetcher,
        )
        .unwrap();

        assert_eq!(fetcher.fetch_count("m/people.csv"), 1);
        assert!(first.any_changed);
        assert!(!second.any_changed);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.shared, vec![SharedResourceKey::new("people", 3)]);
        assert!(!tmp.path().join("s2/media/people.csv").exists());
        assert_eq!(
            store
                .entities(&SharedResourceKey::new("people", 3))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_unparseable_shared_resource() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let csv = b"label\nno names here\n".to_vec();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("m/people.csv", csv.clone());
        let manifest = vec![ManifestEntry::shared(
            "people.csv",
            hash_bytes(&csv),
            "m/people.csv",
            "people",
            1,
        )];

        let err = reconcile_resources(
            "a",
            &manifest,
            &tmp.path().join("s/media"),
            &mut store,
            &fetcher,
        )
        .unwrap_err();
        assert!(matches!(err, DownloadError::ResourceParse { .. }));
        assert!(!store
            .is_materialized(&SharedResourceKey::new("people", 1))
            .unwrap());
    }

    #[test]
    fn test_is_satisfied() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        let dir = tmp.path().join("media");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.txt"), b"A").unwrap();

        let plain = ManifestEntry::plain("a.txt", hash_bytes(b"A"), "u");
        let stale = ManifestEntry::plain("a.txt", hash_bytes(b"B"), "u");
        let missing = ManifestEntry::plain("b.txt", hash_bytes(b"A"), "u");
        let shared = ManifestEntry::shared("p.csv", hash_bytes(b"x"), "u", "people", 1);

        assert!(is_satisfied(&plain, &dir, &store).unwrap());
        assert!(!is_satisfied(&stale, &dir, &store).unwrap());
        assert!(!is_satisfied(&missing, &dir, &store).unwrap());
        assert!(!is_satisfied(&shared, &dir, &store).unwrap());

        store
            .materialize_shared_resource(&SharedResourceKey::new("people", 1), &hash_bytes(b"x"), &[])
            .unwrap();
        assert!(is_satisfied(&shared, &dir, &store).unwrap());
    }
}
