//! Carry the last-saved working file forward to a new form version

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::catalog::is_plain_filename;
use crate::core::download::DownloadError;
use crate::core::store::LocalCatalogStore;

/// Default name of the last-saved working file inside a resource directory
pub const DEFAULT_DRAFT_FILENAME: &str = "last-saved.xml";

/// Copy the draft of the newest prior version of `form_id` into `new_resource_dir`.
///
/// Rows are searched deleted or not, newest `inserted_at` first, and the
/// first one with a draft present wins. Returns the path written, or `None`
/// when no prior version has a draft, when `draft_filename` is not a plain
/// file name, or when the new version already ships a file of that name.
pub fn carry_over_draft(
    form_id: &str,
    new_resource_dir: &Path,
    store: &LocalCatalogStore,
    draft_filename: &str,
) -> Result<Option<PathBuf>, DownloadError> {
    if !is_plain_filename(draft_filename) {
        warn!(form_id, draft_filename, "draft file name is not a plain file name, not carrying over");
        return Ok(None);
    }

    let dest = new_resource_dir.join(draft_filename);
    if dest.exists() {
        debug!(form_id, file = %dest.display(), "manifest supplied the draft file, not carrying over");
        return Ok(None);
    }

    let source = store
        .forms_by_id(form_id)?
        .into_iter()
        .filter(|form| form.resource_dir != new_resource_dir)
        .map(|form| form.resource_dir.join(draft_filename))
        .find(|candidate| candidate.is_file());

    let Some(source) = source else {
        return Ok(None);
    };

    fs::create_dir_all(new_resource_dir).map_err(|e| DownloadError::disk(new_resource_dir, e))?;
    fs::copy(&source, &dest).map_err(|e| DownloadError::disk(&dest, e))?;
    debug!(form_id, from = %source.display(), "carried over draft");

    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hashing::hash_bytes;
    use crate::core::store::NewForm;
    use tempfile::tempdir;

    fn register(
        store: &mut LocalCatalogStore,
        root: &Path,
        id: &str,
        version: &str,
        draft: Option<&str>,
    ) {
        let media = root.join("forms").join(id).join(version).join("media");
        fs::create_dir_all(&media).unwrap();
        if let Some(text) = draft {
            fs::write(media.join(DEFAULT_DRAFT_FILENAME), text).unwrap();
        }
        store
            .insert_form(
                &NewForm {
                    form_id: id.to_string(),
                    version: Some(version.to_string()),
                    display_name: id.to_string(),
                    content_hash: hash_bytes(version.as_bytes()),
                    definition_path: media.with_file_name("form.xml"),
                    resource_dir: media,
                },
                &[],
            )
            .unwrap();
    }

    #[test]
    fn test_no_prior_draft_is_noop() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        register(&mut store, tmp.path(), "f", "1", None);

        let target = tmp.path().join("new/media");
        let copied = carry_over_draft("f", &target, &store, DEFAULT_DRAFT_FILENAME).unwrap();
        assert_eq!(copied, None);
        assert!(!target.join(DEFAULT_DRAFT_FILENAME).exists());
    }

    #[test]
    fn test_newest_draft_wins_and_deleted_rows_count() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        register(&mut store, tmp.path(), "f", "1", Some("old"));
        register(&mut store, tmp.path(), "f", "2", Some("new"));
        register(&mut store, tmp.path(), "f", "3", None);
        store.soft_delete("f", Some("2")).unwrap();

        let target = tmp.path().join("new/media");
        let copied = carry_over_draft("f", &target, &store, DEFAULT_DRAFT_FILENAME)
            .unwrap()
            .unwrap();
        assert_eq!(fs::read_to_string(copied).unwrap(), "new");
    }

    #[test]
    fn test_other_form_ids_are_ignored() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        register(&mut store, tmp.path(), "other", "1", Some("theirs"));

        let target = tmp.path().join("new/media");
        assert_eq!(
            carry_over_draft("f", &target, &store, DEFAULT_DRAFT_FILENAME).unwrap(),
            None
        );
    }

    #[test]
    fn test_draft_name_outside_resource_dir_is_refused() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        register(&mut store, tmp.path(), "f", "1", None);
        let prior = tmp.path().join("forms/f/1/media");
        fs::write(prior.join("../escaped.xml"), "secret").unwrap();

        let target = tmp.path().join("new/media");
        for name in ["../escaped.xml", "..", "a/b.xml", ""] {
            assert_eq!(carry_over_draft("f", &target, &store, name).unwrap(), None);
        }
        assert!(!tmp.path().join("new/escaped.xml").exists());
    }

    #[test]
    fn test_manifest_file_with_draft_name_is_kept() {
        let tmp = tempdir().unwrap();
        let mut store = LocalCatalogStore::open(tmp.path()).unwrap();
        register(&mut store, tmp.path(), "f", "1", Some("old draft"));

        let target = tmp.path().join("new/media");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join(DEFAULT_DRAFT_FILENAME), "from manifest").unwrap();

        assert_eq!(
            carry_over_draft("f", &target, &store, DEFAULT_DRAFT_FILENAME).unwrap(),
            None
        );
        assert_eq!(
            fs::read_to_string(target.join(DEFAULT_DRAFT_FILENAME)).unwrap(),
            "from manifest"
        );
    }
}
