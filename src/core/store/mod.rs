//! SQLite-backed local catalog store
//!
//! This module keeps the durable record of what has been downloaded:
//! - Form versions (several versions of one form id may coexist)
//! - Soft-deleted versions, which stay queryable for resource reuse
//! - Shared versioned resources, imported at most once per `(name, version)`
//! - Entity rows imported from shared resources
//!
//! All paths are stored relative to the project root so a project directory
//! can be moved without invalidating the catalog.

mod entities;
mod schema;
mod types;

pub use types::*;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use thiserror::Error;

use crate::core::hashing::ContentHash;

/// Catalog database location within a project
pub const CATALOG_FILE: &str = ".formsync/catalog.db";

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

const FORM_COLUMNS: &str = "row_id, form_id, version, display_name, content_hash, \
     definition_path, resource_dir, inserted_at, downloaded_at, deleted";

/// Errors from the local catalog store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Catalog database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Catalog database has schema version {found}, expected {expected}")]
    SchemaMismatch { found: i32, expected: i32 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// The local catalog of one project
pub struct LocalCatalogStore {
    conn: Connection,
    project_root: PathBuf,
}

impl LocalCatalogStore {
    /// Open or create the catalog database for a project root
    pub fn open(project_root: &Path) -> Result<Self, StoreError> {
        let db_path = project_root.join(CATALOG_FILE);

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        let needs_init = !db_path.exists();
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        // WAL lets interpreters read while a sync writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn,
            project_root: project_root.to_path_buf(),
        };

        if needs_init {
            store.init_schema()?;
        } else {
            store.ensure_schema()?;
        }

        Ok(store)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Convert an absolute path under the project root to its stored form
    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    fn absolute(&self, stored: &str) -> PathBuf {
        self.project_root.join(stored)
    }

    fn row_to_form(&self, row: &Row<'_>) -> rusqlite::Result<LocalForm> {
        Ok(LocalForm {
            row_id: row.get(0)?,
            form_id: row.get(1)?,
            version: row.get(2)?,
            display_name: row.get(3)?,
            content_hash: ContentHash::new(&row.get::<_, String>(4)?),
            definition_path: self.absolute(&row.get::<_, String>(5)?),
            resource_dir: self.absolute(&row.get::<_, String>(6)?),
            inserted_at: row.get(7)?,
            downloaded_at: parse_datetime(&row.get::<_, String>(8)?),
            deleted: row.get::<_, i64>(9)? != 0,
        })
    }

    fn query_forms(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<LocalForm>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| self.row_to_form(row))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    // =========================================================================
    // Form queries
    // =========================================================================

    /// All rows for a form id, deleted or not, newest first
    pub fn forms_by_id(&self, form_id: &str) -> Result<Vec<LocalForm>, StoreError> {
        self.query_forms(
            &format!(
                "SELECT {} FROM forms WHERE form_id = ?1 ORDER BY inserted_at DESC, row_id DESC",
                FORM_COLUMNS
            ),
            params![form_id],
        )
    }

    /// Non-deleted rows for a form id, newest first
    pub fn active_forms_by_id(&self, form_id: &str) -> Result<Vec<LocalForm>, StoreError> {
        self.query_forms(
            &format!(
                "SELECT {} FROM forms WHERE form_id = ?1 AND deleted = 0 \
                 ORDER BY inserted_at DESC, row_id DESC",
                FORM_COLUMNS
            ),
            params![form_id],
        )
    }

    /// Every row, ordered by form id then newest first
    pub fn all_forms(&self, include_deleted: bool) -> Result<Vec<LocalForm>, StoreError> {
        let filter = if include_deleted { "" } else { "WHERE deleted = 0" };
        self.query_forms(
            &format!(
                "SELECT {} FROM forms {} ORDER BY form_id, inserted_at DESC, row_id DESC",
                FORM_COLUMNS, filter
            ),
            [],
        )
    }

    /// Every row grouped by form id; each group is sorted newest first
    pub fn forms_grouped_by_id(&self) -> Result<HashMap<String, Vec<LocalForm>>, StoreError> {
        let mut grouped: HashMap<String, Vec<LocalForm>> = HashMap::new();
        for form in self.all_forms(true)? {
            grouped.entry(form.form_id.clone()).or_default().push(form);
        }
        for group in grouped.values_mut() {
            group.sort_by(|a, b| {
                b.inserted_at
                    .cmp(&a.inserted_at)
                    .then(b.row_id.cmp(&a.row_id))
            });
        }
        Ok(grouped)
    }

    pub fn form_by_row(&self, row_id: i64) -> Result<Option<LocalForm>, StoreError> {
        Ok(self
            .query_forms(
                &format!("SELECT {} FROM forms WHERE row_id = ?1", FORM_COLUMNS),
                params![row_id],
            )?
            .into_iter()
            .next())
    }

    // =========================================================================
    // Form mutations
    // =========================================================================

    /// Register a downloaded form version with the next insertion counter
    pub fn insert_form(
        &mut self,
        form: &NewForm,
        shared: &[SharedResourceKey],
    ) -> Result<LocalForm, StoreError> {
        self.insert_form_at(form, None, shared)
    }

    /// Register a form version with an explicit insertion counter.
    ///
    /// `None` takes the next counter value. The row and its shared-resource
    /// associations are written in one transaction.
    pub fn insert_form_at(
        &mut self,
        form: &NewForm,
        inserted_at: Option<i64>,
        shared: &[SharedResourceKey],
    ) -> Result<LocalForm, StoreError> {
        let definition_path = self.relative(&form.definition_path);
        let resource_dir = self.relative(&form.resource_dir);
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;

        let inserted_at = match inserted_at {
            Some(value) => value,
            None => tx.query_row(
                "SELECT COALESCE(MAX(inserted_at), 0) + 1 FROM forms",
                [],
                |row| row.get(0),
            )?,
        };

        tx.execute(
            r#"INSERT INTO forms
               (form_id, version, display_name, content_hash, definition_path, resource_dir,
                inserted_at, downloaded_at, deleted)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)"#,
            params![
                form.form_id,
                form.version,
                form.display_name,
                form.content_hash.as_str(),
                definition_path,
                resource_dir,
                inserted_at,
                now
            ],
        )?;
        let row_id = tx.last_insert_rowid();

        for key in shared {
            tx.execute(
                "INSERT OR IGNORE INTO form_shared_resources (form_row, resource_name, resource_version)
                 VALUES (?1, ?2, ?3)",
                params![row_id, key.name, key.version],
            )?;
        }

        tx.commit()?;

        self.form_by_row(row_id)?
            .ok_or_else(|| StoreError::Database(format!("inserted form row {} not found", row_id)))
    }

    /// Soft-delete rows of a form; `None` deletes every version.
    ///
    /// Returns the number of rows that changed.
    pub fn soft_delete(&mut self, form_id: &str, version: Option<&str>) -> Result<usize, StoreError> {
        let changed = match version {
            Some(v) => self.conn.execute(
                "UPDATE forms SET deleted = 1 WHERE form_id = ?1 AND version = ?2 AND deleted = 0",
                params![form_id, v],
            )?,
            None => self.conn.execute(
                "UPDATE forms SET deleted = 1 WHERE form_id = ?1 AND deleted = 0",
                params![form_id],
            )?,
        };
        Ok(changed)
    }

    /// Get store statistics
    pub fn statistics(&self) -> Result<StoreStats, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let db_size_bytes = fs::metadata(self.project_root.join(CATALOG_FILE))
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStats {
            active_forms: count("SELECT COUNT(*) FROM forms WHERE deleted = 0")?,
            deleted_forms: count("SELECT COUNT(*) FROM forms WHERE deleted = 1")?,
            distinct_form_ids: count("SELECT COUNT(DISTINCT form_id) FROM forms")?,
            shared_resources: count("SELECT COUNT(*) FROM shared_resources")?,
            entities: count("SELECT COUNT(*) FROM entities")?,
            db_size_bytes,
        })
    }

    /// Shared resources associated with a form row
    pub fn shared_resources_for_form(
        &self,
        row_id: i64,
    ) -> Result<Vec<SharedResourceKey>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_name, resource_version FROM form_shared_resources
             WHERE form_row = ?1 ORDER BY resource_name, resource_version",
        )?;
        let rows = stmt.query_map(params![row_id], |row| {
            Ok(SharedResourceKey {
                name: row.get(0)?,
                version: row.get(1)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }
}

/// Parse datetime string to DateTime<Utc>
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests;
