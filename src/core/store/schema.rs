//! Database schema initialization

use rusqlite::params;

use super::{LocalCatalogStore, StoreError, SCHEMA_VERSION};

impl LocalCatalogStore {
    /// Initialize database schema
    pub(super) fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            -- Downloaded form versions. Several rows may share form_id.
            CREATE TABLE IF NOT EXISTS forms (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                form_id TEXT NOT NULL,
                version TEXT,
                display_name TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                definition_path TEXT NOT NULL,
                resource_dir TEXT NOT NULL,
                inserted_at INTEGER NOT NULL,
                downloaded_at TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_forms_form_id ON forms(form_id);
            CREATE INDEX IF NOT EXISTS idx_forms_active ON forms(form_id, deleted);

            -- Shared versioned resources, one row per fully imported (name, version)
            CREATE TABLE IF NOT EXISTS shared_resources (
                resource_name TEXT NOT NULL,
                resource_version INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                entity_count INTEGER NOT NULL,
                materialized_at TEXT NOT NULL,
                PRIMARY KEY (resource_name, resource_version)
            );

            -- Which form rows use which shared resources
            CREATE TABLE IF NOT EXISTS form_shared_resources (
                form_row INTEGER NOT NULL,
                resource_name TEXT NOT NULL,
                resource_version INTEGER NOT NULL,
                PRIMARY KEY (form_row, resource_name, resource_version),
                FOREIGN KEY (form_row) REFERENCES forms(row_id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_form_shared_resource
                ON form_shared_resources(resource_name, resource_version);

            -- Imported entity-list rows
            CREATE TABLE IF NOT EXISTS entities (
                list_name TEXT NOT NULL,
                list_version INTEGER NOT NULL,
                name TEXT NOT NULL,
                label TEXT,
                properties TEXT NOT NULL,
                PRIMARY KEY (list_name, list_version, name)
            );
            "#,
        )?;

        self.conn.execute("DELETE FROM schema_version", [])?;
        self.conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    /// Read the stored schema version (0 when the table is missing)
    pub(super) fn stored_schema_version(&self) -> i32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    /// Bring an existing database to the current schema.
    ///
    /// Tables are only dropped and recreated while no forms are registered;
    /// downloaded forms cannot be rebuilt from anything local.
    pub(super) fn ensure_schema(&self) -> Result<(), StoreError> {
        let found = self.stored_schema_version();
        if found == SCHEMA_VERSION {
            return Ok(());
        }

        let has_forms: bool = self
            .conn
            .query_row("SELECT EXISTS (SELECT 1 FROM forms)", [], |row| row.get(0))
            .unwrap_or(false);

        if has_forms {
            return Err(StoreError::SchemaMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        self.conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS schema_version;
            DROP TABLE IF EXISTS form_shared_resources;
            DROP TABLE IF EXISTS forms;
            DROP TABLE IF EXISTS shared_resources;
            DROP TABLE IF EXISTS entities;
            "#,
        )?;
        self.init_schema()
    }
}
