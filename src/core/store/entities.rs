//! Shared resource materialization and entity queries

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{parse_datetime, LocalCatalogStore, LocalSharedResource, SharedResourceKey, StoreError};
use crate::core::entities::EntityRecord;
use crate::core::hashing::ContentHash;

impl LocalCatalogStore {
    /// Look up a materialized shared resource
    pub fn shared_resource(
        &self,
        key: &SharedResourceKey,
    ) -> Result<Option<LocalSharedResource>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT content_hash, entity_count, materialized_at FROM shared_resources
                 WHERE resource_name = ?1 AND resource_version = ?2",
                params![key.name, key.version],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(hash, count, at)| LocalSharedResource {
            key: key.clone(),
            content_hash: ContentHash::new(&hash),
            entity_count: count as usize,
            materialized_at: parse_datetime(&at),
        }))
    }

    pub fn is_materialized(&self, key: &SharedResourceKey) -> Result<bool, StoreError> {
        Ok(self.shared_resource(key)?.is_some())
    }

    /// Import an entity list and mark `(name, version)` materialized.
    ///
    /// Returns `false` without touching anything when the resource was
    /// already materialized. Entities and the marker row commit together, and
    /// the write lock is taken up front so concurrent importers serialize.
    pub fn materialize_shared_resource(
        &mut self,
        key: &SharedResourceKey,
        content_hash: &ContentHash,
        entities: &[EntityRecord],
    ) -> Result<bool, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM shared_resources
                            WHERE resource_name = ?1 AND resource_version = ?2)",
            params![key.name, key.version],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO entities (list_name, list_version, name, label, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entity in entities {
                let properties = serde_json::to_string(&entity.properties)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
                stmt.execute(params![
                    key.name,
                    key.version,
                    entity.name,
                    entity.label,
                    properties
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO shared_resources
             (resource_name, resource_version, content_hash, entity_count, materialized_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.name,
                key.version,
                content_hash.as_str(),
                entities.len() as i64,
                Utc::now().to_rfc3339()
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Every materialized shared resource, by name then version
    pub fn shared_resources(&self) -> Result<Vec<LocalSharedResource>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_name, resource_version, content_hash, entity_count, materialized_at
             FROM shared_resources ORDER BY resource_name, resource_version",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LocalSharedResource {
                key: SharedResourceKey {
                    name: row.get(0)?,
                    version: row.get(1)?,
                },
                content_hash: ContentHash::new(&row.get::<_, String>(2)?),
                entity_count: row.get::<_, i64>(3)? as usize,
                materialized_at: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    /// Entities imported for one shared resource, ordered by name
    pub fn entities(&self, key: &SharedResourceKey) -> Result<Vec<EntityRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, label, properties FROM entities
             WHERE list_name = ?1 AND list_version = ?2 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![key.name, key.version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entities = Vec::new();
        for row in rows {
            let (name, label, properties) = row?;
            entities.push(EntityRecord {
                name,
                label,
                properties: serde_json::from_str(&properties)
                    .map_err(|e| StoreError::Database(e.to_string()))?,
            });
        }
        Ok(entities)
    }
}
