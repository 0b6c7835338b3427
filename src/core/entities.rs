//! Entity-list parsing
//!
//! Shared versioned resources are CSV entity lists: a header row that must
//! include `name`, an optional `label`, and any number of property columns.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Errors while parsing an entity list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityListError {
    #[error("Entity list has no 'name' column")]
    MissingNameColumn,

    #[error("Entity list row {row} has an empty name")]
    EmptyName { row: usize },

    #[error("Entity list contains '{0}' more than once")]
    DuplicateName(String),

    #[error("Malformed entity list: {0}")]
    Csv(String),
}

/// One entity imported from a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    pub name: String,
    pub label: Option<String>,
    pub properties: BTreeMap<String, String>,
}

/// Parse CSV bytes into entity records
pub fn parse_entity_list(bytes: &[u8]) -> Result<Vec<EntityRecord>, EntityListError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| EntityListError::Csv(e.to_string()))?
        .clone();

    let name_idx = headers
        .iter()
        .position(|h| h == "name")
        .ok_or(EntityListError::MissingNameColumn)?;
    let label_idx = headers.iter().position(|h| h == "label");

    let mut records = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| EntityListError::Csv(e.to_string()))?;
        // Header is row 1
        let row = i + 2;

        let name = record.get(name_idx).unwrap_or("").trim().to_string();
        if name.is_empty() {
            return Err(EntityListError::EmptyName { row });
        }
        if !seen.insert(name.clone()) {
            return Err(EntityListError::DuplicateName(name));
        }

        let label = label_idx
            .and_then(|idx| record.get(idx))
            .filter(|l| !l.is_empty())
            .map(String::from);

        let properties = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != name_idx && Some(*idx) != label_idx)
            .map(|(idx, header)| {
                (
                    header.to_string(),
                    record.get(idx).unwrap_or("").to_string(),
                )
            })
            .collect();

        records.push(EntityRecord {
            name,
            label,
            properties,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_list() {
        let csv = b"name,label,village,age\nalice,Alice A,North,34\nbob,,South,41\n";
        let records = parse_entity_list(csv).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "alice");
        assert_eq!(records[0].label.as_deref(), Some("Alice A"));
        assert_eq!(records[0].properties["village"], "North");
        assert_eq!(records[0].properties["age"], "34");
        assert_eq!(records[1].label, None);
        assert!(!records[1].properties.contains_key("name"));
    }

    #[test]
    fn test_missing_name_column() {
        assert_eq!(
            parse_entity_list(b"label,village\nA,North\n"),
            Err(EntityListError::MissingNameColumn)
        );
    }

    #[test]
    fn test_empty_and_duplicate_names() {
        assert_eq!(
            parse_entity_list(b"name,label\n,Nobody\n"),
            Err(EntityListError::EmptyName { row: 2 })
        );
        assert_eq!(
            parse_entity_list(b"name\nx\nx\n"),
            Err(EntityListError::DuplicateName("x".to_string()))
        );
    }

    #[test]
    fn test_ragged_rows_are_malformed() {
        assert!(matches!(
            parse_entity_list(b"name,label\na,b,c\n"),
            Err(EntityListError::Csv(_))
        ));
    }

    #[test]
    fn test_header_only_list_is_empty() {
        assert!(parse_entity_list(b"name,label\n").unwrap().is_empty());
    }
}
