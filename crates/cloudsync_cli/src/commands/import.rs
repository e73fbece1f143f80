//! Import command implementation.
//!
//! The import file is a JSON document:
//!
//! ```json
//! {
//!   "nodes": [{ "id": "a", "type": "Page", "properties": { "name": "Home" } }],
//!   "relationships": [{ "id": "r1", "type": "LINKS", "start": "a", "end": "b" }]
//! }
//! ```
//!
//! Entities that already exist have their properties merged.

use super::{open_data, CliError};
use cloudsync_protocol::{Properties, PropertyValue};
use cloudsync_store::GraphStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// A node in the import file.
#[derive(Debug, Deserialize)]
pub struct ImportNode {
    /// Node id.
    pub id: String,
    /// Node type.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Properties.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// A relationship in the import file.
#[derive(Debug, Deserialize)]
pub struct ImportRelationship {
    /// Relationship id.
    pub id: String,
    /// Relationship type.
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Start node id.
    pub start: String,
    /// End node id.
    pub end: String,
    /// Properties.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// The whole import file.
#[derive(Debug, Default, Deserialize)]
pub struct ImportDocument {
    /// Nodes, imported first.
    #[serde(default)]
    pub nodes: Vec<ImportNode>,
    /// Relationships between imported or existing nodes.
    #[serde(default)]
    pub relationships: Vec<ImportRelationship>,
}

/// Counts of created and updated entities.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    /// Nodes created.
    pub nodes_created: usize,
    /// Nodes updated.
    pub nodes_updated: usize,
    /// Relationships created.
    pub relationships_created: usize,
    /// Relationships updated.
    pub relationships_updated: usize,
}

/// Converts a JSON value to a property value. Objects are kept as JSON text.
pub fn property_value(value: serde_json::Value) -> PropertyValue {
    use serde_json::Value;
    match value {
        Value::Null => PropertyValue::Null,
        Value::Bool(b) => PropertyValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => PropertyValue::Integer(i),
            None => PropertyValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => PropertyValue::Text(s),
        Value::Array(items) => PropertyValue::List(items.into_iter().map(property_value).collect()),
        object @ Value::Object(_) => PropertyValue::Text(object.to_string()),
    }
}

fn properties(values: BTreeMap<String, serde_json::Value>) -> Properties {
    values
        .into_iter()
        .map(|(key, value)| (key, property_value(value)))
        .collect()
}

/// Applies a document to `graph` in one transaction.
pub fn apply(
    graph: &dyn GraphStore,
    document: ImportDocument,
) -> Result<ImportStats, Box<dyn std::error::Error>> {
    let mut stats = ImportStats::default();
    let mut tx = graph.begin()?;

    for node in document.nodes {
        let props = properties(node.properties);
        if tx.node(&node.id).is_some() {
            tx.update_node(&node.id, props)?;
            stats.nodes_updated += 1;
        } else {
            tx.create_node(Some(&node.id), &node.node_type, props)?;
            stats.nodes_created += 1;
        }
    }

    for rel in document.relationships {
        let props = properties(rel.properties);
        if tx.relationship(&rel.id).is_some() {
            tx.update_relationship(&rel.id, props)?;
            stats.relationships_updated += 1;
        } else {
            tx.create_relationship(Some(&rel.id), &rel.relationship_type, &rel.start, &rel.end, props)?;
            stats.relationships_created += 1;
        }
    }

    tx.commit()?;
    Ok(stats)
}

/// Runs the import command.
pub fn run(data: &Path, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(file)?;
    let document: ImportDocument =
        serde_json::from_str(&text).map_err(|e| CliError::Import(e.to_string()))?;

    let (graph, _) = open_data(data)?;
    let stats = apply(&graph, document)?;
    info!(file = %file.display(), ?stats, "import committed");

    println!(
        "Imported {} nodes ({} updated), {} relationships ({} updated)",
        stats.nodes_created, stats.nodes_updated, stats.relationships_created, stats.relationships_updated
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_store::MemoryGraphStore;

    const DOCUMENT: &str = r#"{
        "nodes": [
            { "id": "a", "type": "Page", "properties": { "name": "Home", "rank": 1 } },
            { "id": "b", "type": "Item", "properties": { "tags": ["x", "y"], "meta": { "k": 1 } } }
        ],
        "relationships": [
            { "id": "r1", "type": "LINKS", "start": "a", "end": "b" }
        ]
    }"#;

    #[test]
    fn json_values_convert() {
        assert_eq!(property_value(serde_json::json!(3)), PropertyValue::Integer(3));
        assert_eq!(property_value(serde_json::json!(1.5)), PropertyValue::Float(1.5));
        assert_eq!(property_value(serde_json::json!(null)), PropertyValue::Null);
        assert_eq!(
            property_value(serde_json::json!({ "k": 1 })),
            PropertyValue::Text(r#"{"k":1}"#.into())
        );
    }

    #[test]
    fn apply_creates_then_updates() {
        let graph = MemoryGraphStore::new();
        let document: ImportDocument = serde_json::from_str(DOCUMENT).unwrap();
        let stats = apply(&graph, document).unwrap();
        assert_eq!(stats.nodes_created, 2);
        assert_eq!(stats.relationships_created, 1);

        let document: ImportDocument = serde_json::from_str(DOCUMENT).unwrap();
        let stats = apply(&graph, document).unwrap();
        assert_eq!(stats.nodes_updated, 2);
        assert_eq!(stats.relationships_updated, 1);
        assert_eq!(graph.node_count(), 2);

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.nodes.get("a").unwrap().text("name"), Some("Home"));
    }

    #[test]
    fn run_persists_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("import.json");
        std::fs::write(&file, DOCUMENT).unwrap();

        run(dir.path(), &file).unwrap();

        let (graph, _) = open_data(dir.path()).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.relationship_count(), 1);
    }

    #[test]
    fn malformed_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("import.json");
        std::fs::write(&file, "{ not json").unwrap();
        assert!(run(dir.path(), &file).is_err());
    }
}
