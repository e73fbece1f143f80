//! Inspect command implementation.

use super::{open_data, FILES_DIR, GRAPH_FILE};
use cloudsync_protocol::{NAME_PROPERTY, PAGE_TYPE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Local store statistics.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory.
    pub path: String,
    /// Number of nodes.
    pub node_count: usize,
    /// Number of relationships.
    pub relationship_count: usize,
    /// Nodes per type.
    pub node_types: BTreeMap<String, usize>,
    /// Page names, sorted.
    pub pages: Vec<String>,
    /// Nodes carrying file content.
    pub file_count: usize,
    /// Declared size of all file content in bytes.
    pub file_bytes: u64,
}

/// Collects statistics of a data directory.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.join(GRAPH_FILE).exists() {
        return Err(format!("No graph found at {:?}", path).into());
    }
    let (graph, _) = open_data(path)?;
    let snapshot = graph.snapshot();

    let mut result = InspectResult {
        path: path.display().to_string(),
        node_count: snapshot.nodes.len(),
        relationship_count: snapshot.relationships.len(),
        node_types: BTreeMap::new(),
        pages: Vec::new(),
        file_count: 0,
        file_bytes: 0,
    };

    for node in snapshot.nodes.values() {
        *result.node_types.entry(node.node_type.clone()).or_default() += 1;
        if node.node_type == PAGE_TYPE {
            if let Some(name) = node.text(NAME_PROPERTY) {
                result.pages.push(name.to_string());
            }
        }
        if let Some((_, size)) = node.file_info() {
            result.file_count += 1;
            result.file_bytes += size;
        }
    }
    result.pages.sort();
    Ok(result)
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("CloudSync Data Inspection");
    println!("=========================");
    println!("Path: {}", result.path);
    println!("Files: {}", Path::new(&result.path).join(FILES_DIR).display());
    println!();
    println!("Nodes:         {}", result.node_count);
    println!("Relationships: {}", result.relationship_count);
    println!(
        "File content:  {} files, {} bytes",
        result.file_count, result.file_bytes
    );

    if !result.node_types.is_empty() {
        println!();
        println!("Node types:");
        for (node_type, count) in &result.node_types {
            println!("  {:<20} {}", node_type, count);
        }
    }

    if !result.pages.is_empty() {
        println!();
        println!("Pages:");
        for page in &result.pages {
            println!("  {page}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_protocol::{Properties, PropertyValue, PATH_PROPERTY, SIZE_PROPERTY};
    use cloudsync_store::GraphStore;

    #[test]
    fn missing_graph_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(dir.path()).is_err());
    }

    #[test]
    fn counts_types_pages_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let (graph, _) = open_data(dir.path()).unwrap();

        let mut page = Properties::new();
        page.insert(NAME_PROPERTY.into(), PropertyValue::from("Home"));
        let mut file = Properties::new();
        file.insert(PATH_PROPERTY.into(), PropertyValue::from("a.bin"));
        file.insert(SIZE_PROPERTY.into(), PropertyValue::from(42i64));

        let mut tx = graph.begin().unwrap();
        tx.create_node(Some("p"), PAGE_TYPE, page).unwrap();
        tx.create_node(Some("f"), "File", file).unwrap();
        tx.create_relationship(Some("r"), "HAS", "p", "f", Properties::new())
            .unwrap();
        tx.commit().unwrap();

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.node_count, 2);
        assert_eq!(result.relationship_count, 1);
        assert_eq!(result.pages, vec!["Home".to_string()]);
        assert_eq!(result.file_count, 1);
        assert_eq!(result.file_bytes, 42);
        assert_eq!(result.node_types.get(PAGE_TYPE), Some(&1));
    }
}
