//! In-memory graph store with optional file persistence.

use crate::error::{StoreError, StoreResult};
use crate::graph::{GraphStore, GraphTransaction, GraphView, Node, Relationship};
use cloudsync_protocol::Properties;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// The committed contents of a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Nodes by id.
    pub nodes: BTreeMap<String, Node>,
    /// Relationships by id.
    pub relationships: BTreeMap<String, Relationship>,
}

impl GraphView for GraphSnapshot {
    fn node(&self, id: &str) -> Option<Node> {
        self.nodes.get(id).cloned()
    }

    fn relationship(&self, id: &str) -> Option<Relationship> {
        self.relationships.get(id).cloned()
    }

    fn outgoing(&self, node_id: &str) -> Vec<Relationship> {
        self.relationships
            .values()
            .filter(|r| r.start_id == node_id)
            .cloned()
            .collect()
    }

    fn nodes_of_type(&self, node_type: &str) -> Vec<Node> {
        self.nodes
            .values()
            .filter(|n| n.node_type == node_type)
            .cloned()
            .collect()
    }
}

/// A graph store held in memory.
///
/// When opened with a path, every commit rewrites the snapshot file
/// atomically (write to a temporary file, then rename), so a crash never
/// leaves a half-written graph behind.
///
/// Transactions stage their writes privately; commit applies them to the
/// shared graph entity by entity.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    graph: Arc<RwLock<GraphSnapshot>>,
    path: Option<PathBuf>,
}

impl MemoryGraphStore {
    /// Creates an empty, purely in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store persisted at `path`, loading it if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let snapshot = if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            ciborium::from_reader(reader).map_err(|e| StoreError::Codec(e.to_string()))?
        } else {
            GraphSnapshot::default()
        };

        debug!(
            path = %path.display(),
            nodes = snapshot.nodes.len(),
            relationships = snapshot.relationships.len(),
            "opened graph store"
        );

        Ok(Self {
            graph: Arc::new(RwLock::new(snapshot)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Returns a copy of the committed graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.read().clone()
    }

    /// Returns the number of committed nodes.
    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    /// Returns the number of committed relationships.
    pub fn relationship_count(&self) -> usize {
        self.graph.read().relationships.len()
    }

    /// Returns the snapshot file path, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn save_snapshot(path: &Path, snapshot: &GraphSnapshot) -> StoreResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        ciborium::into_writer(snapshot, &mut writer)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

impl GraphStore for MemoryGraphStore {
    fn begin(&self) -> StoreResult<Box<dyn GraphTransaction>> {
        Ok(Box::new(MemoryTransaction {
            graph: Arc::clone(&self.graph),
            path: self.path.clone(),
            nodes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }))
    }
}

struct MemoryTransaction {
    graph: Arc<RwLock<GraphSnapshot>>,
    path: Option<PathBuf>,
    nodes: BTreeMap<String, Node>,
    relationships: BTreeMap<String, Relationship>,
}

impl MemoryTransaction {
    fn generate_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

impl GraphView for MemoryTransaction {
    fn node(&self, id: &str) -> Option<Node> {
        self.nodes
            .get(id)
            .cloned()
            .or_else(|| self.graph.read().nodes.get(id).cloned())
    }

    fn relationship(&self, id: &str) -> Option<Relationship> {
        self.relationships
            .get(id)
            .cloned()
            .or_else(|| self.graph.read().relationships.get(id).cloned())
    }

    fn outgoing(&self, node_id: &str) -> Vec<Relationship> {
        let mut found: BTreeMap<String, Relationship> = self
            .graph
            .read()
            .relationships
            .values()
            .filter(|r| r.start_id == node_id)
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        for rel in self.relationships.values().filter(|r| r.start_id == node_id) {
            found.insert(rel.id.clone(), rel.clone());
        }
        found.into_values().collect()
    }

    fn nodes_of_type(&self, node_type: &str) -> Vec<Node> {
        let mut found: BTreeMap<String, Node> = self
            .graph
            .read()
            .nodes
            .values()
            .filter(|n| n.node_type == node_type)
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        for node in self.nodes.values() {
            if node.node_type == node_type {
                found.insert(node.id.clone(), node.clone());
            } else {
                found.remove(&node.id);
            }
        }
        found.into_values().collect()
    }
}

impl GraphTransaction for MemoryTransaction {
    fn create_node(
        &mut self,
        id: Option<&str>,
        node_type: &str,
        properties: Properties,
    ) -> StoreResult<Node> {
        let id = id.map_or_else(Self::generate_id, str::to_string);
        if self.node(&id).is_some() {
            return Err(StoreError::AlreadyExists(format!("node {id}")));
        }

        let node = Node::new(id.clone(), node_type, properties);
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    fn update_node(&mut self, id: &str, properties: Properties) -> StoreResult<Node> {
        let mut node = self
            .node(id)
            .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
        node.properties.extend(properties);
        self.nodes.insert(id.to_string(), node.clone());
        Ok(node)
    }

    fn create_relationship(
        &mut self,
        id: Option<&str>,
        relationship_type: &str,
        start_id: &str,
        end_id: &str,
        properties: Properties,
    ) -> StoreResult<Relationship> {
        for endpoint in [start_id, end_id] {
            if self.node(endpoint).is_none() {
                return Err(StoreError::NotFound(format!("node {endpoint}")));
            }
        }

        let id = id.map_or_else(Self::generate_id, str::to_string);
        if self.relationship(&id).is_some() {
            return Err(StoreError::AlreadyExists(format!("relationship {id}")));
        }

        let rel = Relationship::new(id.clone(), relationship_type, start_id, end_id, properties);
        self.relationships.insert(id, rel.clone());
        Ok(rel)
    }

    fn update_relationship(
        &mut self,
        id: &str,
        properties: Properties,
    ) -> StoreResult<Relationship> {
        let mut rel = self
            .relationship(id)
            .ok_or_else(|| StoreError::NotFound(format!("relationship {id}")))?;
        rel.properties.extend(properties);
        self.relationships.insert(id.to_string(), rel.clone());
        Ok(rel)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut graph = this.graph.write();

        let mut next = graph.clone();
        next.nodes.extend(this.nodes);
        next.relationships.extend(this.relationships);

        if let Some(path) = &this.path {
            save_snapshot(path, &next)?;
        }

        *graph = next;
        Ok(())
    }
}
