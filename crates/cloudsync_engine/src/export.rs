//! Collection of the entities to send.

use crate::error::{CloudError, CloudResult};
use cloudsync_protocol::CHUNK_SIZE;
use cloudsync_store::{GraphView, Node, Relationship};
use std::collections::HashSet;

/// Progress units a file of `size` bytes adds on top of its node:
/// one per chunk plus the begin and end markers.
pub fn file_units(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64) + 2
}

enum Item {
    Node(String),
    Relationship(Relationship),
}

/// The deduplicated set of nodes and relationships a push transmits.
///
/// Insertion order is kept. Nodes are always sent before relationships,
/// so every relationship's endpoints reach the receiver first.
#[derive(Debug, Clone, Default)]
pub struct ExportSet {
    nodes: Vec<Node>,
    node_ids: HashSet<String>,
    relationships: Vec<Relationship>,
    relationship_ids: HashSet<String>,
    unit_count: u64,
}

impl ExportSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects a node and, if `recursive`, everything reachable from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the root node does not exist.
    pub fn collect_node<V>(view: &V, root_id: &str, recursive: bool) -> CloudResult<Self>
    where
        V: GraphView + ?Sized,
    {
        let root = view
            .node(root_id)
            .ok_or_else(|| CloudError::Store(format!("node {root_id} not found")))?;
        let mut set = Self::new();
        set.add_node(root);
        if recursive {
            set.expand(view, vec![Item::Node(root_id.to_string())]);
        }
        Ok(set)
    }

    /// Collects a relationship with its endpoints and, if `recursive`,
    /// everything reachable from them.
    ///
    /// # Errors
    ///
    /// Returns an error if the relationship does not exist.
    pub fn collect_relationship<V>(view: &V, root_id: &str, recursive: bool) -> CloudResult<Self>
    where
        V: GraphView + ?Sized,
    {
        let root = view
            .relationship(root_id)
            .ok_or_else(|| CloudError::Store(format!("relationship {root_id} not found")))?;
        let mut set = Self::new();
        set.add_relationship(root.clone());
        if recursive {
            set.expand(view, vec![Item::Relationship(root)]);
        } else {
            // Endpoints are required for the relationship to resolve remotely.
            for id in [&root.start_id, &root.end_id] {
                if let Some(node) = view.node(id) {
                    set.add_node(node);
                }
            }
        }
        Ok(set)
    }

    /// Works through sync children, descending only into items that were
    /// newly inserted. Terminates on cycles.
    fn expand<V: GraphView + ?Sized>(&mut self, view: &V, mut work: Vec<Item>) {
        while let Some(item) = work.pop() {
            match item {
                Item::Node(id) => {
                    for rel in view.outgoing(&id) {
                        if self.add_relationship(rel.clone()) {
                            work.push(Item::Relationship(rel));
                        }
                    }
                }
                Item::Relationship(rel) => {
                    for id in [&rel.start_id, &rel.end_id] {
                        if let Some(node) = view.node(id) {
                            if self.add_node(node) {
                                work.push(Item::Node(id.clone()));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Adds a node. Returns false if it was already present.
    pub fn add_node(&mut self, node: Node) -> bool {
        if !self.node_ids.insert(node.id.clone()) {
            return false;
        }
        self.unit_count += 1;
        if let Some((_, size)) = node.file_info() {
            self.unit_count += file_units(size);
        }
        self.nodes.push(node);
        true
    }

    /// Adds a relationship. Returns false if it was already present.
    pub fn add_relationship(&mut self, relationship: Relationship) -> bool {
        if !self.relationship_ids.insert(relationship.id.clone()) {
            return false;
        }
        self.unit_count += 1;
        self.relationships.push(relationship);
        true
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Relationships in insertion order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Total progress units of the transfer.
    pub fn unit_count(&self) -> u64 {
        self.unit_count
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.nodes.len() + self.relationships.len()
    }

    /// Returns true if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_protocol::{Properties, PropertyValue, PATH_PROPERTY, SIZE_PROPERTY};
    use cloudsync_store::{GraphSnapshot, Node, Relationship};
    use proptest::prelude::*;

    fn graph(nodes: &[&str], rels: &[(&str, &str, &str)]) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::default();
        for id in nodes {
            snapshot
                .nodes
                .insert(id.to_string(), Node::new(*id, "Item", Properties::new()));
        }
        for (id, start, end) in rels {
            snapshot.relationships.insert(
                id.to_string(),
                Relationship::new(*id, "LINKS", *start, *end, Properties::new()),
            );
        }
        snapshot
    }

    #[test]
    fn file_units_round_up() {
        assert_eq!(file_units(0), 2);
        assert_eq!(file_units(1), 3);
        assert_eq!(file_units(CHUNK_SIZE as u64), 3);
        assert_eq!(file_units(CHUNK_SIZE as u64 + 1), 4);
    }

    #[test]
    fn non_recursive_node_is_alone() {
        let g = graph(&["a", "b"], &[("r1", "a", "b")]);
        let set = ExportSet::collect_node(&g, "a", false).unwrap();
        assert_eq!(set.nodes().len(), 1);
        assert!(set.relationships().is_empty());
        assert_eq!(set.unit_count(), 1);
    }

    #[test]
    fn recursive_follows_outgoing_relationships() {
        let g = graph(
            &["a", "b", "c", "unrelated"],
            &[("r1", "a", "b"), ("r2", "b", "c"), ("r3", "unrelated", "a")],
        );
        let set = ExportSet::collect_node(&g, "a", true).unwrap();
        let ids: Vec<&str> = set.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&"unrelated"));
        assert_eq!(set.relationships().len(), 2);
        assert_eq!(set.unit_count(), 5);
    }

    #[test]
    fn cycles_terminate() {
        let g = graph(&["a", "b"], &[("r1", "a", "b"), ("r2", "b", "a"), ("r3", "a", "a")]);
        let set = ExportSet::collect_node(&g, "a", true).unwrap();
        assert_eq!(set.nodes().len(), 2);
        assert_eq!(set.relationships().len(), 3);
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn relationship_root_brings_endpoints() {
        let g = graph(&["a", "b"], &[("r1", "a", "b")]);
        let set = ExportSet::collect_relationship(&g, "r1", false).unwrap();
        assert_eq!(set.relationships().len(), 1);
        assert_eq!(set.nodes().len(), 2);
    }

    #[test]
    fn file_nodes_cost_chunks() {
        let mut g = graph(&[], &[]);
        let mut props = Properties::new();
        props.insert(PATH_PROPERTY.into(), PropertyValue::from("f.bin"));
        props.insert(SIZE_PROPERTY.into(), PropertyValue::from(2 * CHUNK_SIZE as i64));
        g.nodes.insert("f".into(), Node::new("f", "File", props));

        let set = ExportSet::collect_node(&g, "f", true).unwrap();
        assert_eq!(set.unit_count(), 1 + 2 + 2);
    }

    #[test]
    fn missing_root_is_error() {
        let g = graph(&[], &[]);
        assert!(ExportSet::collect_node(&g, "nope", true).is_err());
        assert!(ExportSet::collect_relationship(&g, "nope", true).is_err());
    }

    proptest! {
        #[test]
        fn collected_entities_are_unique(
            edges in proptest::collection::vec((0u8..8, 0u8..8), 0..30),
            root in 0u8..8,
        ) {
            let names: Vec<String> = (0..8).map(|i| format!("n{i}")).collect();
            let node_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let rel_names: Vec<(String, String, String)> = edges
                .iter()
                .enumerate()
                .map(|(i, (s, e))| (format!("r{i}"), format!("n{s}"), format!("n{e}")))
                .collect();
            let rel_refs: Vec<(&str, &str, &str)> = rel_names
                .iter()
                .map(|(i, s, e)| (i.as_str(), s.as_str(), e.as_str()))
                .collect();
            let g = graph(&node_refs, &rel_refs);

            let set = ExportSet::collect_node(&g, &format!("n{root}"), true).unwrap();
            let node_ids: HashSet<&str> = set.nodes().iter().map(|n| n.id.as_str()).collect();
            let rel_ids: HashSet<&str> = set.relationships().iter().map(|r| r.id.as_str()).collect();

            prop_assert_eq!(node_ids.len(), set.nodes().len());
            prop_assert_eq!(rel_ids.len(), set.relationships().len());
            prop_assert_eq!(set.unit_count(), set.len() as u64);
            for rel in set.relationships() {
                prop_assert!(node_ids.contains(rel.start_id.as_str()));
                prop_assert!(node_ids.contains(rel.end_id.as_str()));
            }
        }
    }
}
