//! Graph store traits and entity types.

use crate::error::StoreResult;
use cloudsync_protocol::{Properties, PATH_PROPERTY, SIZE_PROPERTY};
use serde::{Deserialize, Serialize};

/// A node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier.
    pub id: String,
    /// Node type.
    pub node_type: String,
    /// Node properties.
    pub properties: Properties,
}

impl Node {
    /// Creates a node.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, properties: Properties) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            properties,
        }
    }

    /// Returns a text property.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_text())
    }

    /// Returns the relative content path and size if this node carries a file.
    pub fn file_info(&self) -> Option<(&str, u64)> {
        let path = self.text(PATH_PROPERTY)?;
        let size = self.properties.get(SIZE_PROPERTY)?.as_integer()?;
        u64::try_from(size).ok().map(|size| (path, size))
    }
}

/// A directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier.
    pub id: String,
    /// Relationship type.
    pub relationship_type: String,
    /// Start node id.
    pub start_id: String,
    /// End node id.
    pub end_id: String,
    /// Relationship properties.
    pub properties: Properties,
}

impl Relationship {
    /// Creates a relationship.
    pub fn new(
        id: impl Into<String>,
        relationship_type: impl Into<String>,
        start_id: impl Into<String>,
        end_id: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            id: id.into(),
            relationship_type: relationship_type.into(),
            start_id: start_id.into(),
            end_id: end_id.into(),
            properties,
        }
    }
}

/// Read access to a graph.
pub trait GraphView {
    /// Looks up a node by id.
    fn node(&self, id: &str) -> Option<Node>;

    /// Looks up a relationship by id.
    fn relationship(&self, id: &str) -> Option<Relationship>;

    /// Returns the relationships starting at the given node, ordered by id.
    fn outgoing(&self, node_id: &str) -> Vec<Relationship>;

    /// Returns all nodes of the given type, ordered by id.
    fn nodes_of_type(&self, node_type: &str) -> Vec<Node>;
}

/// A transaction on a graph store.
///
/// Writes are only visible to other transactions after [`commit`].
/// Dropping a transaction without committing discards its writes.
///
/// [`commit`]: GraphTransaction::commit
pub trait GraphTransaction: GraphView + Send {
    /// Creates a node. A `None` id lets the store generate one.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the given id already exists.
    fn create_node(
        &mut self,
        id: Option<&str>,
        node_type: &str,
        properties: Properties,
    ) -> StoreResult<Node>;

    /// Merges properties into an existing node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    fn update_node(&mut self, id: &str, properties: Properties) -> StoreResult<Node>;

    /// Creates a relationship between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint is missing or the id is taken.
    fn create_relationship(
        &mut self,
        id: Option<&str>,
        relationship_type: &str,
        start_id: &str,
        end_id: &str,
        properties: Properties,
    ) -> StoreResult<Relationship>;

    /// Merges properties into an existing relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if the relationship does not exist.
    fn update_relationship(&mut self, id: &str, properties: Properties)
        -> StoreResult<Relationship>;

    /// Makes all writes of this transaction durable and visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the writes cannot be persisted.
    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// A transactional graph store.
pub trait GraphStore: Send + Sync {
    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn begin(&self) -> StoreResult<Box<dyn GraphTransaction>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_protocol::PropertyValue;

    #[test]
    fn file_info_requires_path_and_size() {
        let mut props = Properties::new();
        props.insert(PATH_PROPERTY.into(), PropertyValue::from("docs/a.txt"));
        let node = Node::new("n1", "File", props.clone());
        assert_eq!(node.file_info(), None);

        props.insert(SIZE_PROPERTY.into(), PropertyValue::from(1024i64));
        let node = Node::new("n1", "File", props.clone());
        assert_eq!(node.file_info(), Some(("docs/a.txt", 1024)));

        props.insert(SIZE_PROPERTY.into(), PropertyValue::from(-1i64));
        let node = Node::new("n1", "File", props);
        assert_eq!(node.file_info(), None);
    }
}
