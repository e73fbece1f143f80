//! # CloudSync Store
//!
//! The collaborators the replication protocol calls into, as traits with
//! reference implementations.
//!
//! ## Collaborators
//!
//! - [`GraphStore`] - transactional node/relationship storage
//! - [`CredentialStore`] - username to password hash and salt
//! - [`BinaryStore`] - temporary sinks finalized at a relative path
//!
//! ## Available Implementations
//!
//! - [`MemoryGraphStore`] - in memory, optionally persisted to a CBOR file on commit
//! - [`MemoryCredentialStore`] - for tests and small deployments
//! - [`FsBinaryStore`] - files under a root directory
//! - [`MemoryBinaryStore`] - for testing
//!
//! ## Example
//!
//! ```rust
//! use cloudsync_store::{GraphStore, GraphView, MemoryGraphStore};
//! use cloudsync_protocol::Properties;
//!
//! let store = MemoryGraphStore::new();
//! let mut tx = store.begin().unwrap();
//! let node = tx.create_node(Some("n1"), "Item", Properties::new()).unwrap();
//! tx.commit().unwrap();
//!
//! let tx = store.begin().unwrap();
//! assert_eq!(tx.node("n1").unwrap().id, node.id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod binary;
mod credentials;
mod error;
mod graph;
mod memory;

pub use binary::{BinarySink, BinaryStore, FsBinaryStore, MemoryBinaryStore};
pub use credentials::{password_hash, CredentialRecord, CredentialStore, MemoryCredentialStore};
pub use error::{StoreError, StoreResult};
pub use graph::{GraphStore, GraphTransaction, GraphView, Node, Relationship};
pub use memory::{GraphSnapshot, MemoryGraphStore};
