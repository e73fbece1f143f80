//! CLI command implementations.

pub mod import;
pub mod inspect;
pub mod pages;
pub mod push;
pub mod serve;

use cloudsync_store::{FsBinaryStore, MemoryGraphStore, StoreResult};
use std::path::Path;

/// Graph snapshot file inside the data directory.
pub const GRAPH_FILE: &str = "graph.cbor";

/// File content directory inside the data directory.
pub const FILES_DIR: &str = "files";

/// Errors raised by the CLI itself rather than the libraries it drives.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A `--user` value was not `NAME:PASSWORD`.
    #[error("invalid user {0:?}, expected NAME:PASSWORD")]
    InvalidUser(String),

    /// The import file could not be understood.
    #[error("invalid import file: {0}")]
    Import(String),
}

/// Opens the graph and file stores of a data directory.
pub fn open_data(dir: &Path) -> StoreResult<(MemoryGraphStore, FsBinaryStore)> {
    let graph = MemoryGraphStore::open(&dir.join(GRAPH_FILE))?;
    let binaries = FsBinaryStore::open(&dir.join(FILES_DIR))?;
    Ok((graph, binaries))
}
