//! Push command implementation.

use super::open_data;
use cloudsync_engine::{
    CloudConfig, CloudService, ConnectionConfig, Credentials, LoggingListener, PushRoot,
    PushTransmission,
};
use cloudsync_store::MemoryCredentialStore;
use std::path::Path;
use std::sync::Arc;

/// What to push and how.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Root entity id.
    pub root: String,
    /// The root is a relationship rather than a node.
    pub relationship: bool,
    /// Push everything reachable from the root.
    pub recursive: bool,
    /// Maximum unacknowledged messages.
    pub max_in_flight: usize,
}

/// Runs the push command.
pub async fn run(
    data: &Path,
    host: &str,
    user: &str,
    password: &str,
    options: PushOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (graph, binaries) = open_data(data)?;
    let graph = Arc::new(graph);
    let binaries = Arc::new(binaries);

    let config = CloudConfig::new().with_connection(
        ConnectionConfig::new().with_max_in_flight(options.max_in_flight),
    );
    let service = CloudService::new(
        config,
        graph.clone(),
        binaries.clone(),
        Arc::new(MemoryCredentialStore::new()),
    );

    let root = if options.relationship {
        PushRoot::Relationship(options.root.clone())
    } else {
        PushRoot::Node(options.root.clone())
    };
    let mut push = PushTransmission::new(Credentials::new(user, password), root, graph, binaries)
        .with_recursive(options.recursive);

    let listener = LoggingListener::new(format!("push {} to {host}", options.root));
    let summary = service
        .replicate(&mut push, host, &listener)
        .await
        .map_err(|err| format!("{}: {err}", err.user_message()))?;

    println!(
        "Pushed {} nodes, {} relationships, {} files ({} bytes) to {host}",
        summary.nodes, summary.relationships, summary.files, summary.bytes
    );
    Ok(())
}
