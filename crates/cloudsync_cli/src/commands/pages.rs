//! Pages command implementation.

use cloudsync_engine::{
    CloudConfig, CloudService, Credentials, ListPagesTransmission, NoopListener,
};
use cloudsync_store::{MemoryBinaryStore, MemoryCredentialStore, MemoryGraphStore};
use std::sync::Arc;

/// Runs the pages command.
pub async fn run(host: &str, user: &str, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    // Listing reads nothing locally.
    let service = CloudService::new(
        CloudConfig::new(),
        Arc::new(MemoryGraphStore::new()),
        Arc::new(MemoryBinaryStore::new()),
        Arc::new(MemoryCredentialStore::new()),
    );

    let mut listing = ListPagesTransmission::new(Credentials::new(user, password));
    let names = service
        .replicate(&mut listing, host, &NoopListener)
        .await
        .map_err(|err| format!("{}: {err}", err.user_message()))?;

    if names.is_empty() {
        println!("No pages on {host}");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
