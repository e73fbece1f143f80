//! Serve command implementation.

use super::{open_data, CliError};
use cloudsync_engine::{CloudConfig, CloudService};
use cloudsync_store::MemoryCredentialStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Splits a `NAME:PASSWORD` argument at the first colon.
pub fn parse_user(arg: &str) -> Result<(&str, &str), CliError> {
    match arg.split_once(':') {
        Some((name, password)) if !name.is_empty() => Ok((name, password)),
        _ => Err(CliError::InvalidUser(arg.to_string())),
    }
}

/// Runs the serve command until Ctrl-C.
pub async fn run(
    data: &Path,
    bind: SocketAddr,
    users: &[String],
    max_key_bits: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = MemoryCredentialStore::new();
    for arg in users {
        let (name, password) = parse_user(arg)?;
        credentials.add_user(name, password);
    }

    let (graph, binaries) = open_data(data)?;
    let config = CloudConfig::new()
        .with_bind_address(bind)
        .with_max_key_bits(max_key_bits);
    let service = CloudService::new(
        config,
        Arc::new(graph),
        Arc::new(binaries),
        Arc::new(credentials),
    );

    let listener = service.bind().await?;
    info!(data = %data.display(), users = users.len(), "serving");

    let (stop, stopped) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => warn!(error = %err, "cannot listen for interrupt"),
        }
        let _ = stop.send(true);
    });

    service.serve(listener, stopped).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_splits_at_first_colon() {
        assert_eq!(parse_user("admin:pa:ss").unwrap(), ("admin", "pa:ss"));
        assert_eq!(parse_user("guest:").unwrap(), ("guest", ""));
    }

    #[test]
    fn malformed_user_rejected() {
        assert!(parse_user("admin").is_err());
        assert!(parse_user(":secret").is_err());
    }
}
