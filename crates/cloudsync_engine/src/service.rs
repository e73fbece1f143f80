//! The replication service.
//!
//! One [`CloudService`] serves inbound sessions and dials outbound
//! replications against the same collaborators and key cache.

use crate::config::CloudConfig;
use crate::connection::Connection;
use crate::crypto::{negotiate_key_bits, KeyCache, Role, SessionKey};
use crate::error::{CloudError, CloudResult};
use crate::listener::ProgressListener;
use crate::session::ServerState;
use crate::transmission::{Credentials, Transmission};
use cloudsync_protocol::{
    AuthenticationRequest, AuthenticationResponse, Frame, Message, PROTOCOL_VERSION,
};
use cloudsync_store::{password_hash, BinaryStore, CredentialStore, GraphStore};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Serves and dials replication sessions.
#[derive(Clone)]
pub struct CloudService {
    config: CloudConfig,
    graph: Arc<dyn GraphStore>,
    binaries: Arc<dyn BinaryStore>,
    credentials: Arc<dyn CredentialStore>,
    keys: Arc<KeyCache>,
}

impl CloudService {
    /// Creates a service over the given collaborators.
    pub fn new(
        config: CloudConfig,
        graph: Arc<dyn GraphStore>,
        binaries: Arc<dyn BinaryStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            graph,
            binaries,
            credentials,
            keys: Arc::new(KeyCache::new()),
        }
    }

    /// Service settings.
    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// Session keys derived for accepted sessions.
    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    /// Binds the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Transport`] if the address cannot be bound.
    pub async fn bind(&self) -> CloudResult<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_address).await?;
        Ok(listener)
    }

    /// Accepts connections until `shutdown` turns true or its sender is
    /// dropped. Each connection runs in its own task.
    ///
    /// # Errors
    ///
    /// Never fails once running; accept errors are logged and skipped.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> CloudResult<()> {
        info!(address = ?listener.local_addr().ok(), "replication service listening");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!(peer = %addr, error = %err, "failed to disable nagle");
                        }
                        let service = self.clone();
                        tokio::spawn(async move {
                            service.serve_connection(stream, addr.to_string()).await;
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
            }
        }
        info!("replication service stopped");
        Ok(())
    }

    /// Runs one server session on an accepted stream until it ends.
    pub async fn serve_connection<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut connection =
            match Connection::start(stream, Role::Server, peer.clone(), self.config.connection.clone()) {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "failed to start session");
                    return;
                }
            };
        info!(peer = %peer, "session opened");

        let mut state = ServerState::new(Arc::clone(&self.graph), Arc::clone(&self.binaries), peer.clone());

        loop {
            let Frame { sequence, message } = match connection.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "session failed");
                    break;
                }
            };

            let outcome = match message {
                Message::AuthenticationRequest(request) if state.principal().is_none() => {
                    match self.authenticate(&connection, request).await {
                        Ok(user) => {
                            state.authenticate(user);
                            continue;
                        }
                        Err(err) => {
                            warn!(peer = %peer, error = %err, "authentication rejected");
                            break;
                        }
                    }
                }
                message => state.process(Frame::new(sequence, message)),
            };

            let mut sent = true;
            for reply in outcome.replies {
                if let Err(err) = connection.send(reply).await {
                    debug!(peer = %peer, error = %err, "reply not sent");
                    sent = false;
                    break;
                }
            }
            if outcome.close || !sent {
                break;
            }
        }

        state.shutdown();
        connection.shutdown().await;
        info!(peer = %peer, "session closed");
    }

    /// Answers an authentication request and switches both directions to
    /// the session key.
    ///
    /// An error means the session must close without a response.
    async fn authenticate(
        &self,
        connection: &Connection,
        request: AuthenticationRequest,
    ) -> CloudResult<String> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(CloudError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: request.protocol_version,
            });
        }
        let record = self
            .credentials
            .authenticate(&request.username)
            .ok_or_else(|| CloudError::authentication(format!("unknown user {}", request.username)))?;
        let key_bits = negotiate_key_bits(request.key_bits, self.config.max_key_bits)
            .ok_or_else(|| {
                CloudError::authentication(format!("key size {} too weak", request.key_bits))
            })?;

        let key = self.keys.session_key(&record.password_hash, key_bits)?;
        let key_check = key.key_check()?;

        // Every client frame after the response is sealed with the session key.
        connection.rekey_inbound(&key)?;
        connection
            .send(Message::AuthenticationResponse(AuthenticationResponse::new(
                record.salt.clone(),
                key_bits,
                key_check,
            )))
            .await?;
        connection.rekey_outbound(key).await?;
        debug!(peer = %connection.peer(), key_bits, "session key established");
        Ok(record.username)
    }

    /// Runs the client side of the handshake.
    async fn handshake(&self, connection: &mut Connection, credentials: &Credentials) -> CloudResult<()> {
        connection
            .send(Message::AuthenticationRequest(AuthenticationRequest::new(
                credentials.username.clone(),
                self.config.max_key_bits,
            )))
            .await?;

        let frame = match connection
            .wait_for_message("authentication response", self.config.auth_timeout)
            .await
        {
            Ok(frame) => frame,
            Err(CloudError::ConnectionClosed) => {
                return Err(CloudError::authentication("server closed the connection"))
            }
            Err(CloudError::Timeout { .. }) => {
                return Err(CloudError::authentication("no response from server"))
            }
            Err(err) => return Err(err),
        };

        let Message::AuthenticationResponse(response) = frame.message else {
            return Err(CloudError::Protocol(format!(
                "expected authentication response, got {:?}",
                frame.message.tag()
            )));
        };
        if response.key_bits > self.config.max_key_bits {
            return Err(CloudError::Protocol(format!(
                "server chose {} bit keys, offered at most {}",
                response.key_bits, self.config.max_key_bits
            )));
        }

        // Dials derive afresh; only accepted sessions share the cache.
        let hash = password_hash(&credentials.password, response.salt.as_deref());
        let key = SessionKey::derive(&hash, response.key_bits)?;
        if !key.verify_key_check(&response.key_check) {
            return Err(CloudError::authentication("wrong password"));
        }

        connection.rekey_inbound(&key)?;
        connection.rekey_outbound(key).await?;
        debug!(peer = %connection.peer(), key_bits = response.key_bits, "session key established");
        Ok(())
    }

    /// Dials `host` and runs `transmission`.
    ///
    /// # Errors
    ///
    /// Returns the first error of dialing, the handshake or the
    /// transmission. The listener sees `aborted` before the error returns.
    pub async fn replicate<T>(
        &self,
        transmission: &mut T,
        host: &str,
        listener: &dyn ProgressListener,
    ) -> CloudResult<T::Output>
    where
        T: Transmission,
    {
        listener.started();
        let result = match Connection::connect(host, self.config.connection.clone()).await {
            Ok(connection) => self.drive(connection, transmission, listener).await,
            Err(err) => Err(err),
        };
        report(listener, &result);
        result
    }

    /// Runs `transmission` on an established client connection.
    ///
    /// # Errors
    ///
    /// See [`replicate`](Self::replicate).
    pub async fn replicate_on<T>(
        &self,
        connection: Connection,
        transmission: &mut T,
        listener: &dyn ProgressListener,
    ) -> CloudResult<T::Output>
    where
        T: Transmission,
    {
        listener.started();
        let result = self.drive(connection, transmission, listener).await;
        report(listener, &result);
        result
    }

    async fn drive<T>(
        &self,
        mut connection: Connection,
        transmission: &mut T,
        listener: &dyn ProgressListener,
    ) -> CloudResult<T::Output>
    where
        T: Transmission,
    {
        let result = async {
            self.handshake(&mut connection, transmission.credentials()).await?;
            connection.send(Message::Begin).await?;
            let output = transmission.run(&mut connection, listener).await?;

            let round_trip = self.config.connection.round_trip_timeout;
            connection.drain(round_trip).await?;
            connection.send(Message::End).await?;
            if !connection.wait_for_close(self.config.close_timeout).await {
                warn!(peer = %connection.peer(), "server did not close after end");
            }
            Ok(output)
        }
        .await;

        connection.shutdown().await;
        result
    }
}

fn report<O>(listener: &dyn ProgressListener, result: &CloudResult<O>) {
    match result {
        Ok(_) => listener.finished(),
        Err(err) => listener.aborted(err),
    }
}

impl std::fmt::Debug for CloudService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudService")
            .field("config", &self.config)
            .field("cached_keys", &self.keys.len())
            .finish()
    }
}
