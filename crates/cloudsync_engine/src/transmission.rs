//! Transmission strategies.
//!
//! A [`Transmission`] decides what a client sends once the connection is
//! authenticated and a transaction has begun. The service takes care of
//! the handshake, `Begin`, draining acknowledgments and `End`.

use crate::connection::Connection;
use crate::error::{CloudError, CloudResult};
use crate::export::ExportSet;
use crate::listener::ProgressListener;
use cloudsync_protocol::{
    FileBegin, FileChunk, FileEnd, Message, NodeData, RelationshipData, CHUNK_SIZE,
};
use cloudsync_store::{BinaryStore, GraphStore, Node};
use std::future::Future;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info};

/// User name and password presented to the remote instance.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Plaintext password. Never sent; only used to derive the session key.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Drives the payload of one replication.
pub trait Transmission {
    /// What the transmission yields on success.
    type Output;

    /// Credentials to authenticate with.
    fn credentials(&self) -> &Credentials;

    /// Sends the payload on an authenticated connection inside a
    /// transaction.
    fn run(
        &mut self,
        connection: &mut Connection,
        listener: &dyn ProgressListener,
    ) -> impl Future<Output = CloudResult<Self::Output>> + Send;
}

/// What to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRoot {
    /// Start at a node.
    Node(String),
    /// Start at a relationship.
    Relationship(String),
}

/// Counts of what a push sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Nodes sent.
    pub nodes: usize,
    /// Relationships sent.
    pub relationships: usize,
    /// Files sent.
    pub files: usize,
    /// File content bytes sent.
    pub bytes: u64,
    /// Progress units consumed.
    pub units: u64,
}

/// Pushes a node or relationship, optionally with everything reachable.
pub struct PushTransmission {
    credentials: Credentials,
    root: PushRoot,
    recursive: bool,
    graph: Arc<dyn GraphStore>,
    binaries: Arc<dyn BinaryStore>,
}

impl PushTransmission {
    /// Creates a push of `root` read from the given stores.
    pub fn new(
        credentials: Credentials,
        root: PushRoot,
        graph: Arc<dyn GraphStore>,
        binaries: Arc<dyn BinaryStore>,
    ) -> Self {
        Self {
            credentials,
            root,
            recursive: false,
            graph,
            binaries,
        }
    }

    /// Also pushes everything reachable from the root.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Collects the export set from the source graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the root does not exist.
    pub fn collect(&self) -> CloudResult<ExportSet> {
        let view = self.graph.begin()?;
        match &self.root {
            PushRoot::Node(id) => ExportSet::collect_node(view.as_ref(), id, self.recursive),
            PushRoot::Relationship(id) => {
                ExportSet::collect_relationship(view.as_ref(), id, self.recursive)
            }
        }
    }
}

struct Progress<'a> {
    listener: &'a dyn ProgressListener,
    current: u64,
    total: u64,
}

impl Progress<'_> {
    fn advance(&mut self) {
        self.current += 1;
        self.listener.progress(self.current.min(self.total), self.total);
    }
}

impl PushTransmission {
    async fn send_file(
        &self,
        connection: &Connection,
        node: &Node,
        path: &str,
        size: u64,
        progress: &mut Progress<'_>,
    ) -> CloudResult<u64> {
        let mut reader = self.binaries.open_read(path)?;
        connection
            .send(Message::FileBegin(FileBegin::new(node.id.clone(), size)))
            .await?;
        progress.advance();

        let mut sent = 0u64;
        let mut sequence = 0u64;
        loop {
            let chunk = read_chunk(reader.as_mut())?;
            if chunk.is_empty() {
                break;
            }
            sent += chunk.len() as u64;
            connection
                .send(Message::FileChunk(FileChunk::new(node.id.clone(), sequence, chunk)))
                .await?;
            sequence += 1;
            progress.advance();
        }

        connection
            .send(Message::FileEnd(FileEnd::new(node.id.clone())))
            .await?;
        progress.advance();
        debug!(source_id = %node.id, path, bytes = sent, chunks = sequence, "file sent");
        Ok(sent)
    }
}

/// Reads up to one chunk, short only at end of content.
fn read_chunk(reader: &mut (dyn Read + Send)) -> CloudResult<Vec<u8>> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut filled = 0;
    while filled < CHUNK_SIZE {
        let n = reader.read(&mut chunk[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

impl Transmission for PushTransmission {
    type Output = PushSummary;

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn run(
        &mut self,
        connection: &mut Connection,
        listener: &dyn ProgressListener,
    ) -> CloudResult<PushSummary> {
        let set = self.collect()?;
        let mut progress = Progress {
            listener,
            current: 0,
            total: set.unit_count(),
        };
        let mut summary = PushSummary::default();

        for node in set.nodes() {
            connection
                .send(Message::NodeData(NodeData::new(
                    node.id.clone(),
                    node.node_type.clone(),
                    node.properties.clone(),
                )))
                .await?;
            summary.nodes += 1;
            progress.advance();

            if let Some((path, size)) = node.file_info() {
                summary.bytes += self
                    .send_file(connection, node, path, size, &mut progress)
                    .await?;
                summary.files += 1;
            }
        }

        for rel in set.relationships() {
            connection
                .send(Message::RelationshipData(RelationshipData::new(
                    rel.id.clone(),
                    rel.relationship_type.clone(),
                    rel.start_id.clone(),
                    rel.end_id.clone(),
                    rel.properties.clone(),
                )))
                .await?;
            summary.relationships += 1;
            progress.advance();
        }

        summary.units = progress.current;
        info!(
            peer = %connection.peer(),
            nodes = summary.nodes,
            relationships = summary.relationships,
            files = summary.files,
            "push sent"
        );
        Ok(summary)
    }
}

/// Asks the remote instance for the names of its pages.
#[derive(Debug, Clone)]
pub struct ListPagesTransmission {
    credentials: Credentials,
}

impl ListPagesTransmission {
    /// Creates a page listing.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl Transmission for ListPagesTransmission {
    type Output = Vec<String>;

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn run(
        &mut self,
        connection: &mut Connection,
        listener: &dyn ProgressListener,
    ) -> CloudResult<Vec<String>> {
        connection.send(Message::ListPagesRequest).await?;
        let timeout = connection.config().round_trip_timeout;
        let frame = connection.wait_for_message("page listing", timeout).await?;
        match frame.message {
            Message::ListPagesResponse(response) => {
                listener.progress(1, 1);
                Ok(response.names)
            }
            other => Err(CloudError::Protocol(format!(
                "expected page listing, got {:?}",
                other.tag()
            ))),
        }
    }
}
