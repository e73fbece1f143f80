//! Server-side session state.
//!
//! [`ServerState`] is the per-connection context that inbound messages
//! mutate: the authenticated principal, the open graph transaction, the
//! source-to-target id remap table and the file reassembly table. It is
//! owned by one session loop and never shared.
//!
//! ## States
//!
//! ```text
//! unauthenticated -> authenticated/idle -> in-transaction -> closed
//! ```
//!
//! Records that reference something this session does not know (an
//! unresolved relationship endpoint, a chunk for an unknown container)
//! are logged and dropped; the session continues.

use crate::error::{CloudError, CloudResult};
use cloudsync_protocol::{
    AckData, FileBegin, FileChunk, FileEnd, Frame, ListPagesResponse, Message, NodeData,
    RelationshipData, CHUNK_SIZE, MAX_IN_FLIGHT, NAME_PROPERTY, PAGE_TYPE, PATH_PROPERTY,
};
use cloudsync_store::{
    BinarySink, BinaryStore, GraphStore, GraphTransaction, GraphView, StoreError, StoreResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Most chunks one assembly holds ahead of a gap.
pub const MAX_PENDING_CHUNKS: usize = MAX_IN_FLIGHT;

/// Reassembles the chunks of one file.
///
/// The next expected chunk is appended immediately; chunks that arrive
/// early are held until the gap before them closes. Chunks that were
/// already appended are ignored.
///
/// An early chunk is only held if its sequence fits the declared size and
/// fewer than [`MAX_PENDING_CHUNKS`] are already waiting. Anything else is
/// dropped and the file can no longer be finished.
pub struct FileAssembly {
    container_id: String,
    declared_size: u64,
    sink: Box<dyn BinarySink>,
    next_sequence: u64,
    pending: BTreeMap<u64, Vec<u8>>,
    rejected: u64,
}

impl FileAssembly {
    /// Opens an assembly writing into `sink`.
    pub fn new(container_id: impl Into<String>, declared_size: u64, sink: Box<dyn BinarySink>) -> Self {
        Self {
            container_id: container_id.into(),
            declared_size,
            sink,
            next_sequence: 0,
            pending: BTreeMap::new(),
            rejected: 0,
        }
    }

    /// Highest sequence the declared size allows. An empty file still
    /// takes one chunk.
    pub fn last_sequence(&self) -> u64 {
        self.declared_size.div_ceil(CHUNK_SIZE as u64).max(1) - 1
    }

    /// Accepts chunk `sequence`. Chunk sequences start at 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink rejects the bytes.
    pub fn accept(&mut self, sequence: u64, data: Vec<u8>) -> StoreResult<()> {
        if sequence < self.next_sequence {
            debug!(container_id = %self.container_id, sequence, "duplicate chunk ignored");
            return Ok(());
        }
        if sequence > self.next_sequence {
            if self.pending.contains_key(&sequence) {
                return Ok(());
            }
            if sequence > self.last_sequence() || self.pending.len() >= MAX_PENDING_CHUNKS {
                warn!(
                    container_id = %self.container_id,
                    sequence,
                    last = self.last_sequence(),
                    held = self.pending.len(),
                    "early chunk out of bounds, dropped"
                );
                self.rejected += 1;
                return Ok(());
            }
            self.pending.insert(sequence, data);
            return Ok(());
        }

        self.sink.append(&data)?;
        self.next_sequence += 1;
        while let Some(data) = self.pending.remove(&self.next_sequence) {
            self.sink.append(&data)?;
            self.next_sequence += 1;
        }
        Ok(())
    }

    /// Bytes appended in order so far.
    pub fn written(&self) -> u64 {
        self.sink.written()
    }

    /// Returns true if a chunk is waiting for an earlier one.
    pub fn has_gaps(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Chunks held ahead of a gap.
    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    /// Early chunks dropped for being out of bounds.
    pub fn rejected_chunks(&self) -> u64 {
        self.rejected
    }

    /// Size announced by `FileBegin`.
    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Persists the content at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Incomplete`] if chunks are missing before
    /// ones that arrived or were dropped, or the store's error if
    /// persisting fails.
    pub fn finish(self, path: &str) -> StoreResult<u64> {
        if self.rejected > 0 {
            return Err(StoreError::Incomplete(format!(
                "container {} dropped {} chunks",
                self.container_id, self.rejected
            )));
        }
        if self.has_gaps() {
            let missing = self.next_sequence;
            return Err(StoreError::Incomplete(format!(
                "container {} is missing chunk {missing}",
                self.container_id
            )));
        }
        let written = self.sink.written();
        if written != self.declared_size {
            warn!(
                container_id = %self.container_id,
                declared = self.declared_size,
                written,
                "file size differs from declared size"
            );
        }
        self.sink.finalize(path)?;
        Ok(written)
    }
}

impl std::fmt::Debug for FileAssembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAssembly")
            .field("container_id", &self.container_id)
            .field("declared_size", &self.declared_size)
            .field("next_sequence", &self.next_sequence)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// What the session loop should do after one message.
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    /// Messages to send back, in order.
    pub replies: Vec<Message>,
    /// Close the connection once the replies are queued.
    pub close: bool,
}

impl Outcome {
    fn reply(message: Message) -> Self {
        Self {
            replies: vec![message],
            close: false,
        }
    }

    fn close() -> Self {
        Self {
            replies: Vec::new(),
            close: true,
        }
    }
}

/// Per-connection server state.
pub struct ServerState {
    graph: Arc<dyn GraphStore>,
    binaries: Arc<dyn BinaryStore>,
    principal: Option<String>,
    transaction: Option<Box<dyn GraphTransaction>>,
    id_remap: HashMap<String, String>,
    files: HashMap<String, FileAssembly>,
    peer: String,
}

impl ServerState {
    /// Creates unauthenticated state for a new connection.
    pub fn new(
        graph: Arc<dyn GraphStore>,
        binaries: Arc<dyn BinaryStore>,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            binaries,
            principal: None,
            transaction: None,
            id_remap: HashMap::new(),
            files: HashMap::new(),
            peer: peer.into(),
        }
    }

    /// Marks the session as authenticated.
    pub fn authenticate(&mut self, principal: impl Into<String>) {
        let principal = principal.into();
        info!(peer = %self.peer, user = %principal, "session authenticated");
        self.principal = Some(principal);
    }

    /// The authenticated user, if any.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Returns true while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Target id recorded for a source id.
    pub fn remapped(&self, source_id: &str) -> Option<&str> {
        self.id_remap.get(source_id).map(String::as_str)
    }

    /// Number of files being reassembled.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// Processes one inbound frame.
    ///
    /// Never fails: per-message errors are logged and the record dropped.
    /// Authentication requests are handled by the session loop before
    /// they reach this method.
    pub fn process(&mut self, frame: Frame) -> Outcome {
        let Frame { sequence, message } = frame;
        let tag = message.tag();

        if self.principal.is_none() {
            warn!(peer = %self.peer, ?tag, "message before authentication, closing");
            return Outcome::close();
        }

        let acked = message.expects_ack();
        let mut outcome = match message {
            Message::Begin => {
                self.begin();
                Outcome::default()
            }
            Message::End => {
                self.end();
                return Outcome::close();
            }
            Message::NodeData(node) => {
                self.contain(|state| state.node_data(node));
                Outcome::default()
            }
            Message::RelationshipData(rel) => {
                self.contain(|state| state.relationship_data(rel));
                Outcome::default()
            }
            Message::FileBegin(file) => {
                self.contain(|state| state.file_begin(file));
                Outcome::default()
            }
            Message::FileChunk(chunk) => {
                self.contain(|state| state.file_chunk(chunk));
                Outcome::default()
            }
            Message::FileEnd(file) => {
                self.contain(|state| state.file_end(file));
                Outcome::default()
            }
            Message::ListPagesRequest => match self.list_pages() {
                Ok(names) => Outcome::reply(Message::ListPagesResponse(ListPagesResponse::new(names))),
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "page listing failed");
                    Outcome::reply(Message::ListPagesResponse(ListPagesResponse::new(Vec::new())))
                }
            },
            Message::AuthenticationRequest(_) => {
                warn!(peer = %self.peer, "repeated authentication request ignored");
                Outcome::default()
            }
            Message::Ack(_) | Message::AuthenticationResponse(_) | Message::ListPagesResponse(_) => {
                warn!(peer = %self.peer, ?tag, "unexpected message ignored");
                Outcome::default()
            }
        };

        if acked {
            outcome
                .replies
                .push(Message::Ack(AckData::new(tag, sequence)));
        }
        outcome
    }

    fn contain(&mut self, handler: impl FnOnce(&mut Self) -> CloudResult<()>) {
        if let Err(err) = handler(self) {
            warn!(peer = %self.peer, error = %err, "record dropped");
        }
    }

    fn begin(&mut self) {
        if self.transaction.is_some() {
            warn!(peer = %self.peer, "begin while a transaction is open, ignored");
            return;
        }
        match self.graph.begin() {
            Ok(tx) => {
                debug!(peer = %self.peer, "transaction opened");
                self.transaction = Some(tx);
            }
            Err(err) => error!(peer = %self.peer, error = %err, "failed to open transaction"),
        }
    }

    fn end(&mut self) {
        if let Some(tx) = self.transaction.take() {
            match tx.commit() {
                Ok(()) => info!(
                    peer = %self.peer,
                    entities = self.id_remap.len(),
                    "transaction committed"
                ),
                Err(err) => error!(peer = %self.peer, error = %err, "commit failed"),
            }
        } else {
            warn!(peer = %self.peer, "end without an open transaction");
        }
        self.clear();
    }

    /// Drops the open transaction and all per-transaction tables.
    pub fn shutdown(&mut self) {
        if self.transaction.take().is_some() {
            info!(peer = %self.peer, "open transaction rolled back");
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.id_remap.clear();
        self.files.clear();
    }

    fn transaction(&mut self) -> CloudResult<&mut (dyn GraphTransaction + 'static)> {
        self.transaction
            .as_deref_mut()
            .ok_or_else(|| CloudError::Protocol("no open transaction".into()))
    }

    fn node_data(&mut self, node: NodeData) -> CloudResult<()> {
        let NodeData {
            source_id,
            node_type,
            properties,
        } = node;
        let tx = self.transaction()?;
        let target = if tx.node(&source_id).is_some() {
            tx.update_node(&source_id, properties)?
        } else {
            tx.create_node(Some(&source_id), &node_type, properties)?
        };
        debug!(source_id = %source_id, target_id = %target.id, "node stored");
        self.id_remap.insert(source_id, target.id);
        Ok(())
    }

    fn relationship_data(&mut self, rel: RelationshipData) -> CloudResult<()> {
        let (Some(start), Some(end)) = (
            self.id_remap.get(&rel.source_start_id).cloned(),
            self.id_remap.get(&rel.source_end_id).cloned(),
        ) else {
            warn!(
                relationship_id = %rel.relationship_id,
                start = %rel.source_start_id,
                end = %rel.source_end_id,
                "relationship endpoint unresolved, dropped"
            );
            return Ok(());
        };

        let tx = self.transaction()?;
        if tx.relationship(&rel.relationship_id).is_some() {
            tx.update_relationship(&rel.relationship_id, rel.properties)?;
        } else {
            tx.create_relationship(
                Some(&rel.relationship_id),
                &rel.relationship_type,
                &start,
                &end,
                rel.properties,
            )?;
        }
        debug!(relationship_id = %rel.relationship_id, "relationship stored");
        Ok(())
    }

    fn file_begin(&mut self, file: FileBegin) -> CloudResult<()> {
        self.transaction()?;
        let sink = self.binaries.open_temp()?;
        debug!(container_id = %file.source_id, size = file.declared_size, "file transfer opened");
        let assembly = FileAssembly::new(file.source_id.clone(), file.declared_size, sink);
        if self.files.insert(file.source_id.clone(), assembly).is_some() {
            warn!(container_id = %file.source_id, "file transfer restarted");
        }
        Ok(())
    }

    fn file_chunk(&mut self, chunk: FileChunk) -> CloudResult<()> {
        let Some(assembly) = self.files.get_mut(&chunk.container_id) else {
            warn!(
                container_id = %chunk.container_id,
                sequence = chunk.sequence,
                "chunk for unknown container dropped"
            );
            return Ok(());
        };
        assembly.accept(chunk.sequence, chunk.data)?;
        Ok(())
    }

    fn file_end(&mut self, file: FileEnd) -> CloudResult<()> {
        let Some(assembly) = self.files.remove(&file.container_id) else {
            warn!(container_id = %file.container_id, "end of unknown container dropped");
            return Ok(());
        };
        let target_id = self
            .id_remap
            .get(&file.container_id)
            .cloned()
            .ok_or_else(|| {
                CloudError::Protocol(format!("file node {} unresolved", file.container_id))
            })?;
        let path = self
            .transaction()?
            .node(&target_id)
            .and_then(|node| node.text(PATH_PROPERTY).map(str::to_string))
            .ok_or_else(|| CloudError::Protocol(format!("node {target_id} has no file path")))?;

        let written = assembly.finish(&path)?;
        info!(container_id = %file.container_id, path = %path, bytes = written, "file stored");
        Ok(())
    }

    fn list_pages(&self) -> CloudResult<Vec<String>> {
        let pages = match self.transaction.as_deref() {
            Some(tx) => tx.nodes_of_type(PAGE_TYPE),
            None => self.graph.begin()?.nodes_of_type(PAGE_TYPE),
        };
        let mut names: Vec<String> = pages
            .iter()
            .filter_map(|node| node.text(NAME_PROPERTY).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl Drop for ServerState {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("peer", &self.peer)
            .field("principal", &self.principal)
            .field("in_transaction", &self.transaction.is_some())
            .field("remapped", &self.id_remap.len())
            .field("files", &self.files.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_protocol::{MessageTag, Properties, PropertyValue, SIZE_PROPERTY};
    use cloudsync_store::{MemoryBinaryStore, MemoryGraphStore};
    use proptest::prelude::*;

    fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn state() -> (ServerState, MemoryGraphStore, MemoryBinaryStore) {
        let graph = MemoryGraphStore::new();
        let binaries = MemoryBinaryStore::new();
        let mut state = ServerState::new(
            Arc::new(graph.clone()),
            Arc::new(binaries.clone()),
            "test",
        );
        state.authenticate("admin");
        (state, graph, binaries)
    }

    fn frame(sequence: u64, message: Message) -> Frame {
        Frame::new(sequence, message)
    }

    fn node(id: &str, pairs: &[(&str, PropertyValue)]) -> Message {
        Message::NodeData(NodeData::new(id, "Item", props(pairs)))
    }

    fn rel(id: &str, start: &str, end: &str) -> Message {
        Message::RelationshipData(RelationshipData::new(id, "LINKS", start, end, Properties::new()))
    }

    #[test]
    fn unauthenticated_messages_close() {
        let graph = MemoryGraphStore::new();
        let mut state = ServerState::new(
            Arc::new(graph),
            Arc::new(MemoryBinaryStore::new()),
            "test",
        );
        let outcome = state.process(frame(1, Message::Begin));
        assert!(outcome.close);
        assert!(outcome.replies.is_empty());
        assert!(!state.in_transaction());
    }

    #[test]
    fn begin_is_acked_and_second_begin_ignored() {
        let (mut state, _, _) = state();
        let outcome = state.process(frame(1, Message::Begin));
        assert_eq!(
            outcome.replies,
            vec![Message::Ack(AckData::new(MessageTag::Begin, 1))]
        );
        assert!(state.in_transaction());

        let outcome = state.process(frame(2, Message::Begin));
        assert_eq!(outcome.replies.len(), 1);
        assert!(state.in_transaction());
    }

    #[test]
    fn node_data_is_idempotent() {
        let (mut state, graph, _) = state();
        state.process(frame(1, Message::Begin));
        state.process(frame(2, node("n1", &[("name", "first".into())])));
        state.process(frame(3, node("n1", &[("name", "first".into())])));
        state.process(frame(
            4,
            node("n1", &[("name", "second".into()), ("color", "red".into())]),
        ));
        assert_eq!(state.remapped("n1"), Some("n1"));

        let outcome = state.process(frame(5, Message::End));
        assert!(outcome.close);
        assert!(outcome.replies.is_empty());

        assert_eq!(graph.node_count(), 1);
        let stored = graph.snapshot().nodes["n1"].clone();
        assert_eq!(stored.text("name"), Some("second"));
        assert_eq!(stored.text("color"), Some("red"));
    }

    #[test]
    fn unresolved_relationship_dropped_and_processing_continues() {
        let (mut state, graph, _) = state();
        state.process(frame(1, Message::Begin));
        state.process(frame(2, node("a", &[])));

        let outcome = state.process(frame(3, rel("r1", "a", "missing")));
        assert_eq!(
            outcome.replies,
            vec![Message::Ack(AckData::new(MessageTag::RelationshipData, 3))]
        );

        state.process(frame(4, node("b", &[])));
        state.process(frame(5, rel("r2", "a", "b")));
        state.process(frame(6, Message::End));

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.relationships.len(), 1);
        assert!(snapshot.relationships.contains_key("r2"));
    }

    #[test]
    fn existing_relationship_is_updated() {
        let (mut state, graph, _) = state();
        state.process(frame(1, Message::Begin));
        state.process(frame(2, node("a", &[])));
        state.process(frame(3, node("b", &[])));
        state.process(frame(4, rel("r1", "a", "b")));
        state.process(frame(
            5,
            Message::RelationshipData(RelationshipData::new(
                "r1",
                "LINKS",
                "a",
                "b",
                props(&[("weight", 3i64.into())]),
            )),
        ));
        state.process(frame(6, Message::End));

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.relationships.len(), 1);
        assert_eq!(
            snapshot.relationships["r1"].properties.get("weight"),
            Some(&PropertyValue::Integer(3))
        );
    }

    #[test]
    fn chunks_reassemble_and_persist_at_node_path() {
        let (mut state, graph, binaries) = state();
        state.process(frame(1, Message::Begin));
        state.process(frame(
            2,
            node(
                "f1",
                &[
                    (PATH_PROPERTY, "docs/a.bin".into()),
                    (SIZE_PROPERTY, (CHUNK_SIZE as i64 + 3).into()),
                ],
            ),
        ));
        let head = vec![b'a'; CHUNK_SIZE];
        let mut expected = head.clone();
        expected.extend_from_slice(b"def");

        state.process(frame(
            3,
            Message::FileBegin(FileBegin::new("f1", expected.len() as u64)),
        ));
        state.process(frame(4, Message::FileChunk(FileChunk::new("f1", 1, b"def".to_vec()))));
        state.process(frame(5, Message::FileChunk(FileChunk::new("f1", 0, head))));
        assert_eq!(state.open_files(), 1);

        let outcome = state.process(frame(6, Message::FileEnd(FileEnd::new("f1"))));
        assert_eq!(
            outcome.replies,
            vec![Message::Ack(AckData::new(MessageTag::FileEnd, 6))]
        );
        assert_eq!(state.open_files(), 0);
        assert_eq!(binaries.get("docs/a.bin"), Some(expected));

        state.process(frame(7, Message::End));
        assert_eq!(graph.node_count(), 1);
        assert_eq!(state.remapped("f1"), None);
    }

    #[test]
    fn chunk_for_unknown_container_dropped() {
        let (mut state, _, binaries) = state();
        state.process(frame(1, Message::Begin));
        state.process(frame(2, node("f1", &[(PATH_PROPERTY, "a.bin".into())])));
        state.process(frame(3, Message::FileBegin(FileBegin::new("f1", 2))));

        let outcome =
            state.process(frame(4, Message::FileChunk(FileChunk::new("ghost", 0, vec![9]))));
        assert_eq!(
            outcome.replies,
            vec![Message::Ack(AckData::new(MessageTag::FileChunk, 4))]
        );

        state.process(frame(5, Message::FileChunk(FileChunk::new("f1", 0, vec![1, 2]))));
        state.process(frame(6, Message::FileEnd(FileEnd::new("f1"))));
        assert_eq!(binaries.get("a.bin"), Some(vec![1, 2]));
        assert_eq!(binaries.len(), 1);
    }

    #[test]
    fn file_with_gap_is_not_persisted() {
        let (mut state, _, binaries) = state();
        state.process(frame(1, Message::Begin));
        state.process(frame(2, node("f1", &[(PATH_PROPERTY, "a.bin".into())])));
        state.process(frame(
            3,
            Message::FileBegin(FileBegin::new("f1", CHUNK_SIZE as u64 + 1)),
        ));
        state.process(frame(4, Message::FileChunk(FileChunk::new("f1", 1, vec![2]))));
        state.process(frame(5, Message::FileEnd(FileEnd::new("f1"))));
        assert!(binaries.is_empty());
        assert_eq!(state.open_files(), 0);
    }

    #[test]
    fn early_chunks_beyond_declared_size_are_not_held() {
        let binaries = MemoryBinaryStore::new();
        let mut assembly = FileAssembly::new("c", 10, binaries.open_temp().unwrap());
        assert_eq!(assembly.last_sequence(), 0);

        for seq in 1..=1000u64 {
            assembly.accept(seq * 1_000_000, vec![0u8; 1024]).unwrap();
        }
        assembly.accept(u64::MAX, vec![1]).unwrap();

        assert_eq!(assembly.pending_chunks(), 0);
        assert_eq!(assembly.rejected_chunks(), 1001);
        assembly.accept(0, vec![7u8; 10]).unwrap();
        assert!(matches!(
            assembly.finish("c.bin"),
            Err(StoreError::Incomplete(_))
        ));
        assert!(binaries.is_empty());
    }

    #[test]
    fn held_chunks_are_capped() {
        let binaries = MemoryBinaryStore::new();
        let chunks = (MAX_PENDING_CHUNKS + 10) as u64;
        let mut assembly =
            FileAssembly::new("c", chunks * CHUNK_SIZE as u64, binaries.open_temp().unwrap());

        for seq in 1..chunks {
            assembly.accept(seq, vec![1]).unwrap();
        }
        assert_eq!(assembly.pending_chunks(), MAX_PENDING_CHUNKS);
        assert_eq!(assembly.rejected_chunks(), 9);
    }

    #[test]
    fn list_pages_sorted_without_transaction() {
        let graph = MemoryGraphStore::new();
        {
            let mut tx = graph.begin().unwrap();
            for (id, name) in [("p1", "Zeta"), ("p2", "Alpha"), ("p3", "Mid")] {
                tx.create_node(Some(id), PAGE_TYPE, props(&[(NAME_PROPERTY, name.into())]))
                    .unwrap();
            }
            tx.create_node(Some("x"), "Item", props(&[(NAME_PROPERTY, "Other".into())]))
                .unwrap();
            tx.commit().unwrap();
        }
        let mut state = ServerState::new(
            Arc::new(graph),
            Arc::new(MemoryBinaryStore::new()),
            "test",
        );
        state.authenticate("admin");

        let outcome = state.process(frame(1, Message::ListPagesRequest));
        assert_eq!(
            outcome.replies,
            vec![
                Message::ListPagesResponse(ListPagesResponse::new(vec![
                    "Alpha".into(),
                    "Mid".into(),
                    "Zeta".into()
                ])),
                Message::Ack(AckData::new(MessageTag::ListPagesRequest, 1)),
            ]
        );
    }

    #[test]
    fn shutdown_rolls_back() {
        let (mut state, graph, _) = state();
        state.process(frame(1, Message::Begin));
        state.process(frame(2, node("n1", &[])));
        state.shutdown();
        assert!(!state.in_transaction());
        assert_eq!(graph.node_count(), 0);
    }

    proptest! {
        #[test]
        fn any_chunk_order_reassembles(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 1..12),
            seed in any::<u64>(),
        ) {
            let expected: Vec<u8> = chunks.concat();

            // Deterministic shuffle with duplicates.
            let mut order: Vec<u64> = (0..chunks.len() as u64).collect();
            let mut x = seed | 1;
            for i in (1..order.len()).rev() {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                order.swap(i, (x % (i as u64 + 1)) as usize);
            }
            let dup = order[(seed as usize) % order.len()];
            order.push(dup);

            let binaries = MemoryBinaryStore::new();
            // Chunks here are tiny; declare room for one per sequence.
            let declared = (chunks.len() * CHUNK_SIZE) as u64;
            let mut assembly = FileAssembly::new("c", declared, binaries.open_temp().unwrap());
            for seq in order {
                assembly.accept(seq, chunks[seq as usize].clone()).unwrap();
            }
            prop_assert!(!assembly.has_gaps());
            assembly.finish("out.bin").unwrap();
            prop_assert_eq!(binaries.get("out.bin"), Some(expected));
        }
    }
}
