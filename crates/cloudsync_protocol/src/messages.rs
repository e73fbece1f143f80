//! Protocol messages for graph replication.

use crate::constants::PROTOCOL_VERSION;
use crate::value::{byte_buf, Properties};
use serde::{Deserialize, Serialize};

/// A replication protocol message.
///
/// Every unit of exchange between the two endpoints is one of these
/// variants. The receiving side dispatches on the variant; the sending
/// side uses [`Message::expects_ack`] for flow control and
/// [`Message::units`] for progress accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Opens a transaction on the receiving store.
    Begin,
    /// Commits the transaction and ends the session.
    End,
    /// Acknowledges one processed message.
    Ack(AckData),
    /// Client credentials and key strength request.
    AuthenticationRequest(AuthenticationRequest),
    /// Server salt and negotiated key parameters.
    AuthenticationResponse(AuthenticationResponse),
    /// A node to create or update.
    NodeData(NodeData),
    /// A relationship to create or update.
    RelationshipData(RelationshipData),
    /// Starts the content transfer of a file node.
    FileBegin(FileBegin),
    /// One chunk of file content.
    FileChunk(FileChunk),
    /// Ends the content transfer of a file node.
    FileEnd(FileEnd),
    /// Asks the server for the names of its pages.
    ListPagesRequest,
    /// Page names held by the server.
    ListPagesResponse(ListPagesResponse),
}

/// Discriminant of a [`Message`], used in acknowledgments and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTag {
    /// [`Message::Begin`]
    Begin,
    /// [`Message::End`]
    End,
    /// [`Message::Ack`]
    Ack,
    /// [`Message::AuthenticationRequest`]
    AuthenticationRequest,
    /// [`Message::AuthenticationResponse`]
    AuthenticationResponse,
    /// [`Message::NodeData`]
    NodeData,
    /// [`Message::RelationshipData`]
    RelationshipData,
    /// [`Message::FileBegin`]
    FileBegin,
    /// [`Message::FileChunk`]
    FileChunk,
    /// [`Message::FileEnd`]
    FileEnd,
    /// [`Message::ListPagesRequest`]
    ListPagesRequest,
    /// [`Message::ListPagesResponse`]
    ListPagesResponse,
}

impl MessageTag {
    /// Returns the numeric type code.
    pub fn type_code(&self) -> u8 {
        match self {
            MessageTag::Begin => 1,
            MessageTag::End => 2,
            MessageTag::Ack => 3,
            MessageTag::AuthenticationRequest => 4,
            MessageTag::AuthenticationResponse => 5,
            MessageTag::NodeData => 6,
            MessageTag::RelationshipData => 7,
            MessageTag::FileBegin => 8,
            MessageTag::FileChunk => 9,
            MessageTag::FileEnd => 10,
            MessageTag::ListPagesRequest => 11,
            MessageTag::ListPagesResponse => 12,
        }
    }
}

impl Message {
    /// Returns the tag of this message.
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Begin => MessageTag::Begin,
            Message::End => MessageTag::End,
            Message::Ack(_) => MessageTag::Ack,
            Message::AuthenticationRequest(_) => MessageTag::AuthenticationRequest,
            Message::AuthenticationResponse(_) => MessageTag::AuthenticationResponse,
            Message::NodeData(_) => MessageTag::NodeData,
            Message::RelationshipData(_) => MessageTag::RelationshipData,
            Message::FileBegin(_) => MessageTag::FileBegin,
            Message::FileChunk(_) => MessageTag::FileChunk,
            Message::FileEnd(_) => MessageTag::FileEnd,
            Message::ListPagesRequest => MessageTag::ListPagesRequest,
            Message::ListPagesResponse(_) => MessageTag::ListPagesResponse,
        }
    }

    /// Returns the numeric type code.
    pub fn type_code(&self) -> u8 {
        self.tag().type_code()
    }

    /// Whether the receiver acknowledges this message.
    ///
    /// Only messages that expect an acknowledgment occupy a slot in the
    /// sender's in-flight window.
    pub fn expects_ack(&self) -> bool {
        matches!(
            self,
            Message::Begin
                | Message::NodeData(_)
                | Message::RelationshipData(_)
                | Message::FileBegin(_)
                | Message::FileChunk(_)
                | Message::FileEnd(_)
                | Message::ListPagesRequest
        )
    }

    /// Progress units consumed by sending this message.
    pub fn units(&self) -> u64 {
        match self {
            Message::NodeData(_)
            | Message::RelationshipData(_)
            | Message::FileBegin(_)
            | Message::FileChunk(_)
            | Message::FileEnd(_) => 1,
            _ => 0,
        }
    }

    /// Rough encoded size in bytes.
    pub fn estimated_size(&self) -> usize {
        let props = |p: &Properties| {
            p.iter()
                .map(|(k, v)| k.len() + v.estimated_size())
                .sum::<usize>()
        };
        match self {
            Message::Begin | Message::End | Message::ListPagesRequest => 8,
            Message::Ack(_) => 16,
            Message::AuthenticationRequest(req) => req.username.len() + 16,
            Message::AuthenticationResponse(resp) => {
                resp.salt.as_ref().map_or(0, String::len) + resp.key_check.len() + 16
            }
            Message::NodeData(node) => {
                node.source_id.len() + node.node_type.len() + props(&node.properties) + 16
            }
            Message::RelationshipData(rel) => {
                rel.source_start_id.len()
                    + rel.source_end_id.len()
                    + rel.relationship_id.len()
                    + rel.relationship_type.len()
                    + props(&rel.properties)
                    + 16
            }
            Message::FileBegin(file) => file.source_id.len() + 16,
            Message::FileChunk(chunk) => chunk.container_id.len() + chunk.data.len() + 16,
            Message::FileEnd(file) => file.container_id.len() + 8,
            Message::ListPagesResponse(resp) => {
                resp.names.iter().map(|n| n.len() + 2).sum::<usize>() + 8
            }
        }
    }
}

/// Acknowledgment of one processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckData {
    /// Tag of the acknowledged message.
    pub tag: MessageTag,
    /// Frame sequence number of the acknowledged message.
    pub sequence: u64,
}

impl AckData {
    /// Creates an acknowledgment.
    pub fn new(tag: MessageTag, sequence: u64) -> Self {
        Self { tag, sequence }
    }
}

/// Authentication request from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationRequest {
    /// Name of the user to authenticate as.
    pub username: String,
    /// Strongest key size the client supports, in bits.
    pub key_bits: u32,
    /// Client protocol version.
    pub protocol_version: u8,
}

impl AuthenticationRequest {
    /// Creates a new authentication request.
    pub fn new(username: impl Into<String>, key_bits: u32) -> Self {
        Self {
            username: username.into(),
            key_bits,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// Authentication response from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    /// The user's password salt, if the stored hash is salted.
    pub salt: Option<String>,
    /// Negotiated key size, in bits.
    pub key_bits: u32,
    /// Verification constant encrypted under the session key.
    #[serde(with = "byte_buf")]
    pub key_check: Vec<u8>,
}

impl AuthenticationResponse {
    /// Creates a new authentication response.
    pub fn new(salt: Option<String>, key_bits: u32, key_check: Vec<u8>) -> Self {
        Self {
            salt,
            key_bits,
            key_check,
        }
    }
}

/// A node to replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Identifier of the node on the sending instance.
    pub source_id: String,
    /// Node type.
    pub node_type: String,
    /// Node properties.
    pub properties: Properties,
}

impl NodeData {
    /// Creates node data.
    pub fn new(
        source_id: impl Into<String>,
        node_type: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            node_type: node_type.into(),
            properties,
        }
    }
}

/// A relationship to replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipData {
    /// Source identifier of the start node.
    pub source_start_id: String,
    /// Source identifier of the end node.
    pub source_end_id: String,
    /// Identifier of the relationship on the sending instance.
    pub relationship_id: String,
    /// Relationship type.
    pub relationship_type: String,
    /// Relationship properties.
    pub properties: Properties,
}

impl RelationshipData {
    /// Creates relationship data.
    pub fn new(
        relationship_id: impl Into<String>,
        relationship_type: impl Into<String>,
        source_start_id: impl Into<String>,
        source_end_id: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            source_start_id: source_start_id.into(),
            source_end_id: source_end_id.into(),
            relationship_id: relationship_id.into(),
            relationship_type: relationship_type.into(),
            properties,
        }
    }
}

/// Start of a file content transfer.
///
/// The file node's source id doubles as the container id of the chunks
/// that follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBegin {
    /// Source identifier of the file node.
    pub source_id: String,
    /// Size of the content in bytes, as declared by the sender.
    pub declared_size: u64,
}

impl FileBegin {
    /// Creates a file begin message.
    pub fn new(source_id: impl Into<String>, declared_size: u64) -> Self {
        Self {
            source_id: source_id.into(),
            declared_size,
        }
    }
}

/// One chunk of file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Container the chunk belongs to.
    pub container_id: String,
    /// Zero-based position of the chunk within the file.
    pub sequence: u64,
    /// Chunk payload.
    #[serde(with = "byte_buf")]
    pub data: Vec<u8>,
}

impl FileChunk {
    /// Creates a file chunk.
    pub fn new(container_id: impl Into<String>, sequence: u64, data: Vec<u8>) -> Self {
        Self {
            container_id: container_id.into(),
            sequence,
            data,
        }
    }
}

/// End of a file content transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEnd {
    /// Container being finished.
    pub container_id: String,
}

impl FileEnd {
    /// Creates a file end message.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
        }
    }
}

/// Page names held by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPagesResponse {
    /// Page names, sorted.
    pub names: Vec<String>,
}

impl ListPagesResponse {
    /// Creates a page listing.
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}
