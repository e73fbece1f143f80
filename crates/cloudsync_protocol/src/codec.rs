//! Frame envelope and CBOR encoding.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::Message;
use serde::{Deserialize, Serialize};

/// A message together with the sequence number the Sender assigned to it.
///
/// Sequence numbers start at 1 and increase by one per frame written on
/// a connection. Acknowledgments echo them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Position of this frame in the sender's write order.
    pub sequence: u64,
    /// The carried message.
    pub message: Message,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(sequence: u64, message: Message) -> Self {
        Self { sequence, message }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.message.estimated_size() + 16);
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
    }
}
