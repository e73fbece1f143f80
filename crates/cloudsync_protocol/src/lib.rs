//! # CloudSync Protocol
//!
//! Message types and the CBOR frame codec for CloudSync, the point-to-point
//! graph replication channel between two instances.
//!
//! This crate provides:
//! - `Message`, the tagged union of everything that crosses the wire
//! - `Frame`, the sequence-numbered envelope the Sender writes
//! - `PropertyValue` / `Properties` for node and relationship payloads
//! - Protocol constants shared by both endpoints
//!
//! This is a pure protocol crate with no I/O operations. Encryption,
//! compression and socket handling live in `cloudsync_engine`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
pub mod constants;
mod error;
mod messages;
mod value;

pub use codec::Frame;
pub use constants::*;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    AckData, AuthenticationRequest, AuthenticationResponse, FileBegin, FileChunk, FileEnd,
    ListPagesResponse, Message, MessageTag, NodeData, RelationshipData,
};
pub use value::{Properties, PropertyValue};
