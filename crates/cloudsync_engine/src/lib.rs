//! # CloudSync Engine
//!
//! Point-to-point replication of a subgraph, with file content, from a
//! source instance to a target instance over an authenticated, encrypted
//! TCP stream.
//!
//! This crate provides:
//! - Session key negotiation and per-frame AES-GCM encryption
//! - The frame pipeline (length, version, encrypted deflated CBOR)
//! - [`Connection`], with Sender/Receiver workers and an in-flight window
//! - [`ServerState`], the per-session message state machine
//! - [`ExportSet`] and the [`Transmission`] strategies that drive a push
//! - [`CloudService`], which serves and dials sessions
//!
//! ## Session
//!
//! ```text
//! client                                  server
//!   AuthenticationRequest  ------------->   (bootstrap key)
//!                          <-------------   AuthenticationResponse
//!   (both directions switch to the session key)
//!   Begin, NodeData, FileBegin/Chunk/End,
//!   RelationshipData       ------------->   Ack per message
//!   End                    ------------->   commit, close
//! ```
//!
//! ## Key Invariants
//!
//! - Messages are delivered in send order per connection
//! - At most `max_in_flight` messages are unacknowledged at any time
//! - A failed authentication never opens a transaction
//! - Records referencing unknown entities are dropped, never fatal

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod connection;
mod crypto;
mod error;
mod export;
mod framing;
mod listener;
mod service;
mod session;
mod transmission;

pub use config::{CloudConfig, ConnectionConfig};
pub use connection::Connection;
pub use crypto::{
    construct_nonce, negotiate_key_bits, Direction, FrameCipher, KeyCache, Role, SessionKey,
};
pub use error::{CloudError, CloudResult};
pub use export::{file_units, ExportSet};
pub use listener::{LoggingListener, NoopListener, ProgressListener};
pub use service::CloudService;
pub use session::{FileAssembly, Outcome, ServerState};
pub use transmission::{
    Credentials, ListPagesTransmission, PushRoot, PushSummary, PushTransmission, Transmission,
};
