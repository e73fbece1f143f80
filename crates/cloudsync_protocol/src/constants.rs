//! Protocol constants.
//!
//! Both endpoints must agree on these values. The protocol version is
//! carried in every frame header and in the authentication request, so a
//! mismatch is detected on the first frame.

use std::time::Duration;

/// Wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of one file chunk in bytes (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Maximum number of sent-but-unacknowledged messages per connection.
pub const MAX_IN_FLIGHT: usize = 200;

/// How long a client waits for the authentication response.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default round-trip timeout for request/response exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TCP port of the replication service.
pub const DEFAULT_PORT: u16 = 54555;

/// Largest encrypted frame body accepted from the wire (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Strongest session key size, in bits.
pub const MAX_KEY_BITS: u32 = 256;

/// Weakest session key size accepted, in bits.
pub const MIN_KEY_BITS: u32 = 128;

/// Public secret both sides use to protect the authentication exchange.
///
/// This is not a secret in any meaningful sense; it only keeps the
/// handshake from travelling as plain CBOR.
pub const BOOTSTRAP_SECRET: &[u8] = b"cloudsync-bootstrap-v1";

/// Node type whose `name` properties are returned by a page listing.
pub const PAGE_TYPE: &str = "Page";

/// Node property holding the relative path of a file's content.
pub const PATH_PROPERTY: &str = "path";

/// Node property holding the size in bytes of a file's content.
pub const SIZE_PROPERTY: &str = "size";

/// Node property holding a display name.
pub const NAME_PROPERTY: &str = "name";
