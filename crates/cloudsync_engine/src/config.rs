//! Configuration for connections and the replication service.

use cloudsync_protocol::{
    AUTH_TIMEOUT, DEFAULT_PORT, DEFAULT_TIMEOUT, MAX_FRAME_SIZE, MAX_IN_FLIGHT, MAX_KEY_BITS,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of sent-but-unacknowledged messages.
    pub max_in_flight: usize,
    /// Capacity of the outbound and inbound message queues.
    pub queue_capacity: usize,
    /// Default timeout for request/response exchanges and draining.
    pub round_trip_timeout: Duration,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Largest frame body accepted from the wire.
    pub max_frame_size: usize,
}

impl ConnectionConfig {
    /// Creates a configuration with protocol defaults.
    pub fn new() -> Self {
        Self {
            max_in_flight: MAX_IN_FLIGHT,
            queue_capacity: 256,
            round_trip_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Sets the in-flight cap. Zero is raised to one.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Sets the queue capacity. Zero is raised to one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the round-trip timeout.
    pub fn with_round_trip_timeout(mut self, timeout: Duration) -> Self {
        self.round_trip_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings of a [`CloudService`](crate::CloudService).
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Address the service listens on.
    pub bind_address: SocketAddr,
    /// Settings applied to every connection.
    pub connection: ConnectionConfig,
    /// Strongest session key offered or accepted, in bits.
    pub max_key_bits: u32,
    /// How long a client waits for the authentication response.
    pub auth_timeout: Duration,
    /// How long a client waits for the server to close after `End`.
    pub close_timeout: Duration,
}

impl CloudConfig {
    /// Creates a configuration with protocol defaults.
    pub fn new() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            connection: ConnectionConfig::default(),
            max_key_bits: MAX_KEY_BITS,
            auth_timeout: AUTH_TIMEOUT,
            close_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the listen address.
    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Sets the per-connection settings.
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Sets the strongest session key size.
    pub fn with_max_key_bits(mut self, bits: u32) -> Self {
        self.max_key_bits = bits;
        self
    }

    /// Sets the authentication timeout.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the close timeout.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self::new()
    }
}
