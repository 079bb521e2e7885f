//! Hub configuration.
//!
//! Every limit the connection core enforces is set here explicitly; nothing
//! falls back to hidden framework defaults.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use hubstream::HubConfig;
//!
//! let config = HubConfig::new()
//!     .with_heartbeat(Duration::from_secs(15), Duration::from_secs(30))
//!     .with_chunk_size(16 * 1024)
//!     .with_max_payload_bytes(100 * 1024 * 1024);
//!
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::payload::MIB;

// ============================================================================
// Constants
// ============================================================================

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default heartbeat timeout.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default chunk size (16 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Largest chunk size accepted by [`HubConfig::validate`] (1 MiB).
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Default per-request payload budget.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 102_400_000;

/// Default endpoint path.
pub const DEFAULT_PATH: &str = "/hub";

// ============================================================================
// HubConfig
// ============================================================================

/// Configuration for a [`Hub`](crate::Hub) and the connections it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Address to bind the listener to.
    pub bind_ip: IpAddr,

    /// Port to bind (0 for a random free port).
    pub port: u16,

    /// WebSocket endpoint path.
    pub path: String,

    /// Interval H between Pings.
    pub heartbeat_interval: Duration,

    /// Timeout T for a Pong; must exceed H.
    pub heartbeat_timeout: Duration,

    /// Chunk size used for payloads.
    pub chunk_size: usize,

    /// Upper bound for `chunk_size`.
    pub max_chunk_size: usize,

    /// Largest payload one request may ask for, in bytes.
    pub max_payload_bytes: u64,

    /// Payload requests allowed in flight per connection.
    pub max_concurrent_requests: usize,

    /// Data frames the multiplexer queues per connection.
    pub data_queue_capacity: usize,

    /// Chunks buffered between a producer task and the multiplexer.
    pub producer_channel_capacity: usize,

    /// Client messages buffered between socket reader and command loop.
    pub inbound_buffer: usize,

    /// Time allowed for the WebSocket upgrade.
    pub upgrade_timeout: Duration,

    /// Base seed for payload generation.
    pub payload_seed: u64,
}

// ============================================================================
// Constructors
// ============================================================================

impl HubConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            path: DEFAULT_PATH.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_concurrent_requests: 1,
            data_queue_capacity: 8,
            producer_channel_capacity: 4,
            inbound_buffer: 64,
            upgrade_timeout: Duration::from_secs(10),
            payload_seed: 0,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl HubConfig {
    /// Sets bind address and port.
    #[inline]
    #[must_use]
    pub fn with_bind(mut self, ip: IpAddr, port: u16) -> Self {
        self.bind_ip = ip;
        self.port = port;
        self
    }

    /// Sets the endpoint path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets heartbeat interval and timeout.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the chunk size.
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the per-request payload budget in bytes.
    #[inline]
    #[must_use]
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: u64) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// Sets the number of requests allowed in flight per connection.
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Sets the multiplexer data queue capacity.
    #[inline]
    #[must_use]
    pub fn with_data_queue_capacity(mut self, capacity: usize) -> Self {
        self.data_queue_capacity = capacity;
        self
    }

    /// Sets the producer channel capacity.
    #[inline]
    #[must_use]
    pub fn with_producer_channel_capacity(mut self, capacity: usize) -> Self {
        self.producer_channel_capacity = capacity;
        self
    }

    /// Sets the payload base seed.
    #[inline]
    #[must_use]
    pub fn with_payload_seed(mut self, seed: u64) -> Self {
        self.payload_seed = seed;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl HubConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat interval must be greater than zero"));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(Error::config(format!(
                "heartbeat timeout ({:?}) must exceed heartbeat interval ({:?})",
                self.heartbeat_timeout, self.heartbeat_interval
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk size must be greater than zero"));
        }
        if self.chunk_size > self.max_chunk_size {
            return Err(Error::config(format!(
                "chunk size {} exceeds maximum {}",
                self.chunk_size, self.max_chunk_size
            )));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::config("max concurrent requests must be at least 1"));
        }
        if self.data_queue_capacity == 0
            || self.producer_channel_capacity == 0
            || self.inbound_buffer == 0
        {
            return Err(Error::config("queue capacities must be greater than zero"));
        }
        if !self.path.starts_with('/') {
            return Err(Error::config(format!(
                "endpoint path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }

    /// Returns the byte size of a request for `size_mb` MiB, or a resource
    /// error if it exceeds the payload budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the request is over budget.
    pub fn payload_bytes(&self, size_mb: u32) -> Result<u64> {
        let bytes = u64::from(size_mb) * MIB;
        if bytes > self.max_payload_bytes {
            return Err(Error::resource(format!(
                "requested {size_mb}MB ({bytes} bytes) exceeds maximum of {} bytes",
                self.max_payload_bytes
            )));
        }
        Ok(bytes)
    }

    /// Returns the seed for one request.
    #[inline]
    #[must_use]
    pub fn seed_for(&self, request_id: u64) -> u64 {
        self.payload_seed ^ request_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

// ============================================================================
// Tests
// ============================================================================
