//! Configuration for the client pool, the server, and the dispatcher.
//!
//! All tunables live in plain structs with `Default` impls carrying the
//! values the system was tuned with in production. Construct with struct
//! update syntax:
//!
//! ```
//! use vrpc::config::PoolConfig;
//! use std::time::Duration;
//!
//! let config = PoolConfig {
//!     pool_size: 2,
//!     batch_window: Duration::from_millis(50),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

/// Default number of parallel streams held by a pool.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default maximum wait before a non-full batch fires.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(5);

/// Default number of pending requests at which a batch fires immediately.
pub const DEFAULT_BATCH_SIZE_THRESHOLD: usize = 20;

/// Default response code for dispatch failures.
pub const DEFAULT_ERR_CODE: u32 = 10005;

/// Default per-request dispatch deadline on the enclave side.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Default maximum envelope size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Client pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of parallel streams.
    pub pool_size: usize,
    /// Maximum wait before a non-full batch fires.
    pub batch_window: Duration,
    /// Number of pending requests at which a batch fires immediately.
    pub batch_size_threshold: usize,
    /// Deadline for dialing a stream, both at startup and on slot
    /// replacement.
    pub dial_timeout: Duration,
    /// Idle time after which the client pings the server.
    pub keepalive_interval: Duration,
    /// How long to wait for the ping reply.
    pub keepalive_timeout: Duration,
    /// Maximum accepted envelope size.
    pub max_frame_size: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            batch_window: DEFAULT_BATCH_WINDOW,
            batch_size_threshold: DEFAULT_BATCH_SIZE_THRESHOLD,
            dial_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(120),
            keepalive_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Minimum interval between client pings; a faster ping drops the
    /// connection.
    pub min_ping_interval: Duration,
    /// Maximum accepted envelope size.
    pub max_frame_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            min_ping_interval: Duration::from_secs(60),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
