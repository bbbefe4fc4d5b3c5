//! Constants for the fetch module (size limits, redirects, timeouts).

/// Default in-memory response pre-allocation (1 MiB).
pub const DEFAULT_RESPONSE_SIZE: u64 = 1024 * 1024;

/// Default ceiling on the bytes accepted from the transport (4 MiB).
pub const MAXIMUM_RESPONSE_SIZE: u64 = 4 * 1024 * 1024;

/// Redirects followed before a fetch fails.
pub const MAX_REDIRECTS: usize = 10;

/// Authentication attempts offered to a delegate for one fetch.
pub const MAX_AUTH_ATTEMPTS: u32 = 8;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout between body chunks (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;
