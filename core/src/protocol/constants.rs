//! Centralized protocol constants
//!
//! All protocol-level constants are defined here to ensure consistency
//! across the codebase and make configuration easier.

/// Default TCP port the central listens on for peripheral links
pub const DEFAULT_PORT: u16 = 17520;

/// Default localhost port for the control surface
pub const DEFAULT_CONTROL_PORT: u16 = 17521;

/// Current protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Default idle timeout (30 s); 0 disables idle handling
pub const DEFAULT_IDLE_MS: u32 = 30_000;

/// Default sleep timeout (15 min); 0 disables sleep
pub const DEFAULT_SLEEP_MS: u32 = 900_000;

/// Maximum message size (64 KB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum number of attached peripherals
pub const MAX_PERIPHERALS: usize = 8;

/// Maximum entries a settings collection can hold (central plus every
/// peripheral)
pub const MAX_COLLECTION_ENTRIES: usize = MAX_PERIPHERALS + 1;

/// Report collection window for a blocking settings poll, in milliseconds
pub const COLLECT_WINDOW_MS: u64 = 100;

/// Request id reserved for fan-out rounds; reports carrying it bypass the
/// collection and are forwarded as notifications. Poll ids skip this value.
pub const FANOUT_REQUEST_ID: u8 = 0;
