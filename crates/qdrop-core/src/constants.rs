//! Protocol and configuration constants for qdrop.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum encoded message size (1 MiB).
///
/// A transfer chunk plus framing overhead fits comfortably; anything larger
/// indicates a misbehaving peer.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Share code length in characters.
pub const SHARE_CODE_LEN: usize = 6;

/// Alphabet for share codes: uppercase alphanumeric.
pub const SHARE_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// =============================================================================
// Transfer Constants
// =============================================================================

/// Chunk size for file transfers (16 KiB).
///
/// Trades per-frame overhead against responsiveness and the memory footprint
/// of in-flight slot buffers.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Maximum announced file size a receiver will buffer (1 GiB).
///
/// Bounds the slot table allocated on START before any payload arrives.
pub const MAX_TRANSFER_SIZE: u64 = 1024 * 1024 * 1024;

/// Pacing delay between chunk emissions.
pub const CHUNK_PACING: Duration = Duration::from_millis(10);

/// Pacing delay between consecutive files in a multi-file send.
pub const FILE_PACING: Duration = Duration::from_millis(100);

/// Outbound queue depth per connection, in messages.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

// =============================================================================
// Timing Constants
// =============================================================================

/// Maximum session lifetime before the TTL sweep retires it (4 hours).
pub const SESSION_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Grace period after a session's last participant leaves (5 minutes).
pub const EMPTY_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Interval between expiry sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum spacing between progress telemetry samples.
pub const PROGRESS_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Default Values
// =============================================================================

/// Default maximum participants per session (creator included).
pub const DEFAULT_MAX_PARTICIPANTS: usize = 10;

/// Default bind port for the server.
pub const DEFAULT_PORT: u16 = 4820;
