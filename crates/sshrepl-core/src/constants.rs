//! Protocol and configuration constants for sshrepl.

use std::time::Duration;

// =============================================================================
// Authentication Constants
// =============================================================================

/// Length of the per-comparison HMAC key in bytes.
pub const COMPARE_KEY_LEN: usize = 32;

/// Delay the transport applies before answering a rejected attempt.
pub const AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);

// =============================================================================
// Terminal Constants
// =============================================================================

/// Carriage return.
pub const CR: u8 = b'\r';

/// Line feed.
pub const LF: u8 = b'\n';

/// Column count meaning "no terminal attached".
pub const NO_TERMINAL: u16 = 0;

// =============================================================================
// Engine Constants
// =============================================================================

/// Prompt used when a credential record does not override it.
pub const DEFAULT_PROMPT: &str = "> ";

/// History length used when a credential record does not override it.
pub const DEFAULT_HISTORY_SIZE: usize = 30;

/// Buffer size for reads from the channel.
pub const CHANNEL_READ_BUF: usize = 4096;

// =============================================================================
// Server Constants
// =============================================================================

/// Default listen port.
pub const DEFAULT_PORT: u16 = 2222;
