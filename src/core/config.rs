//! Centralized configuration constants for HyperTunnel.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format constants (HTCP magic/version, crypto
//! block sizes) stay in their respective modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Maximum outbound data-channel message size in bytes.
///
/// Sized to stay below the 64 KB SCTP message limit that some WebRTC
/// implementations enforce on the receive side; message boundaries are
/// preserved by the transport, so each send is delivered as one message.
pub const CHUNK_SIZE: usize = 65534;

/// High water mark for the data channel's SCTP send buffer (bytes).
/// When `buffered_amount` exceeds this value, the sender pauses chunk
/// transmission until the buffer drains.
pub const DC_BUFFERED_AMOUNT_HIGH: usize = 4 * 1024 * 1024;

/// Poll interval while waiting for the SCTP send buffer to drain.
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ── Connection / Signaling ───────────────────────────────────────────────────

/// Default STUN server used for ICE candidate gathering.
pub const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Poll interval for the remote-signal file (`--signal-in <path>`).
pub const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wait for the remote signal before giving up.
pub const DEFAULT_SIGNAL_TIMEOUT: Duration = Duration::from_secs(30);

// ── UI / Misc ────────────────────────────────────────────────────────────────

/// How often the progress line is redrawn on a TTY.
pub const PROGRESS_RENDER_INTERVAL: Duration = Duration::from_millis(200);

/// Attempts to get a valid answer from a confirmation prompt before
/// treating the answer as "no".
pub const CONFIRM_MAX_ATTEMPTS: u32 = 3;
