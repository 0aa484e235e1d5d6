//! Protocol constants and tuning parameters.
//!
//! This module contains the constants used throughout the piece-exchange
//! engine: wire protocol values, block geometry, timeouts and the polling
//! cadence of the per-session loops.
//!
//! Most of these are defaults; [`Config`](crate::Config) lets callers
//! override the tunable ones per transfer.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-BW0001-";

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string
pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Extension protocol bit, set in reserved byte 5
pub const EXTENSION_BIT: u8 = 0x10;

/// Fast peer bit, the low bit of reserved byte 8
pub const FAST_PEER_BIT: u8 = 0x01;

/// Length of an info hash or peer id
pub const ID_LEN: usize = 20;

/// Maximum message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Pieces kept in the assembly buffer pool
pub const BUFFER_POOL_PIECES: usize = 64;

/// Initial capacity of a framer read buffer (32KB)
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

// ============================================================================
// Piece coordination
// ============================================================================

/// A checkout older than this without completion is reclaimed
pub const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between checkout sweeps
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Fraction of present pieces at which end-game starts
pub const ENDGAME_THRESHOLD: f64 = 0.95;

// ============================================================================
// Session timeouts and loop intervals
// ============================================================================

/// Silence on the wire beyond this ends the session
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Download loop interval
pub const DOWNLOAD_INTERVAL: Duration = Duration::from_millis(200);

/// Upload loop interval
pub const UPLOAD_INTERVAL: Duration = Duration::from_millis(200);

/// Keep-alive loop interval
pub const KEEPALIVE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// How often `Interested` is re-sent while the remote keeps us choked
pub const INTERESTED_RESEND_INTERVAL: Duration = Duration::from_secs(10);

/// Unanswered `Interested` messages tolerated before the session fails
pub const MAX_CHOKED_STALLS: u32 = 12;

/// Window over which transfer speed is measured
pub const RATE_CALC_WINDOW: Duration = Duration::from_secs(1);

// ============================================================================
// Bandwidth constants
// ============================================================================

/// Bytes accumulated by a limiter channel before it checks the elapsed time
pub const RATE_LIMIT_WINDOW: u64 = 64 * 1024;
