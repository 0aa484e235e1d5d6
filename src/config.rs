//! Per-transfer configuration.
//!
//! [`Config`] collects the tunables of a transfer. Every field defaults to
//! the matching value in [`constants`](crate::constants).
//!
//! # Example
//!
//! ```
//! use blockwire::Config;
//! use std::time::Duration;
//!
//! let config = Config::default()
//!     .with_download_limit(1_000_000)
//!     .with_checkout_timeout(Duration::from_secs(60));
//!
//! assert_eq!(config.download_limit, 1_000_000);
//! assert_eq!(config.upload_limit, 0);
//! ```

use std::time::Duration;

use crate::constants::*;

#[derive(Debug, Clone)]
pub struct Config {
    /// Download limit in bytes per second. 0 means unlimited.
    pub download_limit: u64,
    /// Upload limit in bytes per second. 0 means unlimited.
    pub upload_limit: u64,
    /// Bytes a limiter channel accumulates before it sleeps off any excess.
    pub rate_window: u64,
    /// Length of a block requested over the wire.
    pub block_length: u32,
    /// Silence after which a session is considered dead.
    pub keepalive_timeout: Duration,
    /// Age at which an uncompleted checkout is reclaimed.
    pub checkout_timeout: Duration,
    /// Interval of the checkout sweep.
    pub sweep_interval: Duration,
    /// Fraction of present pieces that enables end-game.
    pub endgame_threshold: f64,
    /// Unanswered `Interested` messages tolerated while choked.
    pub max_choked_stalls: u32,
    /// Interval between `Interested` messages while choked.
    pub interested_interval: Duration,
    pub download_interval: Duration,
    pub upload_interval: Duration,
    pub keepalive_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_limit: 0,
            upload_limit: 0,
            rate_window: RATE_LIMIT_WINDOW,
            block_length: BLOCK_SIZE,
            keepalive_timeout: KEEPALIVE_TIMEOUT,
            checkout_timeout: CHECKOUT_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
            endgame_threshold: ENDGAME_THRESHOLD,
            max_choked_stalls: MAX_CHOKED_STALLS,
            interested_interval: INTERESTED_RESEND_INTERVAL,
            download_interval: DOWNLOAD_INTERVAL,
            upload_interval: UPLOAD_INTERVAL,
            keepalive_interval: KEEPALIVE_CHECK_INTERVAL,
        }
    }
}

impl Config {
    pub fn with_download_limit(mut self, bytes_per_sec: u64) -> Self {
        self.download_limit = bytes_per_sec;
        self
    }

    pub fn with_upload_limit(mut self, bytes_per_sec: u64) -> Self {
        self.upload_limit = bytes_per_sec;
        self
    }

    pub fn with_rate_window(mut self, bytes: u64) -> Self {
        self.rate_window = bytes;
        self
    }

    pub fn with_block_length(mut self, block_length: u32) -> Self {
        self.block_length = block_length;
        self
    }

    pub fn with_keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_endgame_threshold(mut self, threshold: f64) -> Self {
        self.endgame_threshold = threshold;
        self
    }

    pub fn with_max_choked_stalls(mut self, stalls: u32) -> Self {
        self.max_choked_stalls = stalls;
        self
    }

    pub fn with_interested_interval(mut self, interval: Duration) -> Self {
        self.interested_interval = interval;
        self
    }

    /// Sets the download and upload loop cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.download_interval = interval;
        self.upload_interval = interval;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}
