//! Bandwidth limiting using accumulation windows.
//!
//! This module throttles socket traffic shared by every peer session of a
//! transfer. Each direction has its own [`RateLimiter`] channel, so a
//! sleeping writer never holds up a reader.
//!
//! A channel accumulates the bytes reported to it. Once the accumulated
//! count reaches the window size, it compares the elapsed wall time since
//! the window opened with the time those bytes should have taken at the
//! configured rate, sleeps off the difference and opens a new window.
//!
//! # Example
//!
//! ```
//! use blockwire::BandwidthLimiter;
//!
//! # async fn example() {
//! // 1MB/s read, 500KB/s write, 64KB windows
//! let limiter = BandwidthLimiter::new(1_000_000, 500_000, 64 * 1024);
//!
//! // Report bytes after they move over the socket
//! limiter.acquire_read(16384).await;
//! limiter.acquire_write(16384).await;
//!
//! // Create unlimited limiter
//! let unlimited = BandwidthLimiter::unlimited();
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// One direction of a [`BandwidthLimiter`].
///
/// The window lock is held across the sleep, so concurrent callers on the
/// same channel queue up behind the one paying off the window.
pub struct RateLimiter {
    bytes_per_sec: u64,
    window_size: u64,
    window: Mutex<Window>,
}

struct Window {
    bytes: u64,
    started: Instant,
    total: u64,
}

impl RateLimiter {
    /// Creates a channel limited to `bytes_per_sec`. A rate of 0 never blocks.
    pub fn new(bytes_per_sec: u64, window_size: u64) -> Arc<Self> {
        Arc::new(Self {
            bytes_per_sec,
            window_size: window_size.max(1),
            window: Mutex::new(Window {
                bytes: 0,
                started: Instant::now(),
                total: 0,
            }),
        })
    }

    /// Creates an unlimited channel that only counts bytes.
    pub fn unlimited() -> Arc<Self> {
        Self::new(0, u64::MAX)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_sec == 0
    }

    pub fn rate(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Records `bytes` of traffic, sleeping if the current window went
    /// faster than the configured rate.
    pub async fn acquire(&self, bytes: usize) {
        let mut window = self.window.lock().await;
        window.total += bytes as u64;

        if self.is_unlimited() {
            return;
        }

        window.bytes += bytes as u64;
        if window.bytes < self.window_size {
            return;
        }

        let minimum = Duration::from_secs_f64(window.bytes as f64 / self.bytes_per_sec as f64);
        let elapsed = window.started.elapsed();
        if minimum > elapsed {
            let shortfall = minimum - elapsed;
            tracing::trace!(
                "rate limit: {} bytes in {:?}, sleeping {:?}",
                window.bytes,
                elapsed,
                shortfall
            );
            tokio::time::sleep(shortfall).await;
        }

        window.bytes = 0;
        window.started = Instant::now();
    }

    /// Total bytes ever reported to this channel.
    pub async fn total(&self) -> u64 {
        self.window.lock().await.total
    }
}

/// A combined read and write bandwidth limiter.
///
/// One instance is shared by all sessions of a transfer.
pub struct BandwidthLimiter {
    read: Arc<RateLimiter>,
    write: Arc<RateLimiter>,
}

impl BandwidthLimiter {
    /// Creates a new bandwidth limiter with the specified limits.
    ///
    /// A limit of 0 means unlimited.
    pub fn new(read_limit: u64, write_limit: u64, window_size: u64) -> Self {
        Self {
            read: RateLimiter::new(read_limit, window_size),
            write: RateLimiter::new(write_limit, window_size),
        }
    }

    /// Creates an unlimited bandwidth limiter.
    pub fn unlimited() -> Self {
        Self {
            read: RateLimiter::unlimited(),
            write: RateLimiter::unlimited(),
        }
    }

    /// Builds the limiter described by a transfer [`Config`](crate::Config).
    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(config.download_limit, config.upload_limit, config.rate_window)
    }

    /// Reports bytes read from a socket.
    pub async fn acquire_read(&self, bytes: usize) {
        self.read.acquire(bytes).await;
    }

    /// Reports bytes written to a socket.
    pub async fn acquire_write(&self, bytes: usize) {
        self.write.acquire(bytes).await;
    }

    pub fn read_limiter(&self) -> Arc<RateLimiter> {
        self.read.clone()
    }

    pub fn write_limiter(&self) -> Arc<RateLimiter> {
        self.write.clone()
    }
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
