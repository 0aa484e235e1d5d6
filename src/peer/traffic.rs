use crate::constants::RATE_CALC_WINDOW;
use std::time::Duration;
use tokio::time::Instant;

/// Byte counters of one session with rates over a rolling window.
#[derive(Debug, Clone)]
pub struct TrafficStats {
    uploaded: u64,
    downloaded: u64,
    window: Duration,
    window_start: Instant,
    window_uploaded: u64,
    window_downloaded: u64,
    upload_rate: f64,
    download_rate: f64,
}

/// A point-in-time copy of [`TrafficStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrafficSnapshot {
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes per second over the last complete window.
    pub upload_rate: f64,
    pub download_rate: f64,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::with_window(RATE_CALC_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            uploaded: 0,
            downloaded: 0,
            window,
            window_start: Instant::now(),
            window_uploaded: 0,
            window_downloaded: 0,
            upload_rate: 0.0,
            download_rate: 0.0,
        }
    }

    pub fn record_upload(&mut self, bytes: usize) {
        self.uploaded += bytes as u64;
        self.window_uploaded += bytes as u64;
        self.tick();
    }

    pub fn record_download(&mut self, bytes: usize) {
        self.downloaded += bytes as u64;
        self.window_downloaded += bytes as u64;
        self.tick();
    }

    /// Closes the current window if it has run its length.
    pub fn tick(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed < self.window {
            return;
        }

        let secs = elapsed.as_secs_f64();
        self.upload_rate = self.window_uploaded as f64 / secs;
        self.download_rate = self.window_downloaded as f64 / secs;
        self.window_uploaded = 0;
        self.window_downloaded = 0;
        self.window_start = Instant::now();
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            uploaded: self.uploaded,
            downloaded: self.downloaded,
            upload_rate: self.upload_rate,
            download_rate: self.download_rate,
        }
    }
}

impl Default for TrafficStats {
    fn default() -> Self {
        Self::new()
    }
}
