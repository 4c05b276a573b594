//! Downstream relay buffer.
//!
//! Audio frames from the voice service are accumulated and handed to the
//! client in time-boxed batches instead of one write per frame. The window is
//! measured from the first frame after the previous flush, so batching repeats
//! for the whole call.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

/// Default flush window.
pub const DEFAULT_FLUSH_WINDOW: Duration = Duration::from_millis(100);

/// Accumulates upstream audio and releases it on a fixed cadence.
#[derive(Debug)]
pub struct RelayBuffer {
    pending: BytesMut,
    window: Duration,
    window_start: Option<Instant>,
    received: u64,
    flushed: u64,
    flushes: u64,
}

impl RelayBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: BytesMut::new(),
            window,
            window_start: None,
            received: 0,
            flushed: 0,
            flushes: 0,
        }
    }

    /// Append a frame received at `now`.
    ///
    /// Returns the accumulated bytes when at least one window has elapsed
    /// since the current window started. The first frame ever pushed only
    /// starts the window.
    pub fn push(&mut self, frame: &[u8], now: Instant) -> Option<Bytes> {
        self.received += frame.len() as u64;
        self.pending.extend_from_slice(frame);

        let start = *self.window_start.get_or_insert(now);
        if now.saturating_duration_since(start) < self.window {
            return None;
        }

        self.window_start = Some(now);
        if self.pending.is_empty() {
            return None;
        }

        let chunk = self.pending.split().freeze();
        self.flushed += chunk.len() as u64;
        self.flushes += 1;
        Some(chunk)
    }

    /// Drop whatever has not been flushed yet, returning the byte count.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Total bytes pushed into the buffer.
    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    /// Total bytes released by flushes.
    pub fn flushed_bytes(&self) -> u64 {
        self.flushed
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }
}

impl Default for RelayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_WINDOW)
    }
}
