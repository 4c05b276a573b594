//! Process-wide relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters shared by all sessions.
#[derive(Debug, Default)]
pub struct RelayStats {
    sessions_started: AtomicU64,
    sessions_active: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    bytes_upstream: AtomicU64,
    bytes_flushed: AtomicU64,
    bytes_discarded: AtomicU64,
    flushes: AtomicU64,
    dropped_sends: AtomicU64,
    malformed_frames: AtomicU64,
    upstream_errors: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayStatsSnapshot {
    pub sessions_started: u64,
    pub sessions_active: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub bytes_upstream: u64,
    pub bytes_flushed: u64,
    pub bytes_discarded: u64,
    pub flushes: u64,
    pub dropped_sends: u64,
    pub malformed_frames: u64,
    pub upstream_errors: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_activated(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self, was_active: bool, failed: bool) {
        if was_active {
            self.sessions_active.fetch_sub(1, Ordering::Relaxed);
        }
        if failed {
            self.sessions_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_upstream(&self, bytes: usize) {
        self.bytes_upstream.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self, bytes: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, bytes: usize) {
        self.bytes_discarded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_send(&self) {
        self.dropped_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            dropped_sends: self.dropped_sends.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
        }
    }
}
