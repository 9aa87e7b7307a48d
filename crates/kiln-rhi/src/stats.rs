use std::sync::atomic::{AtomicU64, Ordering};

/// Per-device transfer and submission counters.
///
/// Updated with relaxed atomics from the submission thread; safe to snapshot from any thread.
#[derive(Debug, Default)]
pub struct DeviceStats {
    bytes_uploaded: AtomicU64,
    bytes_read_back: AtomicU64,
    copies: AtomicU64,
    dispatches: AtomicU64,
    indirect_dispatches: AtomicU64,
    tile_binds: AtomicU64,
    presents: AtomicU64,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_uploaded(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_read_back(&self, bytes: u64) {
        self.bytes_read_back.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_copies(&self) {
        self.copies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dispatches(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_indirect_dispatches(&self) {
        self.indirect_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tile_binds(&self) {
        self.tile_binds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_presents(&self) {
        self.presents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_read_back: self.bytes_read_back.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            indirect_dispatches: self.indirect_dispatches.load(Ordering::Relaxed),
            tile_binds: self.tile_binds.load(Ordering::Relaxed),
            presents: self.presents.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatsSnapshot {
    pub bytes_uploaded: u64,
    pub bytes_read_back: u64,
    pub copies: u64,
    pub dispatches: u64,
    pub indirect_dispatches: u64,
    pub tile_binds: u64,
    pub presents: u64,
}
