//! Shared transport counters.
//!
//! Updated from a connection's own task but read concurrently by logging and
//! reporting paths, so every field is an atomic. With a pool of connections,
//! each connection's counters feed one aggregate without cross-connection
//! locking.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    largest_packet: AtomicU64,
}

/// Point-in-time copy for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub largest_packet: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, wire_bytes: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(wire_bytes, Ordering::Relaxed);
        self.largest_packet.fetch_max(wire_bytes, Ordering::Relaxed);
    }

    pub fn record_read(&self, socket_bytes: u64) {
        self.bytes_received.fetch_add(socket_bytes, Ordering::Relaxed);
    }

    pub fn record_packet_received(&self, payload_bytes: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.largest_packet.fetch_max(payload_bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            largest_packet: self.largest_packet.load(Ordering::Relaxed),
        }
    }
}
