//! Operational counters for the bridge.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operational metrics for monitoring bridge activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Frames handed to the modem.
    pub frames_sent: AtomicU64,
    /// Datagrams read from the modem.
    pub frames_received: AtomicU64,
    /// Events published on the host bus.
    pub events_published: AtomicU64,
    /// Messages dropped as already relayed.
    pub duplicates_dropped: AtomicU64,
    /// Messages dropped by loop prevention.
    pub loops_suppressed: AtomicU64,
    /// Inbound messages dropped by the type filter.
    pub filtered: AtomicU64,
    /// Frames that failed to decode or map.
    pub decode_failures: AtomicU64,
    /// Datagrams with no known routing prefix, or with no handler.
    pub unroutable: AtomicU64,
    /// Inbound pool tasks discarded to make room for newer ones.
    pub queue_overflows: AtomicU64,
    /// Outbound frames discarded from a full send queue.
    pub sends_dropped: AtomicU64,
}

/// Point-in-time copy of [`BridgeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// See [`BridgeMetrics::frames_sent`].
    pub frames_sent: u64,
    /// See [`BridgeMetrics::frames_received`].
    pub frames_received: u64,
    /// See [`BridgeMetrics::events_published`].
    pub events_published: u64,
    /// See [`BridgeMetrics::duplicates_dropped`].
    pub duplicates_dropped: u64,
    /// See [`BridgeMetrics::loops_suppressed`].
    pub loops_suppressed: u64,
    /// See [`BridgeMetrics::filtered`].
    pub filtered: u64,
    /// See [`BridgeMetrics::decode_failures`].
    pub decode_failures: u64,
    /// See [`BridgeMetrics::unroutable`].
    pub unroutable: u64,
    /// See [`BridgeMetrics::queue_overflows`].
    pub queue_overflows: u64,
    /// See [`BridgeMetrics::sends_dropped`].
    pub sends_dropped: u64,
}

/// Increment a counter by one.
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl BridgeMetrics {
    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            frames_sent: get(&self.frames_sent),
            frames_received: get(&self.frames_received),
            events_published: get(&self.events_published),
            duplicates_dropped: get(&self.duplicates_dropped),
            loops_suppressed: get(&self.loops_suppressed),
            filtered: get(&self.filtered),
            decode_failures: get(&self.decode_failures),
            unroutable: get(&self.unroutable),
            queue_overflows: get(&self.queue_overflows),
            sends_dropped: get(&self.sends_dropped),
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} received={} published={} duplicates={} loops={} filtered={} \
             decode_failures={} unroutable={} overflows={} sends_dropped={}",
            self.frames_sent,
            self.frames_received,
            self.events_published,
            self.duplicates_dropped,
            self.loops_suppressed,
            self.filtered,
            self.decode_failures,
            self.unroutable,
            self.queue_overflows,
            self.sends_dropped
        )
    }
}
