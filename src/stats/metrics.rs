//! Statistics for capture streams and connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::registry::StreamId;

/// Per-stream bridge statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Frames pulled from the capture source
    pub frames_captured: u64,
    /// Frames dropped because no consumer was ready
    pub frames_dropped: u64,
    /// Frames turned into samples
    pub frames_encoded: u64,
    /// Frames the encoder swallowed without output
    pub frames_skipped: u64,
    /// Successful sink deliveries (one sample to three sinks counts three)
    pub samples_delivered: u64,
    /// Deliveries a sink rejected or could not take
    pub delivery_failures: u64,
    pub encode_errors: u64,
    pub capture_errors: u64,
}

impl BridgeStats {
    /// Share of captured frames dropped by the gate
    pub fn drop_ratio(&self) -> f64 {
        if self.frames_captured == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / self.frames_captured as f64
        }
    }
}

/// Live counters behind [`BridgeStats`]
#[derive(Debug, Default)]
pub(crate) struct BridgeCounters {
    pub frames_captured: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub samples_delivered: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub encode_errors: AtomicU64,
    pub capture_errors: AtomicU64,
}

impl BridgeCounters {
    /// Increment `counter`, returning the new value
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            samples_delivered: self.samples_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
        }
    }
}

/// Connection registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Connections currently registered
    pub active_connections: usize,
    /// Streams currently bound to a connection
    pub bound_streams: usize,
    /// Connections ever registered
    pub total_registered: u64,
}

/// One active stream as seen by [`ServiceStats`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub stream_id: StreamId,
    pub device_id: String,
    pub uptime: Duration,
    pub listeners: u32,
    pub ready_listeners: u32,
    pub bridge: BridgeStats,
}

impl StreamSummary {
    /// Average delivered frame rate since the stream started
    pub fn encoded_fps(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.bridge.frames_encoded as f64 / secs
        } else {
            0.0
        }
    }
}

/// Service-wide statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub registry: RegistryStats,
    pub streams: Vec<StreamSummary>,
}

impl ServiceStats {
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Frames dropped across all streams
    pub fn total_dropped(&self) -> u64 {
        self.streams.iter().map(|s| s.bridge.frames_dropped).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_stats_default() {
        let stats = BridgeStats::default();
        assert_eq!(stats.frames_captured, 0);
        assert_eq!(stats.samples_delivered, 0);
        assert_eq!(stats.drop_ratio(), 0.0);
    }

    #[test]
    fn test_drop_ratio() {
        let stats = BridgeStats {
            frames_captured: 10,
            frames_dropped: 4,
            ..Default::default()
        };
        assert_eq!(stats.drop_ratio(), 0.4);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = BridgeCounters::default();
        assert_eq!(BridgeCounters::bump(&counters.frames_captured), 1);
        assert_eq!(BridgeCounters::bump(&counters.frames_captured), 2);
        BridgeCounters::add(&counters.samples_delivered, 3);
        BridgeCounters::add(&counters.delivery_failures, 0);

        let stats = counters.snapshot();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.samples_delivered, 3);
        assert_eq!(stats.delivery_failures, 0);
    }

    #[test]
    fn test_encoded_fps() {
        let summary = StreamSummary {
            stream_id: StreamId::from("s"),
            device_id: "cam".into(),
            uptime: Duration::from_secs(2),
            listeners: 1,
            ready_listeners: 0,
            bridge: BridgeStats {
                frames_encoded: 60,
                ..Default::default()
            },
        };
        assert_eq!(summary.encoded_fps(), 30.0);

        let fresh = StreamSummary {
            uptime: Duration::ZERO,
            ..summary
        };
        assert_eq!(fresh.encoded_fps(), 0.0);
    }

    #[test]
    fn test_service_totals() {
        let dropped = |n| StreamSummary {
            stream_id: StreamId::new(),
            device_id: "cam".into(),
            uptime: Duration::from_secs(1),
            listeners: 0,
            ready_listeners: 0,
            bridge: BridgeStats {
                frames_dropped: n,
                ..Default::default()
            },
        };
        let stats = ServiceStats {
            registry: RegistryStats::default(),
            streams: vec![dropped(3), dropped(4)],
        };
        assert_eq!(stats.active_streams(), 2);
        assert_eq!(stats.total_dropped(), 7);
    }
}
