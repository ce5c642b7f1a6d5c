//! Per-frame timing telemetry surfaced by the frame pipeline (C5).

use serde::{Deserialize, Serialize};

/// One event per completed push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEvent {
    pub device_host: String,
    pub scene_name: String,
    pub push_duration_ms: u64,
    pub diff_pixel_count: usize,
    pub generation: u64,
    pub timestamp_ms: u64,
}

/// Where completed-push metrics go. A device scheduler holds one and calls
/// it once per successful push, in the same order the pushes completed —
/// schedulers never reorder or buffer events across pushes.
pub trait MetricsSink: Send + Sync {
    fn publish(&self, event: MetricsEvent);
}

/// Discards every event; the default for schedulers that have no
/// downstream subscriber configured.
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn publish(&self, _event: MetricsEvent) {}
}

/// Forwards events onto an unbounded channel. The bus-facing collaborator
/// that turns these into outbound telemetry messages lives outside this
/// crate; this sink is the seam it attaches to.
pub struct ChannelMetricsSink {
    sender: tokio::sync::mpsc::UnboundedSender<MetricsEvent>,
}

impl ChannelMetricsSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<MetricsEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MetricsSink for ChannelMetricsSink {
    fn publish(&self, event: MetricsEvent) {
        // The receiver may already be gone (shutdown); dropping the event
        // in that case is the correct behavior, not an error.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelMetricsSink::new();
        for i in 0..3 {
            sink.publish(MetricsEvent {
                device_host: "dev".into(),
                scene_name: "scene".into(),
                push_duration_ms: i,
                diff_pixel_count: 0,
                generation: 1,
                timestamp_ms: i,
            });
        }
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.push_duration_ms);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
