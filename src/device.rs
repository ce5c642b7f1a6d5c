//! The device data model (§3) and the frame pipeline's push operation (C5).
//!
//! A [`Device`] owns the framebuffer, the last-pushed snapshot used for
//! diffing, and the push counters. It is moved into its scheduler's task at
//! construction and never shared — nothing outside that task may mutate or
//! read the live framebuffer, matching the concurrency model's requirement
//! that C1 only ever see the snapshot a push produced.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::Result;
use crate::framebuffer::Framebuffer;
use crate::metrics::{MetricsEvent, MetricsSink};
use crate::transport::{PackedFrame, Transport};

/// Monotonic push counters for a device. Only `total_pushes`,
/// `skipped_pushes` and `errors` are monotonic; `last_push_duration_ms`
/// reflects only the most recent successful push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushMetrics {
    pub total_pushes: u64,
    pub skipped_pushes: u64,
    pub errors: u64,
    pub last_push_duration_ms: Option<u64>,
}

/// Static geometry of a device's pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

pub struct Device {
    pub host: String,
    pub geometry: Geometry,
    pub framebuffer: Framebuffer,
    last_pushed: Framebuffer,
    pub metrics: PushMetrics,
    transport: Arc<dyn Transport>,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl Device {
    pub fn new(
        host: impl Into<String>,
        geometry: Geometry,
        transport: Arc<dyn Transport>,
        metrics_sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            host: host.into(),
            geometry,
            framebuffer: Framebuffer::new(geometry.width, geometry.height),
            last_pushed: Framebuffer::new(geometry.width, geometry.height),
            metrics: PushMetrics::default(),
            transport,
            metrics_sink,
        }
    }

    /// Swap the transport backing this device. Callers must ensure no push
    /// is in flight — the scheduler only calls this from the `stopping`
    /// state.
    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = transport;
    }

    /// Snapshot the current framebuffer, diff it against the last
    /// successfully pushed snapshot, and — unless the diff is empty and
    /// `force` is false — hand the bytes to the transport.
    ///
    /// On success, `last_pushed` is updated and a [`MetricsEvent`] is
    /// published. On failure, `last_pushed` is left untouched so the next
    /// push resends identical content, per the error-handling design for
    /// transport failures.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the underlying transport failed.
    pub async fn push(
        &mut self,
        scene_name: &str,
        generation: u64,
        force: bool,
    ) -> Result<usize> {
        let diff = self.framebuffer.diff_count(&self.last_pushed);

        if diff == 0 && !force {
            self.metrics.skipped_pushes += 1;
            return Ok(0);
        }

        let frame = PackedFrame {
            width: self.geometry.width,
            height: self.geometry.height,
            rgb: self.framebuffer.to_rgb_bytes(),
        };

        match self.transport.push(&self.host, frame).await {
            Ok(duration) => {
                self.last_pushed = self.framebuffer.clone();
                self.metrics.total_pushes += 1;
                self.metrics.last_push_duration_ms = Some(duration.as_millis() as u64);

                let timestamp_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;

                self.metrics_sink.publish(MetricsEvent {
                    device_host: self.host.clone(),
                    scene_name: scene_name.to_string(),
                    push_duration_ms: duration.as_millis() as u64,
                    diff_pixel_count: diff,
                    generation,
                    timestamp_ms,
                });

                info!(
                    device = %self.host,
                    scene = scene_name,
                    diff_pixels = diff,
                    duration_ms = duration.as_millis() as u64,
                    "push complete"
                );

                Ok(diff)
            }
            Err(err) => {
                self.metrics.errors += 1;
                warn!(device = %self.host, scene = scene_name, error = %err, "push failed");
                Err(err)
            }
        }
    }
}

/// The drawing surface a scene's execution context exposes as `ctx.device`.
///
/// Wraps a device's live framebuffer for drawing (via `Deref`/`DerefMut`)
/// and carries the one operation the contract table lists alongside the
/// drawing primitives: `push`, scoped to the scene and generation that are
/// currently active so the resulting metrics event is correctly attributed.
pub struct DrawSurface<'a> {
    device: &'a mut Device,
    scene_name: String,
    generation: u64,
}

impl<'a> DrawSurface<'a> {
    pub fn new(device: &'a mut Device, scene_name: impl Into<String>, generation: u64) -> Self {
        Self {
            device,
            scene_name: scene_name.into(),
            generation,
        }
    }

    /// Snapshot the buffer, diff it, and hand it to the transport. See
    /// [`Device::push`] for the full contract.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the push failed.
    pub async fn push(&mut self, force: bool) -> Result<usize> {
        self.device
            .push(&self.scene_name, self.generation, force)
            .await
    }
}

impl Deref for DrawSurface<'_> {
    type Target = Framebuffer;

    fn deref(&self) -> &Framebuffer {
        &self.device.framebuffer
    }
}

impl DerefMut for DrawSurface<'_> {
    fn deref_mut(&mut self) -> &mut Framebuffer {
        &mut self.device.framebuffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullMetricsSink;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn device() -> Device {
        Device::new(
            "dev",
            Geometry {
                width: 2,
                height: 2,
            },
            Arc::new(MockTransport::new(2, 2, Duration::from_millis(0))),
            Arc::new(NullMetricsSink),
        )
    }

    #[tokio::test]
    async fn identical_successive_pushes_are_elided() {
        let mut dev = device();
        let first = dev.push("scene", 1, false).await.unwrap();
        let second = dev.push("scene", 1, false).await.unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 0);
        assert_eq!(dev.metrics.skipped_pushes, 2);
        assert_eq!(dev.metrics.total_pushes, 0);
    }

    #[tokio::test]
    async fn a_draw_forces_a_real_push_with_matching_diff() {
        let mut dev = device();
        dev.framebuffer
            .draw_pixel(0, 0, crate::framebuffer::Rgba::opaque(1, 2, 3));
        let diff = dev.push("scene", 1, false).await.unwrap();
        assert_eq!(diff, 1);
        assert_eq!(dev.metrics.total_pushes, 1);
        assert_eq!(dev.metrics.skipped_pushes, 0);
    }

    #[tokio::test]
    async fn failed_push_leaves_last_pushed_unchanged() {
        let mut dev = Device::new(
            "dev",
            Geometry {
                width: 2,
                height: 2,
            },
            Arc::new(MockTransport::new(9, 9, Duration::from_millis(0))),
            Arc::new(NullMetricsSink),
        );
        dev.framebuffer
            .draw_pixel(0, 0, crate::framebuffer::Rgba::opaque(1, 2, 3));
        let err = dev.push("scene", 1, false).await;
        assert!(err.is_err());
        assert_eq!(dev.metrics.errors, 1);

        // Retrying after the transport failure should see the same diff
        // again, because last_pushed was never advanced.
        let diff_again = dev.framebuffer.diff_count(&dev.last_pushed);
        assert_eq!(diff_again, 1);
    }
}
