//! Transport adapter (C1).
//!
//! A transport is a stateless sink: it accepts a packed frame for a device
//! and either delivers it to the real hardware or records it in memory for
//! tests, reporting how long the push took. Switching which variant backs
//! a device is the business of the command gateway, not the scheduler —
//! schedulers only ever see the [`Transport`] trait object.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};

/// A complete frame ready to be handed to a transport.
#[derive(Debug, Clone)]
pub struct PackedFrame {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major, top-left origin, RGB only.
    pub rgb: Vec<u8>,
}

/// A transport backend for a single device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `frame` to the device identified by `host`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the delivery failed or timed out.
    /// Implementations must not partially apply a frame: either it lands or
    /// the caller's `last-pushed` snapshot stays unchanged so the next push
    /// resends identical content.
    async fn push(&self, host: &str, frame: PackedFrame) -> Result<Duration>;
}

/// HTTP POST transport for the real device wire protocol: the frame is
/// chunked into protocol-defined packets and sent as the device's
/// documented envelope, one POST per packet.
pub struct RealTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    pic_id: AtomicU64,
    /// Bytes per HTTP POST packet; confirm against vendor documentation
    /// before relying on this value for a specific panel (see
    /// SPEC_FULL.md's carried-over open question on chunking boundaries).
    chunk_size: usize,
}

#[derive(Debug, Serialize)]
struct DeviceEnvelope<'a> {
    #[serde(rename = "command-name")]
    command_name: &'a str,
    #[serde(rename = "pic-num")]
    pic_num: u32,
    #[serde(rename = "pic-width")]
    pic_width: u32,
    #[serde(rename = "pic-offset")]
    pic_offset: usize,
    #[serde(rename = "pic-id")]
    pic_id: u64,
    #[serde(rename = "pic-data")]
    pic_data: String,
}

impl RealTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
            pic_id: AtomicU64::new(0),
            chunk_size: 4096,
        }
    }
}

#[async_trait]
impl Transport for RealTransport {
    async fn push(&self, host: &str, frame: PackedFrame) -> Result<Duration> {
        let started = Instant::now();
        let pic_id = self.pic_id.fetch_add(1, Ordering::SeqCst);

        for (offset, chunk) in frame.rgb.chunks(self.chunk_size).enumerate() {
            let envelope = DeviceEnvelope {
                command_name: "pic",
                pic_num: 1,
                pic_width: frame.width,
                pic_offset: offset * self.chunk_size,
                pic_id,
                pic_data: base64::encode(chunk),
            };

            let response = self
                .client
                .post(&self.base_url)
                .timeout(self.timeout)
                .json(&envelope)
                .send()
                .await
                .map_err(|source| Error::Transport {
                    device: host.to_string(),
                    source: source.into(),
                })?;

            if !response.status().is_success() {
                return Err(Error::Transport {
                    device: host.to_string(),
                    source: anyhow::anyhow!("device returned status {}", response.status()),
                });
            }
        }

        Ok(started.elapsed())
    }
}

/// In-memory transport used by tests and local development. Validates the
/// frame's byte length, sleeps for a configurable simulated duration, and
/// records every frame it receives.
pub struct MockTransport {
    expected_len: usize,
    simulated_push: AtomicU64,
    pushes: Mutex<Vec<PackedFrame>>,
}

impl MockTransport {
    pub fn new(width: u32, height: u32, simulated_push: Duration) -> Self {
        Self {
            expected_len: (width * height * 3) as usize,
            simulated_push: AtomicU64::new(simulated_push.as_millis() as u64),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Change the simulated push duration for subsequent pushes, without
    /// disturbing already-recorded history. Used by cadence tests that
    /// exercise the self-correcting fixed-cadence behavior mid-run.
    pub fn set_simulated_push(&self, duration: Duration) {
        self.simulated_push
            .store(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn last_frame(&self) -> Option<PackedFrame> {
        self.pushes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn push(&self, host: &str, frame: PackedFrame) -> Result<Duration> {
        if frame.rgb.len() != self.expected_len {
            return Err(Error::Transport {
                device: host.to_string(),
                source: anyhow::anyhow!(
                    "expected {} bytes, got {}",
                    self.expected_len,
                    frame.rgb.len()
                ),
            });
        }

        let started = Instant::now();
        let delay = self.simulated_push.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.pushes.lock().unwrap().push(frame);
        Ok(started.elapsed())
    }
}
