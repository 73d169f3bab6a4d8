//! Audio capture from the microphone
//!
//! Targets 16 kHz mono for speech uplink. When the device cannot do that
//! natively the default input config is used instead and the actual rate
//! is reported, so token accounting and the declared wire rate stay
//! truthful. Captured frames accumulate in a shared buffer; the session
//! loop drains whole fixed-size blocks.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Preferred sample rate for speech capture
pub const CAPTURE_RATE: u32 = 16000;

/// Captures audio from the default input device.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
    block_size: usize,
}

impl AudioCapture {
    /// Open the default input device, preferring 16 kHz mono.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available or it reports no
    /// usable configs.
    pub fn new(block_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(CAPTURE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(CAPTURE_RATE)).config())
            .map_or_else(
                || {
                    device
                        .default_input_config()
                        .map(|c| c.config())
                        .map_err(|e| Error::Audio(e.to_string()))
                },
                Ok,
            )?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            block_size,
        })
    }

    /// Start capturing. Safe to call when already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the input stream cannot be built or started.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let channels = usize::from(self.config.channels);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let Ok(mut buf) = buffer.lock() else {
                        return;
                    };
                    if channels == 1 {
                        buf.extend_from_slice(data);
                    } else {
                        // Downmix interleaved frames to mono
                        #[allow(clippy::cast_precision_loss)]
                        buf.extend(
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                        );
                    }
                },
                |err| {
                    tracing::warn!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing and release the stream.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Drain every complete block captured since the last call. A partial
    /// block stays buffered for the next drain.
    #[must_use]
    pub fn drain_blocks(&self) -> Vec<Vec<f32>> {
        let Ok(mut buf) = self.buffer.lock() else {
            return Vec::new();
        };
        let mut blocks = Vec::new();
        while buf.len() >= self.block_size {
            blocks.push(buf.drain(..self.block_size).collect());
        }
        blocks
    }

    /// Samples currently buffered, without draining.
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    /// Discard everything buffered so far.
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// The rate frames are actually captured at.
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }
}
