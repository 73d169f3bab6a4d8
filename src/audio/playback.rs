//! Scheduled audio playback to speakers
//!
//! Reply audio arrives as a stream of PCM chunks that must play gaplessly.
//! A `Timeline` keeps a forward cursor: a chunk that arrives while the
//! cursor is behind the wall clock is pushed out by a small lookahead and
//! gets a fade-in ramp to mask the discontinuity; a chunk extending an
//! ongoing reply starts exactly at the cursor with no fade. The `Mixer`
//! renders due chunks inside the cpal callback and drops them as they
//! finish. `Player` is the cheap-clone handle the session and speech
//! synthesis share; `Player::detached` runs the same core without a
//! device so scheduling is testable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use crate::{Error, Result};

/// Scheduling knobs, clamped to sane ranges at construction.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackTuning {
    /// Gap between "now" and a freshly scheduled chunk when the cursor
    /// has fallen behind
    pub lookahead_ms: u64,

    /// Fade-in ramp length for gap-scheduled chunks (5 to 20 ms)
    pub fade_ms: u64,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            lookahead_ms: 50,
            fade_ms: 15,
        }
    }
}

/// Planning decision for one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    /// Start time in seconds on the playback clock
    pub start: f64,
    /// Whether the chunk begins a new run and needs a fade-in
    pub fade_in: bool,
}

/// Forward scheduling cursor. Never regresses while chunks are only
/// appended; `reset` is the single rewind point.
#[derive(Debug)]
pub struct Timeline {
    next_start: f64,
    lookahead: f64,
}

impl Timeline {
    #[must_use]
    pub const fn new(lookahead: f64) -> Self {
        Self {
            next_start: 0.0,
            lookahead,
        }
    }

    /// Plan the next chunk of `duration` seconds given the current clock.
    pub fn plan(&mut self, now: f64, duration: f64) -> Slot {
        let (start, fade_in) = if self.next_start <= now {
            (now + self.lookahead, true)
        } else {
            (self.next_start, false)
        };
        self.next_start = start + duration;
        Slot { start, fade_in }
    }

    /// Rewind the cursor to `now`. Used when pending output is stopped.
    pub fn reset(&mut self, now: f64) {
        self.next_start = now;
    }

    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }
}

/// One scheduled mono chunk at device rate.
struct Chunk {
    start_frame: u64,
    samples: Vec<f32>,
    fade_frames: u32,
}

/// Shared playback core. Lives behind a mutex reached from the cpal
/// callback, the session actor, and test drivers.
struct Mixer {
    sample_rate: u32,
    clock: u64,
    timeline: Timeline,
    fade_frames: u32,
    chunks: Vec<Chunk>,
    level: f32,
}

impl Mixer {
    fn new(sample_rate: u32, tuning: PlaybackTuning) -> Self {
        let fade_ms = tuning.fade_ms.clamp(5, 20);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let fade_frames = (u64::from(sample_rate) * fade_ms / 1000) as u32;
        #[allow(clippy::cast_precision_loss)]
        let lookahead = tuning.lookahead_ms as f64 / 1000.0;
        Self {
            sample_rate,
            clock: 0,
            timeline: Timeline::new(lookahead),
            fade_frames,
            chunks: Vec::new(),
            level: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn clock_secs(&self) -> f64 {
        self.clock as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn insert(&mut self, samples: Vec<f32>) {
        let duration = samples.len() as f64 / f64::from(self.sample_rate);
        let now = self.clock_secs();
        let slot = self.timeline.plan(now, duration);
        let start_frame = (slot.start * f64::from(self.sample_rate)).round() as u64;
        let fade_frames = if slot.fade_in { self.fade_frames } else { 0 };
        self.chunks.push(Chunk {
            start_frame,
            samples,
            fade_frames,
        });
    }

    fn stop_all(&mut self) {
        self.chunks.clear();
        let now = self.clock_secs();
        self.timeline.reset(now);
    }

    /// Mix due chunks into the interleaved output buffer and advance the
    /// clock. Finished chunks remove themselves.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let mut peak = 0.0f32;
        for frame in out.chunks_mut(channels.max(1)) {
            let t = self.clock;
            let mut mixed = 0.0f32;
            for chunk in &self.chunks {
                if t < chunk.start_frame {
                    continue;
                }
                let idx = (t - chunk.start_frame) as usize;
                if idx >= chunk.samples.len() {
                    continue;
                }
                let mut sample = chunk.samples[idx];
                if chunk.fade_frames > 0 && (idx as u32) < chunk.fade_frames {
                    sample *= idx as f32 / chunk.fade_frames as f32;
                }
                mixed += sample;
            }
            let mixed = mixed.clamp(-1.0, 1.0);
            for slot in frame.iter_mut() {
                *slot = mixed;
            }
            peak = peak.max(mixed.abs());
            self.clock += 1;
        }
        self.level = peak;
        let clock = self.clock;
        self.chunks
            .retain(|c| c.start_frame + c.samples.len() as u64 > clock);
    }
}

/// Cheap-clone handle to the playback engine.
#[derive(Clone)]
pub struct Player {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Player {
    /// Open the default output device on a dedicated thread and start
    /// rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device offers an f32 config or the
    /// stream cannot be built.
    pub fn start(tuning: PlaybackTuning) -> Result<Self> {
        let config = probe_output()?;
        let sample_rate = config.sample_rate.0;
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate, tuning)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_mixer = Arc::clone(&mixer);
        let thread_shutdown = Arc::clone(&shutdown);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        // cpal streams are not Send, so one thread owns the stream for
        // the life of the engine.
        std::thread::Builder::new()
            .name("spyglass-playback".to_string())
            .spawn(move || match open_output_stream(&config, &thread_mixer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while !thread_shutdown.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    drop(stream);
                    tracing::debug!("playback stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited".to_string()))??;

        tracing::debug!(sample_rate, "audio playback started");
        Ok(Self {
            mixer,
            sample_rate,
            shutdown: Some(shutdown),
        })
    }

    /// The same scheduling core without a device. Time advances only
    /// through [`Player::render`].
    #[must_use]
    pub fn detached(sample_rate: u32, tuning: PlaybackTuning) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate, tuning))),
            sample_rate,
            shutdown: None,
        }
    }

    /// Resample a mono chunk to the device rate and schedule it at the
    /// cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if resampling fails.
    pub fn schedule(&self, samples: &[f32], src_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let converted = if src_rate == self.sample_rate {
            samples.to_vec()
        } else {
            resample(samples, src_rate, self.sample_rate)?
        };
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.insert(converted);
        }
        Ok(())
    }

    /// Drop every pending chunk and rewind the cursor to now.
    pub fn stop_all(&self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop_all();
        }
    }

    /// Playback clock in seconds.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.mixer.lock().map(|m| m.clock_secs()).unwrap_or_default()
    }

    /// Cursor position the next chunk would be planned against.
    #[must_use]
    pub fn cursor(&self) -> f64 {
        self.mixer
            .lock()
            .map(|m| m.timeline.next_start())
            .unwrap_or_default()
    }

    /// Peak output level of the last rendered buffer, in [0, 1].
    #[must_use]
    pub fn output_level(&self) -> f32 {
        self.mixer.lock().map(|m| m.level).unwrap_or_default()
    }

    /// Number of chunks still scheduled or playing.
    #[must_use]
    pub fn pending_chunks(&self) -> usize {
        self.mixer.lock().map(|m| m.chunks.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_chunks() == 0
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Render into an interleaved buffer, advancing the clock. The cpal
    /// callback uses the same path; tests drive it manually.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.render(out, channels);
        } else {
            out.fill(0.0);
        }
    }

    /// Stop the device thread. Pending audio is discarded.
    pub fn shutdown(&self) {
        if let Some(flag) = &self.shutdown {
            flag.store(true, Ordering::Relaxed);
        }
    }
}

/// Pick an f32 output config, preferring the device default.
fn probe_output() -> Result<StreamConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let default = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    if default.sample_format() == SampleFormat::F32 {
        return Ok(default.config());
    }

    device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .max_by_key(|c| c.max_sample_rate().0)
        .map(|c| c.with_max_sample_rate().config())
        .ok_or_else(|| Error::Audio("no f32 output config found".to_string()))
}

fn open_output_stream(
    config: &StreamConfig,
    mixer: &Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let callback_mixer = Arc::clone(mixer);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if let Ok(mut m) = callback_mixer.lock() {
                    m.render(data, channels);
                } else {
                    data.fill(0.0);
                }
            },
            |err| {
                tracing::warn!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Resample mono audio with rubato. The final partial chunk is zero
/// padded and the output trimmed back to the expected length, so chunk
/// duration survives the conversion.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler = FftFixedIn::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        chunk_size,
        sub_chunks,
        1,
    )
    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;

    let mut input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    input.resize(input.len().div_ceil(chunk_size) * chunk_size, 0.0);

    let mut output = Vec::with_capacity(expected + chunk_size);
    for chunk in input.chunks(chunk_size) {
        let result = resampler
            .process(&[chunk.to_vec()], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    // Drain the resampler latency so the tail is not lost
    if let Ok(result) = resampler.process_partial::<Vec<f64>>(None, None) {
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    output.truncate(expected);
    Ok(output)
}
