//! Local speech synthesis for fallback replies
//!
//! When the realtime session is down, replies arrive as text and the
//! assistant still has to talk. `SpeechQueue` feeds sentences through an
//! OpenAI-compatible speech endpoint, decodes the MP3 response, and
//! schedules the samples on the shared [`Player`] in submission order.
//! A generation counter lets an interruption silently discard work that
//! was queued before it without tearing the worker down.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;

use crate::audio::Player;
use crate::{Error, Result};

const SPEECH_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";
const FALLBACK_DECODE_RATE: u32 = 24000;

/// Synthesis settings, shaped by the config layer.
#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub voice: String,
    pub model: String,
    pub speed: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            model: "tts-1".to_string(),
            speed: 1.0,
        }
    }
}

struct Job {
    generation: u64,
    text: String,
}

/// Ordered, cancellable speech synthesis queue.
#[derive(Clone)]
pub struct SpeechQueue {
    tx: Option<mpsc::UnboundedSender<Job>>,
    generation: Arc<AtomicU64>,
}

impl SpeechQueue {
    /// Start the synthesis worker. Jobs play in the order they were
    /// queued.
    #[must_use]
    pub fn start(api_key: SecretString, settings: SpeechSettings, player: Player) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let generation = Arc::new(AtomicU64::new(0));
        let worker_generation = Arc::clone(&generation);
        let synth = Synthesizer::new(api_key, settings);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if job.generation != worker_generation.load(Ordering::SeqCst) {
                    continue;
                }
                match synth.synthesize(&job.text).await {
                    Ok((samples, rate)) => {
                        // The request took time; the job may have been
                        // cancelled while it was in flight
                        if job.generation != worker_generation.load(Ordering::SeqCst) {
                            continue;
                        }
                        if let Err(e) = player.schedule(&samples, rate) {
                            tracing::warn!(error = %e, "failed to schedule speech audio");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "speech synthesis failed");
                    }
                }
            }
            tracing::debug!("speech worker stopped");
        });

        Self {
            tx: Some(tx),
            generation,
        }
    }

    /// A queue that accepts and drops everything. Used when no speech
    /// key is configured or speech is turned off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a sentence for synthesis. Returns whether it was accepted.
    pub fn enqueue(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let Some(tx) = &self.tx else {
            return false;
        };
        let job = Job {
            generation: self.generation.load(Ordering::SeqCst),
            text: text.to_string(),
        };
        tx.send(job).is_ok()
    }

    /// Drop every job queued up to now, including any in flight.
    pub fn cancel_pending(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// One-shot synthesis client against the OpenAI speech endpoint.
struct Synthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    settings: SpeechSettings,
}

impl Synthesizer {
    fn new(api_key: SecretString, settings: SpeechSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            settings,
        }
    }

    /// Synthesize text and decode the MP3 response to mono samples.
    /// Returns the samples and their sample rate.
    async fn synthesize(&self, text: &str) -> Result<(Vec<f32>, u32)> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = SpeechRequest {
            model: &self.settings.model,
            input: text,
            voice: &self.settings.voice,
            speed: self.settings.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(SPEECH_ENDPOINT)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("speech API error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        decode_mp3(&audio)
    }
}

/// Decode MP3 bytes to mono f32 samples plus the stream's sample rate.
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate.is_none() {
                    #[allow(clippy::cast_sign_loss)]
                    {
                        sample_rate = Some(frame.sample_rate as u32);
                    }
                }
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Tts(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate.unwrap_or(FALLBACK_DECODE_RATE)))
}
