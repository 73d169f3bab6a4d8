//! Microphone capture and scheduled speaker playback

pub mod capture;
pub mod playback;

pub use capture::AudioCapture;
pub use playback::{PlaybackTuning, Player, Timeline};

/// Gain applied to raw RMS before clamping into a meter level.
const METER_GAIN: f32 = 4.0;

/// RMS energy of a sample block.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Cosmetic meter level in [0, 1] for UI volume bars.
#[must_use]
pub fn meter_level(samples: &[f32]) -> f32 {
    (rms(samples) * METER_GAIN).clamp(0.0, 1.0)
}
