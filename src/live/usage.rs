//! Token usage estimation with a sliding per-minute window
//!
//! Costs are estimates for UI display, not billing: audio is charged per
//! second of captured samples, images at a flat rate, text per character
//! block. The ledger keeps timestamped samples so `tokens_per_minute`
//! decays as samples age out of the window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Token cost table, configurable instead of hard-coded at call sites.
#[derive(Debug, Clone)]
pub struct TokenCosts {
    /// Tokens charged per second of input audio
    pub audio_tokens_per_sec: f64,

    /// Flat token cost per image frame
    pub image_tokens: u32,

    /// Characters per text token (cost is `ceil(chars / this)`)
    pub chars_per_token: usize,

    /// Sliding window for the per-minute rate
    pub window: Duration,
}

impl Default for TokenCosts {
    fn default() -> Self {
        Self {
            audio_tokens_per_sec: 32.0,
            image_tokens: 258,
            chars_per_token: 4,
            window: Duration::from_secs(60),
        }
    }
}

impl TokenCosts {
    /// Cost of an audio block, using the actual capture rate (not the
    /// declared wire rate). Minimum 1 so short blocks are never free.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn audio_tokens(&self, sample_count: usize, sample_rate: u32) -> u32 {
        if sample_rate == 0 {
            return 1;
        }
        let duration_secs = sample_count as f64 / f64::from(sample_rate);
        let tokens = (duration_secs * self.audio_tokens_per_sec).ceil() as u32;
        tokens.max(1)
    }

    /// Cost of a text payload in either direction.
    #[must_use]
    pub fn text_tokens(&self, text: &str) -> u32 {
        self.tokens_for_chars(text.chars().count())
    }

    /// Cost of `chars` characters of text already counted elsewhere,
    /// e.g. an accumulated reply at turn completion.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tokens_for_chars(&self, chars: usize) -> u32 {
        chars.div_ceil(self.chars_per_token.max(1)) as u32
    }
}

/// Usage snapshot emitted to the UI after every accounting change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    /// Video frames sent this connection
    pub images_sent: u32,

    /// Completed model turns this connection
    pub model_turns: u32,

    /// Lifetime token estimate for this connection
    pub estimated_tokens: u64,

    /// Tokens recorded inside the sliding window
    pub tokens_per_minute: u32,
}

/// Timestamped token ledger, reset at every new connection.
#[derive(Debug)]
pub struct TokenLedger {
    window: Duration,
    samples: VecDeque<(Instant, u32)>,
    total_tokens: u64,
    images_sent: u32,
    model_turns: u32,
}

impl TokenLedger {
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            total_tokens: 0,
            images_sent: 0,
            model_turns: 0,
        }
    }

    /// Record a token cost at `now`.
    pub fn record(&mut self, tokens: u32, now: Instant) {
        if tokens == 0 {
            return;
        }
        self.samples.push_back((now, tokens));
        self.total_tokens += u64::from(tokens);
    }

    pub fn note_image(&mut self) {
        self.images_sent += 1;
    }

    pub fn note_turn(&mut self) {
        self.model_turns += 1;
    }

    /// Drop samples that have aged out of the window. Lifetime totals
    /// are unaffected.
    pub fn prune(&mut self, now: Instant) {
        while let Some((t, _)) = self.samples.front() {
            if now.saturating_duration_since(*t) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Sum of samples still inside the window at `now`.
    #[must_use]
    pub fn tokens_per_minute(&self, now: Instant) -> u32 {
        self.samples
            .iter()
            .filter(|(t, _)| now.saturating_duration_since(*t) < self.window)
            .map(|(_, tokens)| tokens)
            .sum()
    }

    /// Prune and build a UI snapshot.
    pub fn snapshot(&mut self, now: Instant) -> UsageStats {
        self.prune(now);
        UsageStats {
            images_sent: self.images_sent,
            model_turns: self.model_turns,
            estimated_tokens: self.total_tokens,
            tokens_per_minute: self.tokens_per_minute(now),
        }
    }

    /// Clear everything for a fresh connection.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.total_tokens = 0;
        self.images_sent = 0;
        self.model_turns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_block_costs_five_tokens() {
        let costs = TokenCosts::default();
        // 2048 samples at 16 kHz is 128 ms; 128 ms * 32 tokens/sec rounds up to 5
        assert_eq!(costs.audio_tokens(2048, 16000), 5);
    }

    #[test]
    fn tiny_blocks_cost_at_least_one_token() {
        let costs = TokenCosts::default();
        assert_eq!(costs.audio_tokens(16, 16000), 1);
        assert_eq!(costs.audio_tokens(0, 16000), 1);
    }

    #[test]
    fn audio_cost_uses_the_actual_rate() {
        let costs = TokenCosts::default();
        // Same sample count, double the rate, half the duration
        assert_eq!(costs.audio_tokens(48000, 48000), 32);
        assert_eq!(costs.audio_tokens(48000, 24000), 64);
    }

    #[test]
    fn text_cost_rounds_up_per_four_chars() {
        let costs = TokenCosts::default();
        assert_eq!(costs.text_tokens(""), 0);
        assert_eq!(costs.text_tokens("abcd"), 1);
        assert_eq!(costs.text_tokens("abcde"), 2);
    }

    #[test]
    fn window_decay_drops_rate_but_not_totals() {
        let t0 = Instant::now();
        let mut ledger = TokenLedger::new(Duration::from_secs(60));
        ledger.record(100, t0);

        let within = ledger.snapshot(t0 + Duration::from_secs(59));
        assert_eq!(within.tokens_per_minute, 100);
        assert_eq!(within.estimated_tokens, 100);

        let after = ledger.snapshot(t0 + Duration::from_secs(61));
        assert_eq!(after.tokens_per_minute, 0);
        assert_eq!(after.estimated_tokens, 100);
    }

    #[test]
    fn reset_clears_counters_for_a_new_connection() {
        let t0 = Instant::now();
        let mut ledger = TokenLedger::new(Duration::from_secs(60));
        ledger.record(10, t0);
        ledger.note_image();
        ledger.note_turn();
        ledger.reset();

        let stats = ledger.snapshot(t0);
        assert_eq!(stats, UsageStats {
            images_sent: 0,
            model_turns: 0,
            estimated_tokens: 0,
            tokens_per_minute: 0,
        });
    }
}
