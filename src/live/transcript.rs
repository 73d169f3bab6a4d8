//! Live transcript accumulation and merge rules
//!
//! Both directions accumulate streaming deltas independently. A non-final
//! update for a speaker collapses into that speaker's most recent entry
//! when that entry is itself non-final, so interleaved directions each
//! keep one open row; a final entry is never modified afterward. Turn
//! completion flushes an accumulator into exactly one final entry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
    System,
}

impl Speaker {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One transcript entry. Mutable only while `is_final` is false.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub message: String,
    pub is_final: bool,
    /// Milliseconds from turn start to first model audio, when measured
    pub response_time_ms: Option<u64>,
}

impl LogEntry {
    #[must_use]
    pub fn new(speaker: Speaker, message: String, is_final: bool, response_time_ms: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            speaker,
            message,
            is_final,
            response_time_ms,
        }
    }
}

/// Ordered transcript plus the two streaming accumulators.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<LogEntry>,
    input_acc: String,
    output_acc: String,
}

impl TranscriptLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Character length of the unflushed model output accumulator.
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.output_acc.chars().count()
    }

    /// Clear both accumulators without touching past entries. Called on
    /// every new connection.
    pub fn reset_accumulators(&mut self) {
        self.input_acc.clear();
        self.output_acc.clear();
    }

    /// Append a user speech delta and return the updated visible entry.
    pub fn append_input(&mut self, delta: &str) -> LogEntry {
        self.input_acc.push_str(delta);
        let text = self.input_acc.clone();
        self.upsert(Speaker::User, text, None)
    }

    /// Append a model output delta and return the updated visible entry.
    pub fn append_output(&mut self, delta: &str, response_time_ms: Option<u64>) -> LogEntry {
        self.output_acc.push_str(delta);
        let text = self.output_acc.clone();
        self.upsert(Speaker::Assistant, text, response_time_ms)
    }

    /// Surface the current (possibly empty) output accumulator early,
    /// attaching the measured response latency. Used when the first audio
    /// of a turn arrives before its transcription.
    pub fn preview_output(&mut self, response_time_ms: Option<u64>) -> LogEntry {
        let text = self.output_acc.clone();
        self.upsert(Speaker::Assistant, text, response_time_ms)
    }

    /// Flush the input accumulator into a final entry, if non-empty.
    pub fn finalize_input(&mut self) -> Option<LogEntry> {
        if self.input_acc.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.input_acc);
        Some(self.mark_final(Speaker::User, text, None))
    }

    /// Flush the output accumulator into a final entry, if non-empty.
    pub fn finalize_output(&mut self, response_time_ms: Option<u64>) -> Option<LogEntry> {
        if self.output_acc.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.output_acc);
        Some(self.mark_final(Speaker::Assistant, text, response_time_ms))
    }

    /// Append an already-final entry (typed user messages, system notes).
    pub fn push_final(
        &mut self,
        speaker: Speaker,
        message: impl Into<String>,
        response_time_ms: Option<u64>,
    ) -> LogEntry {
        let entry = LogEntry::new(speaker, message.into(), true, response_time_ms);
        self.entries.push(entry.clone());
        entry
    }

    /// Index of this speaker's open entry: their most recent one, and
    /// only while it is still non-final.
    fn open_entry(&self, speaker: Speaker) -> Option<usize> {
        let idx = self.entries.iter().rposition(|e| e.speaker == speaker)?;
        if self.entries[idx].is_final {
            None
        } else {
            Some(idx)
        }
    }

    /// Non-final update: replace the speaker's open entry if one exists,
    /// otherwise append. A finalized entry is never overwritten.
    fn upsert(&mut self, speaker: Speaker, text: String, response_time_ms: Option<u64>) -> LogEntry {
        if let Some(idx) = self.open_entry(speaker) {
            let entry = &mut self.entries[idx];
            entry.message = text;
            if response_time_ms.is_some() {
                entry.response_time_ms = response_time_ms;
            }
            return entry.clone();
        }
        let entry = LogEntry::new(speaker, text, false, response_time_ms);
        self.entries.push(entry.clone());
        entry
    }

    /// Finalize the speaker's open entry in place, otherwise append a
    /// fresh final entry.
    fn mark_final(&mut self, speaker: Speaker, text: String, response_time_ms: Option<u64>) -> LogEntry {
        if let Some(idx) = self.open_entry(speaker) {
            let entry = &mut self.entries[idx];
            entry.message = text;
            entry.is_final = true;
            if response_time_ms.is_some() {
                entry.response_time_ms = response_time_ms;
            }
            return entry.clone();
        }
        let entry = LogEntry::new(speaker, text, true, response_time_ms);
        self.entries.push(entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_collapse_into_one_final_entry() {
        let mut log = TranscriptLog::new();
        log.append_output("Hel", None);
        log.append_output("lo", None);
        let entry = log.finalize_output(Some(420)).unwrap();

        assert_eq!(entry.message, "Hello");
        assert!(entry.is_final);
        assert_eq!(entry.response_time_ms, Some(420));
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.output_len(), 0);
    }

    #[test]
    fn final_entries_are_never_replaced() {
        let mut log = TranscriptLog::new();
        log.push_final(Speaker::Assistant, "done", None);
        log.append_output("next", None);

        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[0].message, "done");
        assert!(!log.entries()[1].is_final);
        assert_eq!(log.entries()[1].message, "next");
    }

    #[test]
    fn directions_accumulate_independently() {
        let mut log = TranscriptLog::new();
        log.append_input("what is ");
        log.append_output("The answer", None);
        log.append_input("this?");

        // Interleaving keeps one open entry per speaker, in first-seen order
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[0].message, "what is this?");
        assert_eq!(log.entries()[1].message, "The answer");

        let user = log.finalize_input().unwrap();
        assert_eq!(user.message, "what is this?");
        let ai = log.finalize_output(None).unwrap();
        assert_eq!(ai.message, "The answer");
        assert_eq!(log.entries().len(), 2);
        assert!(log.entries().iter().all(|e| e.is_final));
    }

    #[test]
    fn preview_surfaces_an_empty_accumulator() {
        let mut log = TranscriptLog::new();
        let entry = log.preview_output(Some(95));
        assert_eq!(entry.message, "");
        assert!(!entry.is_final);
        assert_eq!(entry.response_time_ms, Some(95));

        // The streamed text later replaces the empty preview in place
        let updated = log.append_output("Sure.", None);
        assert_eq!(updated.id, entry.id);
        assert_eq!(log.entries().len(), 1);
        assert_eq!(updated.response_time_ms, Some(95));
    }

    #[test]
    fn finalize_of_empty_accumulators_is_a_no_op() {
        let mut log = TranscriptLog::new();
        assert!(log.finalize_input().is_none());
        assert!(log.finalize_output(None).is_none());
        assert!(log.entries().is_empty());
    }

    #[test]
    fn finalize_reaches_past_interleaved_entries() {
        let mut log = TranscriptLog::new();
        log.append_input("hi there");
        log.push_final(Speaker::System, "tool ran", None);

        // A system entry in between does not orphan the open user entry
        let user = log.finalize_input().unwrap();
        assert!(user.is_final);
        assert_eq!(log.entries().len(), 2);
        assert!(log.entries()[0].is_final);
        assert_eq!(log.entries()[1].speaker, Speaker::System);
    }
}
