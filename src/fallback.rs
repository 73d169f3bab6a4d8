//! Streaming text fallback for when no realtime session exists
//!
//! Typed messages always go through this path, and it carries the whole
//! conversation when the realtime socket is down. The reply streams back
//! over SSE; completed sentences are clipped off a rolling buffer and
//! handed to speech synthesis so the assistant starts talking before the
//! response finishes generating. Results flow back to the session as
//! [`FallbackUpdate`] values; the request task never touches session
//! state directly.

use std::time::Instant;

use base64::Engine;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;

use crate::live::protocol::{Content, FunctionDecl, IMAGE_MIME, Part, Tool};
use crate::pcm::BASE64;
use crate::speech::SpeechQueue;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Base URL for the non-realtime generation endpoint
pub const DEFAULT_GENERATE_BASE: &str = "https://generativelanguage.googleapis.com";

/// Hint prepended when no frame is available but sharing was never
/// explicitly paused, which covers both a feed that is still syncing
/// and one that never started
pub const HINT_FEED_SYNCING: &str = "The video feed has not synced yet, so no screen frame is available. Do not assume any on-screen content.";

/// Hint prepended when no screen is being shared
pub const HINT_NO_SCREEN: &str = "No screen is currently shared. Do not assume any on-screen content.";

/// Everything the request task needs, snapshotted before spawning so the
/// session can keep mutating its own state.
pub struct FallbackRequest {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
    pub text: String,
    pub frame: Option<Vec<u8>>,
    pub video_paused: bool,
    pub system_instruction: String,
    pub declarations: Vec<FunctionDecl>,
}

/// Progress reported back to the session.
#[derive(Debug)]
pub enum FallbackUpdate {
    /// A reply text delta
    Delta(String),
    /// A mid-stream tool call, already executed; informational only
    ToolNote(String),
    /// Clean end of stream
    Done { first_token_ms: Option<u64> },
    /// The request or stream failed
    Failed { message: String },
}

/// Build the user-content parts for a fallback turn. With a cached frame
/// the text and image travel as separate parts; without one the text is
/// prefixed with a hint saying why there is no image, so the model does
/// not invent on-screen content.
#[must_use]
pub fn build_user_parts(text: &str, frame: Option<&[u8]>, video_paused: bool) -> Vec<Part> {
    match frame {
        Some(bytes) => vec![
            Part::text(text),
            Part::inline(IMAGE_MIME, BASE64.encode(bytes)),
        ],
        None => {
            let hint = if video_paused {
                HINT_NO_SCREEN
            } else {
                HINT_FEED_SYNCING
            };
            vec![Part::text(format!("{hint}\n\n{text}"))]
        }
    }
}

/// Run one fallback request to completion, reporting progress on
/// `updates`. Failures become a [`FallbackUpdate::Failed`] rather than an
/// error; the session surfaces them as a system transcript entry.
pub async fn run(
    request: FallbackRequest,
    registry: ToolRegistry,
    speech: SpeechQueue,
    updates: mpsc::UnboundedSender<FallbackUpdate>,
) {
    if let Err(e) = stream_reply(request, &registry, &speech, &updates).await {
        tracing::warn!(error = %e, "fallback request failed");
        let _ = updates.send(FallbackUpdate::Failed {
            message: e.to_string(),
        });
    }
}

async fn stream_reply(
    request: FallbackRequest,
    registry: &ToolRegistry,
    speech: &SpeechQueue,
    updates: &mpsc::UnboundedSender<FallbackUpdate>,
) -> Result<()> {
    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct GenerateRequest {
        contents: Vec<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        system_instruction: Option<Content>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tools: Vec<Tool>,
    }

    let url = format!(
        "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
        request.base_url,
        request.model,
        request.api_key.expose_secret()
    );

    let parts = build_user_parts(&request.text, request.frame.as_deref(), request.video_paused);
    let body = GenerateRequest {
        contents: vec![Content::user(parts)],
        system_instruction: Some(Content::text(&request.system_instruction)),
        tools: if request.declarations.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: request.declarations,
            }]
        },
    };

    let started = Instant::now();
    let response = reqwest::Client::new().post(&url).json(&body).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        return Err(Error::Fallback(format!(
            "generation request failed with {status}: {detail}"
        )));
    }

    let mut splitter = SentenceSplitter::new();
    let mut first_token_ms = None;
    let mut buffer = String::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() || payload == "[DONE]" {
                continue;
            }

            let parsed = parse_chunk(payload)?;
            for part in parsed {
                match part {
                    ReplyPart::Text(text) => {
                        if first_token_ms.is_none() {
                            #[allow(clippy::cast_possible_truncation)]
                            {
                                first_token_ms = Some(started.elapsed().as_millis() as u64);
                            }
                        }
                        for sentence in splitter.push(&text) {
                            speech.enqueue(&sentence);
                        }
                        if updates.send(FallbackUpdate::Delta(text)).is_err() {
                            return Ok(());
                        }
                    }
                    ReplyPart::Call { name, args } => {
                        let result = registry.execute(&name, &args);
                        let note = format!("Tool {name}: {result}");
                        if updates.send(FallbackUpdate::ToolNote(note)).is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    if let Some(rest) = splitter.flush() {
        speech.enqueue(&rest);
    }
    let _ = updates.send(FallbackUpdate::Done { first_token_ms });
    Ok(())
}

enum ReplyPart {
    Text(String),
    Call { name: String, args: serde_json::Value },
}

/// Pull text and tool-call parts out of one SSE payload.
fn parse_chunk(payload: &str) -> Result<Vec<ReplyPart>> {
    #[derive(serde::Deserialize, Default)]
    #[serde(rename_all = "camelCase", default)]
    struct GenerateChunk {
        candidates: Vec<Candidate>,
    }

    #[derive(serde::Deserialize, Default)]
    #[serde(rename_all = "camelCase", default)]
    struct Candidate {
        content: Option<Content>,
    }

    let chunk: GenerateChunk = serde_json::from_str(payload)
        .map_err(|e| Error::Fallback(format!("unparseable stream chunk: {e}")))?;

    let mut parts = Vec::new();
    for candidate in chunk.candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    parts.push(ReplyPart::Text(text));
                }
            }
            if let Some(call) = part.function_call {
                parts.push(ReplyPart::Call {
                    name: call.name,
                    args: call.args.unwrap_or_else(|| serde_json::json!({})),
                });
            }
        }
    }
    Ok(parts)
}

/// Clips completed sentences off a rolling text buffer.
///
/// A sentence ends at `.`, `!`, or `?` followed by whitespace. The
/// minimum-length guard keeps abbreviations and decimals ("e.g.",
/// "3.14") from splitting; punctuation at the very end of the buffer
/// waits for more input, since a decimal may continue in the next delta.
/// `flush` hands back whatever remains.
pub struct SentenceSplitter {
    buffer: String,
    min_len: usize,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceSplitter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
            min_len: 8,
        }
    }

    /// Append a delta and return any sentences it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        while let Some(split_at) = self.boundary() {
            let sentence: String = self.buffer.drain(..split_at).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Whatever is left in the buffer, if anything.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    fn boundary(&self) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if !matches!(b, b'.' | b'!' | b'?') {
                continue;
            }
            let followed_by_space = bytes.get(i + 1).is_some_and(u8::is_ascii_whitespace);
            if followed_by_space && i + 1 >= self.min_len {
                return Some(i + 1);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_completed_sentences() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.push("Hello there. How are you today? Still ty");
        assert_eq!(sentences, vec!["Hello there.", "How are you today?"]);
        assert_eq!(splitter.flush(), Some("Still ty".to_string()));
    }

    #[test]
    fn decimals_do_not_split() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Pi is about 3.").is_empty());
        let sentences = splitter.push("14159, roughly. And tau is double that. ");
        assert_eq!(
            sentences,
            vec![
                "Pi is about 3.14159, roughly.",
                "And tau is double that."
            ]
        );
    }

    #[test]
    fn short_fragments_merge_into_the_next_sentence() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.push("E.g. this one works fine. ");
        assert_eq!(sentences, vec!["E.g. this one works fine."]);
    }

    #[test]
    fn flush_on_empty_buffer_is_none() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.flush().is_none());
        splitter.push("Done here. ");
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn deltas_can_split_mid_word() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Hel").is_empty());
        let sentences = splitter.push("lo world. Nex");
        assert_eq!(sentences, vec!["Hello world."]);
        assert_eq!(splitter.flush(), Some("Nex".to_string()));
    }

    #[test]
    fn missing_frame_prepends_the_sync_hint() {
        let parts = build_user_parts("ping", None, false);
        assert_eq!(parts.len(), 1);
        let text = parts[0].text.as_deref().unwrap();
        assert!(text.starts_with(HINT_FEED_SYNCING));
        assert!(text.ends_with("ping"));
    }

    #[test]
    fn paused_video_prepends_the_no_screen_hint() {
        let parts = build_user_parts("ping", None, true);
        let text = parts[0].text.as_deref().unwrap();
        assert!(text.starts_with(HINT_NO_SCREEN));
    }

    #[test]
    fn cached_frame_becomes_an_inline_part() {
        let parts = build_user_parts("what do you see?", Some(&[0xFF, 0xD8, 0xFF]), false);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.as_deref(), Some("what do you see?"));
        let blob = parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, IMAGE_MIME);
        assert!(!blob.data.is_empty());
    }

    #[test]
    fn chunk_parsing_extracts_text_and_calls() {
        let payload = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Sure, adding it. "},
                        {"functionCall": {"name": "add_task", "args": {"title": "ship"}}}
                    ]
                }
            }]
        }"#;
        let parts = parse_chunk(payload).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], ReplyPart::Text(t) if t.starts_with("Sure")));
        assert!(matches!(&parts[1], ReplyPart::Call { name, .. } if name == "add_task"));
    }

    #[test]
    fn malformed_chunk_is_an_error() {
        assert!(parse_chunk("not json").is_err());
    }
}
