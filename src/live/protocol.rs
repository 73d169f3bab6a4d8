//! Wire types for the bidirectional realtime generation protocol
//!
//! One JSON object per WebSocket frame in each direction. Outbound frames
//! are single-key objects (`setup`, `realtimeInput`, `clientContent`,
//! `toolResponse`); inbound frames carry any combination of the
//! `ServerMessage` fields, so everything deserializes with defaults and
//! unknown fields are ignored.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Capture rate requested from the microphone and declared on uplink audio
pub const AUDIO_INPUT_RATE: u32 = 16000;

/// Rate the backend synthesizes reply audio at, absent a mime override
pub const AUDIO_OUTPUT_RATE: u32 = 24000;

/// Mime type for uplink video frames
pub const IMAGE_MIME: &str = "image/jpeg";

/// Mime string for a PCM stream at `rate`
#[must_use]
pub fn audio_mime(rate: u32) -> String {
    format!("audio/pcm;rate={rate}")
}

/// Extract the sample rate from an `audio/pcm;rate=N` mime string,
/// defaulting to the standard output rate.
#[must_use]
pub fn mime_rate(mime: &str) -> u32 {
    mime.split(';')
        .find_map(|part| part.trim().strip_prefix("rate="))
        .and_then(|rate| rate.parse().ok())
        .unwrap_or(AUDIO_OUTPUT_RATE)
}

/// Frames sent to the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Setup {
        setup: Setup,
    },
    RealtimeInput {
        #[serde(rename = "realtimeInput")]
        realtime_input: RealtimeInput,
    },
    ClientContent {
        #[serde(rename = "clientContent")]
        client_content: ClientContent,
    },
    ToolResponse {
        #[serde(rename = "toolResponse")]
        tool_response: ToolResponse,
    },
}

impl ClientMessage {
    /// A realtime microphone chunk at the given capture rate.
    #[must_use]
    pub fn realtime_audio(rate: u32, payload: String) -> Self {
        Self::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: audio_mime(rate),
                    data: payload,
                }],
            },
        }
    }

    /// A realtime video frame (base64 JPEG).
    #[must_use]
    pub fn realtime_image(payload: String) -> Self {
        Self::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: IMAGE_MIME.to_string(),
                    data: payload,
                }],
            },
        }
    }

    /// A typed user message that completes its turn.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ClientContent {
            client_content: ClientContent {
                turns: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::text(text)],
                }],
                turn_complete: true,
            },
        }
    }

    /// A batched reply to one `toolCall` frame.
    #[must_use]
    pub fn tool_responses(function_responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse {
            tool_response: ToolResponse { function_responses },
        }
    }
}

/// Session setup, sent once immediately after the socket opens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model resource, e.g. `models/gemini-2.0-flash-live-001`
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,

    /// Empty object enables user speech transcription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<serde_json::Value>,

    /// Empty object enables model speech transcription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SpeechConfig {
    /// Speech config selecting a prebuilt voice by name.
    #[must_use]
    pub fn voice(name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: name.into(),
                },
            },
        }
    }
}

/// A role plus content parts, shared by both directions and the fallback API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
}

impl Content {
    /// A user-role content holding the given parts.
    #[must_use]
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    /// A role-less content holding a single text part (system instructions).
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Part {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            inline_data: Some(Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
            ..Self::default()
        }
    }
}

/// Base64 data tagged with its mime type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Tool declarations advertised in setup and fallback requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDecl {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the parameters
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

/// One inbound frame. A single frame may carry several fields at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
    pub usage_metadata: Option<serde_json::Value>,
    pub error: Option<ServerError>,
}

impl ServerMessage {
    /// Parse a raw frame body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the body is not a JSON object.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| Error::Protocol(format!("unrecognized server frame: {e}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub turn_complete: bool,
    pub generation_complete: bool,
    pub interrupted: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
    pub finished: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCall {
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerError {
    pub code: Option<i64>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_serializes_with_camel_case_keys() {
        let msg = ClientMessage::Setup {
            setup: Setup {
                model: "models/gemini-2.0-flash-live-001".to_string(),
                generation_config: Some(GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: Some(SpeechConfig::voice("Puck")),
                }),
                system_instruction: Some(Content::text("Be brief.")),
                tools: vec![Tool {
                    function_declarations: vec![FunctionDecl {
                        name: "get_tasks".to_string(),
                        description: "List tasks".to_string(),
                        parameters: serde_json::json!({"type": "object"}),
                    }],
                }],
                input_audio_transcription: Some(serde_json::json!({})),
                output_audio_transcription: Some(serde_json::json!({})),
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value.pointer("/setup/model").and_then(|v| v.as_str()),
            Some("models/gemini-2.0-flash-live-001")
        );
        assert_eq!(
            value
                .pointer("/setup/generationConfig/responseModalities/0")
                .and_then(|v| v.as_str()),
            Some("AUDIO")
        );
        assert_eq!(
            value
                .pointer("/setup/generationConfig/speechConfig/voiceConfig/prebuiltVoiceConfig/voiceName")
                .and_then(|v| v.as_str()),
            Some("Puck")
        );
        assert!(value.pointer("/setup/outputAudioTranscription").is_some());
        assert_eq!(
            value
                .pointer("/setup/tools/0/functionDeclarations/0/name")
                .and_then(|v| v.as_str()),
            Some("get_tasks")
        );
    }

    #[test]
    fn realtime_audio_declares_its_rate() {
        let msg = ClientMessage::realtime_audio(16000, "AAAA".to_string());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value
                .pointer("/realtimeInput/mediaChunks/0/mimeType")
                .and_then(|v| v.as_str()),
            Some("audio/pcm;rate=16000")
        );
        assert_eq!(
            value
                .pointer("/realtimeInput/mediaChunks/0/data")
                .and_then(|v| v.as_str()),
            Some("AAAA")
        );
    }

    #[test]
    fn user_text_completes_the_turn() {
        let value = serde_json::to_value(ClientMessage::user_text("hello")).unwrap();
        assert_eq!(
            value.pointer("/clientContent/turnComplete"),
            Some(&serde_json::Value::Bool(true))
        );
        assert_eq!(
            value
                .pointer("/clientContent/turns/0/parts/0/text")
                .and_then(|v| v.as_str()),
            Some("hello")
        );
    }

    #[test]
    fn server_content_parses_mixed_fields() {
        let raw = br#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UklGRg=="}}]
                },
                "outputTranscription": {"text": "Hello"},
                "turnComplete": true
            }
        }"#;
        let msg = ServerMessage::parse(raw).unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        assert_eq!(content.output_transcription.unwrap().text, "Hello");

        let parts = content.model_turn.unwrap().parts;
        let blob = parts[0].inline_data.as_ref().unwrap();
        assert_eq!(mime_rate(&blob.mime_type), 24000);
    }

    #[test]
    fn tool_call_parses_ids_and_args() {
        let raw = br#"{
            "toolCall": {
                "functionCalls": [
                    {"id": "call-1", "name": "add_task", "args": {"title": "ship it"}}
                ]
            }
        }"#;
        let msg = ServerMessage::parse(raw).unwrap();
        let calls = msg.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "add_task");
        assert_eq!(calls[0].id.as_deref(), Some("call-1"));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let msg = ServerMessage::parse(br#"{"somethingNew": {"x": 1}}"#).unwrap();
        assert!(msg.server_content.is_none());
        assert!(msg.tool_call.is_none());
    }

    #[test]
    fn mime_rate_defaults_when_unparseable() {
        assert_eq!(mime_rate("audio/pcm;rate=48000"), 48000);
        assert_eq!(mime_rate("audio/pcm"), AUDIO_OUTPUT_RATE);
        assert_eq!(mime_rate("audio/pcm;rate=abc"), AUDIO_OUTPUT_RATE);
    }
}
