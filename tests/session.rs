//! Live session integration tests
//!
//! Drives a [`Session`] over a real in-memory store, feeding it wire
//! frames and watching what it puts on the socket, in the transcript,
//! and in the usage ledger. No audio hardware or network involved.

use spyglass::audio::{PlaybackTuning, Player};
use spyglass::fallback::{self, FallbackUpdate, HINT_FEED_SYNCING, HINT_NO_SCREEN};
use spyglass::live::protocol::{AUDIO_OUTPUT_RATE, ClientMessage, ServerMessage};
use spyglass::live::transport::OutboundSink;
use spyglass::speech::SpeechQueue;
use spyglass::store::ProjectRepo;
use spyglass::{ClientEvent, DbPool, Session, SessionSettings, Speaker, pcm};
use tokio::sync::mpsc;

mod common;
use common::{build_test_registry, create_test_account, setup_test_db};

/// Build a connected session over the given store, returning the
/// outbound frame receiver and the client event receiver alongside it.
fn connect_session(
    db: &DbPool,
    account_id: &str,
) -> (
    Session,
    mpsc::UnboundedReceiver<ClientMessage>,
    mpsc::UnboundedReceiver<ClientEvent>,
) {
    let registry = build_test_registry(db, account_id);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        SessionSettings::default(),
        Player::detached(AUDIO_OUTPUT_RATE, PlaybackTuning::default()),
        SpeechQueue::disabled(),
        registry,
        events_tx,
    );
    let (sink, outbound) = OutboundSink::channel();
    session.begin_connecting();
    session.activate(sink);
    (session, outbound, events_rx)
}

fn server_frame(raw: &str) -> ServerMessage {
    ServerMessage::parse(raw.as_bytes()).expect("valid server frame")
}

#[test]
fn test_connected_session_advertises_the_task_tools() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (session, _outbound, mut events) = connect_session(&db, &account.id);

    assert!(session.is_connected());
    assert!(matches!(events.try_recv(), Ok(ClientEvent::Connected)));

    let setup = session.setup();
    assert_eq!(setup.tools.len(), 1);
    assert_eq!(setup.tools[0].function_declarations.len(), 6);
    assert!(setup.input_audio_transcription.is_some());
    assert!(setup.output_audio_transcription.is_some());
}

#[test]
fn test_capture_block_becomes_exactly_one_frame() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, mut outbound, _events) = connect_session(&db, &account.id);

    let block = vec![0.0f32; 2048];
    session.handle_capture_block(&block, 16000);

    let frame = outbound.try_recv().expect("one uplink frame");
    let ClientMessage::RealtimeInput { realtime_input } = frame else {
        panic!("expected a realtime input frame");
    };
    assert_eq!(realtime_input.media_chunks.len(), 1);
    assert_eq!(realtime_input.media_chunks[0].mime_type, "audio/pcm;rate=16000");
    assert!(outbound.try_recv().is_err());

    // 2048 samples at 16 kHz is 128 ms, which bills as 5 tokens
    assert_eq!(session.stats_snapshot().estimated_tokens, 5);
}

#[test]
fn test_streamed_reply_collapses_to_one_final_entry() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, _outbound, _events) = connect_session(&db, &account.id);

    session.handle_server(server_frame(
        r#"{"serverContent": {"outputTranscription": {"text": "Hel"}}}"#,
    ));
    session.handle_server(server_frame(
        r#"{"serverContent": {"outputTranscription": {"text": "lo"}}}"#,
    ));
    session.handle_server(server_frame(r#"{"serverContent": {"turnComplete": true}}"#));

    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].speaker, Speaker::Assistant);
    assert_eq!(entries[0].message, "Hello");
    assert!(entries[0].is_final);

    assert_eq!(session.stats_snapshot().model_turns, 1);
}

#[test]
fn test_voice_turn_yields_user_then_assistant_entries() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, _outbound, _events) = connect_session(&db, &account.id);

    session.handle_server(server_frame(
        r#"{"serverContent": {"inputTranscription": {"text": "what time "}}}"#,
    ));
    session.handle_server(server_frame(
        r#"{"serverContent": {"inputTranscription": {"text": "is it?"}}}"#,
    ));
    session.handle_server(server_frame(
        r#"{"serverContent": {"outputTranscription": {"text": "Half past nine."}}}"#,
    ));
    session.handle_server(server_frame(r#"{"serverContent": {"turnComplete": true}}"#));

    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].speaker, Speaker::User);
    assert_eq!(entries[0].message, "what time is it?");
    assert_eq!(entries[1].speaker, Speaker::Assistant);
    assert_eq!(entries[1].message, "Half past nine.");
    assert!(entries.iter().all(|e| e.is_final));
}

#[test]
fn test_model_audio_plays_until_interrupted() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, _outbound, _events) = connect_session(&db, &account.id);

    let payload = pcm::encode(&[0.25f32; 2400]);
    let frame = serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": payload}}]
            }
        }
    });
    session.handle_server(server_frame(&frame.to_string()));
    assert!(!session.player().is_idle());

    session.handle_server(server_frame(r#"{"serverContent": {"interrupted": true}}"#));
    assert!(session.player().is_idle());
}

#[test]
fn test_typed_text_uses_the_fallback_not_the_socket() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, mut outbound, _events) = connect_session(&db, &account.id);

    let request = session.send_text("ping").expect("a fallback request");

    // Typed turns never ride the realtime socket, connected or not
    assert!(outbound.try_recv().is_err());
    assert_eq!(request.text, "ping");
    assert!(request.frame.is_none());
    assert!(!request.video_paused);

    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].speaker, Speaker::User);
    assert!(entries[0].is_final);

    // Video never started, so the composed turn carries the syncing hint
    let parts = fallback::build_user_parts(
        &request.text,
        request.frame.as_deref(),
        request.video_paused,
    );
    assert_eq!(parts.len(), 1);
    let text = parts[0].text.as_deref().unwrap();
    assert!(text.starts_with(HINT_FEED_SYNCING));
    assert!(text.ends_with("ping"));
}

#[test]
fn test_paused_share_switches_the_text_hint() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, mut outbound, _events) = connect_session(&db, &account.id);

    session.video_state_changed(true);

    // The pause notification is the only thing clientContent carries
    let note = outbound.try_recv().expect("a pause notification");
    assert!(matches!(note, ClientMessage::ClientContent { .. }));

    let request = session.send_text("ping").expect("a fallback request");
    assert!(outbound.try_recv().is_err());
    assert!(request.video_paused);

    let parts = fallback::build_user_parts(
        &request.text,
        request.frame.as_deref(),
        request.video_paused,
    );
    assert!(parts[0].text.as_deref().unwrap().starts_with(HINT_NO_SCREEN));
}

#[test]
fn test_cached_frame_rides_along_with_typed_text() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, mut outbound, _events) = connect_session(&db, &account.id);

    session.handle_video_frame(vec![1, 2, 3]);
    let forwarded = outbound.try_recv().expect("a live video frame");
    let ClientMessage::RealtimeInput { realtime_input } = forwarded else {
        panic!("expected a realtime input frame");
    };
    assert_eq!(realtime_input.media_chunks[0].mime_type, "image/jpeg");

    let request = session.send_text("what is on screen?").expect("a request");
    assert_eq!(request.frame.as_deref(), Some(&[1u8, 2, 3][..]));

    let parts = fallback::build_user_parts(
        &request.text,
        request.frame.as_deref(),
        request.video_paused,
    );
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].text.as_deref(), Some("what is on screen?"));
    let blob = parts[1].inline_data.as_ref().unwrap();
    assert_eq!(blob.mime_type, "image/jpeg");

    // Forwarding counted one image, attaching to the request another
    assert_eq!(session.stats_snapshot().images_sent, 2);
}

#[test]
fn test_tool_call_lands_in_the_store_and_answers_the_socket() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, mut outbound, _events) = connect_session(&db, &account.id);

    session.handle_server(server_frame(
        r#"{
            "toolCall": {
                "functionCalls": [
                    {"id": "call-7", "name": "create_project", "args": {"name": "Demo"}}
                ]
            }
        }"#,
    ));

    let frame = outbound.try_recv().expect("a tool response frame");
    let ClientMessage::ToolResponse { tool_response } = frame else {
        panic!("expected a tool response frame");
    };
    assert_eq!(tool_response.function_responses.len(), 1);
    assert_eq!(tool_response.function_responses[0].id.as_deref(), Some("call-7"));
    assert_eq!(tool_response.function_responses[0].name, "create_project");

    let created = ProjectRepo::new(db.clone())
        .find_by_name(&account.id, "Demo")
        .unwrap();
    assert!(created.is_some());

    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].speaker, Speaker::System);
    assert!(entries[0].message.starts_with("Tool create_project:"));
}

#[test]
fn test_fallback_reply_streams_into_the_transcript() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, _outbound, _events) = connect_session(&db, &account.id);

    session.send_text("hi").expect("a fallback request");
    session.handle_fallback(FallbackUpdate::Delta("Hey ".to_string()));
    session.handle_fallback(FallbackUpdate::Delta("there.".to_string()));
    session.handle_fallback(FallbackUpdate::Done {
        first_token_ms: Some(320),
    });

    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].speaker, Speaker::Assistant);
    assert_eq!(entries[1].message, "Hey there.");
    assert!(entries[1].is_final);
    assert_eq!(entries[1].response_time_ms, Some(320));

    assert_eq!(session.stats_snapshot().model_turns, 1);
}

#[test]
fn test_failed_fallback_leaves_a_system_note() {
    let db = setup_test_db();
    let account = create_test_account(&db, "tester");
    let (mut session, _outbound, _events) = connect_session(&db, &account.id);

    session.send_text("hi").expect("a fallback request");
    session.handle_fallback(FallbackUpdate::Failed {
        message: "HTTP 429".to_string(),
    });

    let entries = session.transcript().entries();
    let note = entries.last().unwrap();
    assert_eq!(note.speaker, Speaker::System);
    assert!(note.message.contains("HTTP 429"));
}
