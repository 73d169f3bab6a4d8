//! Spyglass - realtime voice and screen assistant client
//!
//! This library provides the core functionality for the Spyglass client:
//! - Realtime bidirectional audio over WebSocket with live transcription
//! - Streaming text fallback with local speech synthesis
//! - Task and project tools callable by the model
//! - Local transcript and usage persistence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Frontend                          │
//! │   Commands in  │  Events out (transcript, stats)    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Live Client                          │
//! │   Session  │  Capture  │  Playback  │  Tools        │
//! └──────┬──────────────────────────────────────┬───────┘
//!        │                                      │
//! ┌──────▼───────────────┐      ┌───────────────▼───────┐
//! │  Realtime WebSocket  │      │  Streaming fallback   │
//! │  (audio + video)     │      │  (SSE + local TTS)    │
//! └──────────────────────┘      └───────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod fallback;
pub mod live;
pub mod pcm;
pub mod speech;
pub mod store;
pub mod tools;

pub use config::Config;
pub use error::{Error, Result};
pub use live::transcript::{LogEntry, Speaker, TranscriptLog};
pub use live::transport::LiveEndpoint;
pub use live::usage::{TokenCosts, TokenLedger, UsageStats};
pub use live::{
    ClientEvent, Command, ConnectionState, LiveClient, Session, SessionSettings,
};
pub use store::{DbConn, DbPool};
