//! Fluent Flow - conversational practice client
//!
//! This library provides the pieces of a voice/text chat client:
//! - A conversation session manager owning history and turn state
//! - An HTTP client for the text and voice chat backends
//! - Microphone capture with live transcription, and reply playback
//! - Layered configuration (environment, TOML file, defaults)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Presentation (REPL)                  │
//! │     typed input  │  /record  │  /clear  │  render    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ intents / snapshots
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Session                           │
//! │   history  │  recording/sending state  │  generation │
//! └───────┬───────────────────────────────────┬─────────┘
//!         │                                   │
//! ┌───────▼─────────────────┐   ┌─────────────▼─────────┐
//! │  ReplyClient (HTTP)     │   │  SpeechCapture /      │
//! │  /chat  /chat/voice     │   │  SpeechPlayback       │
//! └─────────────────────────┘   └───────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod voice;

pub use client::{HttpReplyClient, Reply, ReplyClient, RetryPolicy, VoiceContext};
pub use config::{ChatMode, Config};
pub use error::{Error, Result};
pub use session::{Message, Sender, Session, SessionSettings, SessionSnapshot, TurnInput, TurnOutcome};
