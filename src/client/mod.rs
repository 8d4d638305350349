//! Remote reply client
//!
//! Outbound calls to the conversational backend. The session manager only
//! sees the `ReplyClient` trait; `HttpReplyClient` is the `reqwest`
//! implementation talking to the text (`/chat`) and voice (`/chat/voice`)
//! backends.

mod http;
pub mod retry;
mod types;

use async_trait::async_trait;

pub use http::HttpReplyClient;
pub use retry::RetryPolicy;

use crate::Result;
use crate::session::Message;
use crate::voice::AudioClip;

/// A backend reply to one turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// What the backend heard (voice mode)
    pub transcript: Option<String>,

    /// Grammar-corrected version of the transcript, when the backend offers one
    pub corrected_transcript: Option<String>,

    /// The assistant's answer
    pub reply_text: String,

    /// Absolute URL of synthesized reply audio
    pub audio_ref: Option<String>,
}

impl Reply {
    /// Reply consisting of text only
    #[must_use]
    pub fn text(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
            ..Self::default()
        }
    }
}

/// Context sent alongside a voice turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceContext {
    /// Conversation so far, oldest first
    pub history: Vec<Message>,

    /// Client-side transcript the backend may prefer over its own
    pub client_transcript: Option<String>,
}

/// Request/response access to the conversational backend
#[async_trait]
pub trait ReplyClient: Send + Sync {
    /// Send a typed message and wait for the reply
    async fn send_text(&self, text: &str) -> Result<Reply>;

    /// Upload a recorded clip with conversation context
    async fn send_audio(&self, clip: &AudioClip, context: &VoiceContext) -> Result<Reply>;

    /// Ask the backend to forget its side of the conversation
    async fn clear_history(&self) -> Result<()>;

    /// Probe backend health; any failure reads as unhealthy
    async fn check_health(&self) -> bool;

    /// Fetch the backend's stored conversation, oldest first
    async fn fetch_history(&self) -> Result<Vec<Message>>;
}
