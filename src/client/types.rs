//! Backend wire formats

use serde::{Deserialize, Serialize};

use crate::session::{Message, Sender};

/// `POST /chat` request body
#[derive(Debug, Serialize)]
pub(super) struct ChatRequest<'a> {
    pub message: &'a str,
}

/// `POST /chat` response body
#[derive(Debug, Deserialize)]
pub(super) struct ChatResponse {
    #[serde(default)]
    pub success: bool,
    pub reply: Option<String>,
    pub error: Option<String>,
}

/// Entry of the `history` form field sent with a voice turn (`{type, content}`)
#[derive(Debug, Serialize)]
pub(super) struct VoiceHistoryEntry<'a> {
    #[serde(rename = "type")]
    pub kind: Sender,
    pub content: &'a str,
}

impl<'a> From<&'a Message> for VoiceHistoryEntry<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            kind: message.sender,
            content: &message.text,
        }
    }
}

/// `POST /chat/voice` response body
#[derive(Debug, Deserialize)]
pub(super) struct VoiceResponse {
    pub transcript: Option<String>,
    pub corrected_transcript: Option<String>,
    pub reply: Option<String>,
    pub audio_url: Option<String>,
}

/// `POST /clear-history` response body
#[derive(Debug, Deserialize)]
pub(super) struct ClearResponse {
    #[serde(default)]
    pub success: bool,
}

/// `GET /health` response body
#[derive(Debug, Deserialize)]
pub(super) struct HealthResponse {
    pub status: String,
}

/// `GET /get-history` response body
#[derive(Debug, Deserialize)]
pub(super) struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Backend-side history entry (`{role, content}`)
#[derive(Debug, Deserialize)]
pub(super) struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl From<HistoryEntry> for Message {
    fn from(entry: HistoryEntry) -> Self {
        let sender = if entry.role == "user" {
            Sender::User
        } else {
            Sender::Assistant
        };
        Self::new(sender, entry.content)
    }
}

/// Error body shapes: `{"error": ...}` from the text backend,
/// `{"detail": ...}` from the voice backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<String>,
}

/// Pull a human-readable message out of an error response body
pub(super) fn extract_error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error
        .or(parsed.detail)
        .filter(|m| !m.trim().is_empty())
}
