//! Session state machine types

use crate::client::Reply;
use crate::voice::AudioClip;

use super::Message;

/// Result of the most recent health probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No probe has completed yet
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

/// Microphone state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordingStatus {
    #[default]
    Idle,
    Listening,
}

/// Outbound request state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendingStatus {
    #[default]
    Idle,
    AwaitingReply,
}

/// Everything the presentation layer needs besides the history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub connection: ConnectionStatus,
    pub recording: RecordingStatus,
    pub sending: SendingStatus,
    /// Latest captured or typed input not yet sent
    pub pending_transcript: Option<String>,
    /// Reference to the audio of the last reply
    pub last_audio_reply: Option<String>,
    /// Latest user-visible warning
    pub notice: Option<String>,
}

impl SessionState {
    /// Fresh state that keeps only the connection status
    #[must_use]
    pub fn reset_keeping_connection(&self) -> Self {
        Self {
            connection: self.connection,
            ..Self::default()
        }
    }

    /// Whether nothing is recording or in flight
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.recording == RecordingStatus::Idle && self.sending == SendingStatus::Idle
    }
}

/// Read-only copy of the session for rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Full retained history, oldest first
    pub history: Vec<Message>,
    pub state: SessionState,
}

/// What the user wants to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// Typed (or dictated) text for the text backend
    Text(String),
    /// A recording for the voice backend, with an optional client-side transcript
    Voice {
        clip: AudioClip,
        transcript: Option<String>,
    },
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Backend replied; the reply is in the history
    Replied(Reply),
    /// Backend call failed; an error message is in the history
    Failed(String),
    /// The conversation was cleared while the turn was in flight
    Discarded,
}

/// User intents dispatched by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    RecordToggle,
    Send,
    Clear,
    InputChange(String),
}
