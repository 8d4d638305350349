//! Speech capture and playback adapters
//!
//! The session manager talks to audio hardware only through the
//! `SpeechCapture` and `SpeechPlayback` capability traits, so hosts without
//! a microphone or speakers (and tests) can substitute their own.

mod capture;
mod playback;
mod stt;
mod tts;

use tokio::sync::mpsc;

pub use capture::{MicrophoneCapture, SAMPLE_RATE, UnsupportedCapture, samples_to_wav};
pub use playback::{AudioOutput, SilentPlayback, SpeakerPlayback};
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};

use crate::Result;

/// A finalized recording ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Encoded audio bytes
    pub data: Vec<u8>,
    /// MIME type of `data`
    pub mime_type: String,
    /// File name reported to the backend
    pub file_name: String,
}

impl AudioClip {
    /// Wrap WAV bytes
    #[must_use]
    pub fn wav(data: Vec<u8>) -> Self {
        Self {
            data,
            mime_type: "audio/wav".to_string(),
            file_name: "recording.wav".to_string(),
        }
    }
}

/// Something that happened during a capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Latest recognition hypothesis; replaces any earlier one
    Partial(String),
    /// Recognition or device failure; the capture keeps running
    Error(String),
    /// The capture session ended
    End,
}

/// Receiving side of a capture session's events
pub type CaptureEvents = mpsc::UnboundedReceiver<CaptureEvent>;

/// Microphone capture with optional live speech recognition
pub trait SpeechCapture {
    /// Whether capture can work in this environment at all
    fn is_supported(&self) -> bool;

    /// Whether a capture session is running
    fn is_active(&self) -> bool;

    /// Begin a capture session
    ///
    /// # Errors
    ///
    /// `SpeechUnsupported` when unsupported, `CaptureActive` when a session
    /// is already running, `PermissionDenied`/`DeviceUnavailable` when the
    /// microphone cannot be opened
    fn start(&mut self) -> Result<CaptureEvents>;

    /// End the current session and hand back the recording
    ///
    /// Returns `Ok(None)` when no session is running or nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns error if the recording cannot be encoded
    fn stop(&mut self) -> Result<Option<AudioClip>>;
}

/// What to play back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Utterance {
    /// Reply text to synthesize locally
    Text(String),
    /// Reply audio already synthesized by the backend
    Audio(String),
}

/// Speech output with last-reply-wins semantics
pub trait SpeechPlayback {
    /// Whether playback can work in this environment
    fn is_supported(&self) -> bool;

    /// Stop whatever is playing and start `utterance`
    ///
    /// # Errors
    ///
    /// `SpeechUnsupported` when playback (or the needed synthesizer) is
    /// unavailable
    fn speak(&mut self, utterance: Utterance) -> Result<()>;

    /// Stop playback; safe to call when nothing is playing
    fn cancel(&mut self);
}
