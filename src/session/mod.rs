//! Conversation session manager
//!
//! `Session` is the single owner of the conversation history and the
//! recording/sending state machine. It reconciles three asynchronous sources
//! (speech capture, typed input, backend replies) into one ordered history:
//!
//! ```text
//!  intent ──► Session ──► SpeechCapture ──► partial transcripts
//!               │   └───► ReplyClient ────► reply / error message
//!               ▼
//!        history + state ──► snapshot() ──► presentation
//!               └──────────► SpeechPlayback
//! ```
//!
//! Methods take `&self` and never hold the state lock across an await, so a
//! clear can interleave with an in-flight send. Every send remembers the
//! generation it was issued in; a completion arriving after a clear is
//! discarded instead of resurrecting old messages.

mod history;
mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TryRecvError;

pub use history::{ConversationHistory, Message, Sender};
pub use state::{
    ConnectionStatus, Intent, RecordingStatus, SendingStatus, SessionSnapshot, SessionState,
    TurnInput, TurnOutcome,
};

use crate::client::{Reply, ReplyClient, VoiceContext};
use crate::config::{ChatMode, Config};
use crate::voice::{AudioClip, CaptureEvent, CaptureEvents, SpeechCapture, SpeechPlayback, Utterance};
use crate::{Error, Result};

/// Behavior knobs for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Which backend turns go to when a recording stops
    pub mode: ChatMode,
    /// Messages retained in history
    pub history_limit: usize,
    /// Messages shown by `display_history`
    pub display_window: usize,
    /// Speak replies through the playback adapter
    pub speak_replies: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            mode: ChatMode::Text,
            history_limit: 10,
            display_window: 6,
            speak_replies: true,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            mode: config.mode,
            history_limit: config.history.max_entries,
            display_window: config.history.display_window,
            speak_replies: config.voice.enabled && config.voice.speak_replies,
        }
    }
}

/// State guarded by the session lock
struct Inner {
    history: ConversationHistory,
    state: SessionState,
    generation: u64,
    capture: Box<dyn SpeechCapture>,
    playback: Box<dyn SpeechPlayback>,
    capture_events: Option<CaptureEvents>,
}

impl Inner {
    /// Apply queued capture events; the newest hypothesis wins
    fn drain_capture_events(&mut self) -> usize {
        let Some(events) = self.capture_events.as_mut() else {
            return 0;
        };

        let mut drained = 0;
        loop {
            match events.try_recv() {
                Ok(CaptureEvent::Partial(text)) => {
                    self.state.pending_transcript = Some(text);
                }
                Ok(CaptureEvent::Error(message)) => {
                    tracing::warn!(error = %message, "speech capture reported an error");
                    self.state.notice = Some(format!("Speech recognition problem: {message}"));
                }
                Ok(CaptureEvent::End) => {
                    self.capture_events = None;
                    return drained + 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.capture_events = None;
                    break;
                }
            }
            drained += 1;
        }
        drained
    }

    /// Stop the adapter and fold in its last events
    fn finish_capture(&mut self) -> Result<Option<AudioClip>> {
        let stopped = self.capture.stop();
        self.drain_capture_events();
        self.capture_events = None;
        self.state.recording = RecordingStatus::Idle;
        stopped
    }

    /// Start speaking a reply; playback problems never fail the turn
    fn play_reply(&mut self, reply: &Reply) {
        if !self.playback.is_supported() {
            return;
        }

        let utterance = match &reply.audio_ref {
            Some(audio) => Utterance::Audio(audio.clone()),
            None if !reply.reply_text.trim().is_empty() => Utterance::Text(reply.reply_text.clone()),
            None => return,
        };

        if let Err(e) = self.playback.speak(utterance) {
            tracing::debug!(error = %e, "reply playback unavailable");
        }
    }
}

/// The conversation session manager
pub struct Session {
    client: Arc<dyn ReplyClient>,
    settings: SessionSettings,
    inner: Mutex<Inner>,
}

impl Session {
    /// Create a session around its collaborators
    #[must_use]
    pub fn new(
        client: Arc<dyn ReplyClient>,
        capture: Box<dyn SpeechCapture>,
        playback: Box<dyn SpeechPlayback>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            client,
            settings,
            inner: Mutex::new(Inner {
                history: ConversationHistory::new(settings.history_limit),
                state: SessionState::default(),
                generation: 0,
                capture,
                playback,
                capture_events: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Read-only copy of history and state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            history: inner.history.to_vec(),
            state: inner.state.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// The newest messages that fit the display window
    #[must_use]
    pub fn display_history(&self) -> Vec<Message> {
        self.lock().history.recent(self.settings.display_window)
    }

    /// Whether the microphone control should be offered at all
    #[must_use]
    pub fn capture_supported(&self) -> bool {
        self.lock().capture.is_supported()
    }

    /// Take the pending user-visible notice, if any
    #[must_use]
    pub fn take_notice(&self) -> Option<String> {
        self.lock().state.notice.take()
    }

    /// Probe backend health and record the result
    pub async fn probe_connection(&self) -> ConnectionStatus {
        let status = if self.client.check_health().await {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };

        self.lock().state.connection = status;
        tracing::info!(?status, "backend connection probed");
        status
    }

    /// Replace the pending input with typed text
    pub fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        self.lock().state.pending_transcript = (!text.trim().is_empty()).then_some(text);
    }

    /// Begin recording
    ///
    /// # Errors
    ///
    /// `CaptureActive` while already listening, `Busy` while a reply is
    /// pending, or the adapter's failure (`SpeechUnsupported`,
    /// `PermissionDenied`, `DeviceUnavailable`); on failure the session stays idle
    pub fn start_capture(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state.recording == RecordingStatus::Listening {
            return Err(Error::CaptureActive);
        }
        if inner.state.sending == SendingStatus::AwaitingReply {
            return Err(Error::Busy("a reply is still pending"));
        }

        match inner.capture.start() {
            Ok(events) => {
                inner.playback.cancel();
                inner.capture_events = Some(events);
                inner.state.recording = RecordingStatus::Listening;
                inner.state.last_audio_reply = None;
                if self.settings.mode == ChatMode::Voice {
                    inner.state.pending_transcript = None;
                }
                tracing::debug!("capture started");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not start capture");
                inner.state.recording = RecordingStatus::Idle;
                inner.state.notice = Some(notice_for(&e));
                Err(e)
            }
        }
    }

    /// Fold queued partial transcripts and capture errors into state
    ///
    /// Returns the number of events applied.
    pub fn pump_capture(&self) -> usize {
        self.lock().drain_capture_events()
    }

    /// Stop recording
    ///
    /// A no-op returning `Ok(None)` when not recording. In voice mode the
    /// recording is sent as a turn; in text mode the transcript stays in the
    /// pending input for an explicit send.
    ///
    /// # Errors
    ///
    /// Returns error if the recording cannot be finalized, or if the
    /// resulting send is rejected
    pub async fn stop_capture(&self) -> Result<Option<TurnOutcome>> {
        let (clip, transcript) = {
            let mut inner = self.lock();
            if inner.state.recording == RecordingStatus::Idle {
                return Ok(None);
            }

            let clip = match inner.finish_capture() {
                Ok(clip) => clip,
                Err(e) => {
                    tracing::warn!(error = %e, "could not finalize recording");
                    inner.state.notice = Some(notice_for(&e));
                    return Err(e);
                }
            };
            tracing::debug!(has_audio = clip.is_some(), "capture stopped");
            (clip, inner.state.pending_transcript.clone())
        };

        if self.settings.mode == ChatMode::Text {
            return Ok(None);
        }

        let Some(clip) = clip else {
            self.lock().state.notice = Some("No audio was captured, please try again".to_string());
            return Ok(None);
        };

        self.send_turn(TurnInput::Voice { clip, transcript })
            .await
            .map(Some)
    }

    /// Stop recording without sending or keeping a transcript
    pub fn cancel_capture(&self) {
        let mut inner = self.lock();
        if inner.state.recording == RecordingStatus::Idle {
            return;
        }
        if let Err(e) = inner.finish_capture() {
            tracing::debug!(error = %e, "discarded recording failed to finalize");
        }
        inner.state.pending_transcript = None;
        tracing::debug!("capture cancelled");
    }

    /// Send one turn to the backend
    ///
    /// The user's words are appended before the reply arrives and are kept
    /// even if the backend fails; a failure appends an assistant-side error
    /// message instead of a reply.
    ///
    /// # Errors
    ///
    /// Rejections that change nothing and make no network call: `Busy` while
    /// a reply is pending or recording, `NotConnected` for text turns without
    /// a healthy backend, `EmptyInput` for blank text
    pub async fn send_turn(&self, input: TurnInput) -> Result<TurnOutcome> {
        let (generation, history, user_appended) = {
            let mut inner = self.lock();
            if inner.state.sending == SendingStatus::AwaitingReply {
                return Err(Error::Busy("a reply is still pending"));
            }
            if inner.state.recording == RecordingStatus::Listening {
                return Err(Error::Busy("recording in progress"));
            }

            let user_text = match &input {
                TurnInput::Text(text) => {
                    if text.trim().is_empty() {
                        return Err(Error::EmptyInput);
                    }
                    if inner.state.connection != ConnectionStatus::Connected {
                        tracing::debug!(connection = ?inner.state.connection, "text turn rejected");
                        return Err(Error::NotConnected);
                    }
                    Some(text.trim().to_string())
                }
                TurnInput::Voice { transcript, .. } => transcript
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string),
            };

            inner.state.sending = SendingStatus::AwaitingReply;
            let history = inner.history.to_vec();
            let user_appended = user_text.is_some();
            if let Some(text) = user_text {
                inner.history.push(Message::user(text));
            }
            (inner.generation, history, user_appended)
        };

        let result = match &input {
            TurnInput::Text(text) => self.client.send_text(text.trim()).await,
            TurnInput::Voice { clip, transcript } => {
                let context = VoiceContext {
                    history,
                    client_transcript: transcript.clone(),
                };
                self.client.send_audio(clip, &context).await
            }
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(
                issued = generation,
                current = inner.generation,
                "discarding reply from a cleared conversation"
            );
            return Ok(TurnOutcome::Discarded);
        }
        inner.state.sending = SendingStatus::Idle;

        match result {
            Ok(reply) => {
                if !user_appended
                    && let Some(heard) = reply.transcript.as_deref().filter(|t| !t.trim().is_empty())
                {
                    inner.history.push(Message::user(heard));
                }
                if !reply.reply_text.trim().is_empty() {
                    inner.history.push(Message::assistant(reply.reply_text.clone()));
                }
                inner.state.pending_transcript = None;
                inner.state.last_audio_reply.clone_from(&reply.audio_ref);
                if self.settings.speak_replies {
                    inner.play_reply(&reply);
                }
                tracing::debug!(history_len = inner.history.len(), "turn complete");
                Ok(TurnOutcome::Replied(reply))
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn failed");
                inner
                    .history
                    .push(Message::assistant(format!("Sorry, I couldn't get a reply: {e}")));
                Ok(TurnOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Send the pending input as a text turn
    ///
    /// Blank input is ignored and yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Same rejections as [`Session::send_turn`]
    pub async fn send_pending(&self) -> Result<Option<TurnOutcome>> {
        let pending = self.lock().state.pending_transcript.clone();
        match pending {
            Some(text) if !text.trim().is_empty() => {
                self.send_turn(TurnInput::Text(text)).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Start recording when idle, stop when listening
    ///
    /// # Errors
    ///
    /// Same as [`Session::start_capture`] / [`Session::stop_capture`]
    pub async fn toggle_recording(&self) -> Result<Option<TurnOutcome>> {
        let listening = self.lock().state.recording == RecordingStatus::Listening;
        if listening {
            self.stop_capture().await
        } else {
            self.start_capture().map(|()| None)
        }
    }

    /// Forget the conversation locally and on the text backend
    ///
    /// Local state is always reset (except the connection status) and any
    /// in-flight turn becomes stale. Only text mode asks the backend to clear:
    /// the voice backend keeps no history and receives it with every turn.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the remote clear fails
    pub async fn clear_conversation(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.playback.cancel();
            if inner.capture.is_active()
                && let Err(e) = inner.capture.stop()
            {
                tracing::debug!(error = %e, "recording dropped during clear");
            }
            inner.capture_events = None;
            inner.history.clear();
            inner.state = inner.state.reset_keeping_connection();
            tracing::info!(generation = inner.generation, "conversation cleared");
        }

        if self.settings.mode == ChatMode::Voice {
            return Ok(());
        }

        if let Err(e) = self.client.clear_history().await {
            tracing::warn!(error = %e, "backend history clear failed");
            self.lock().state.notice = Some(format!("Couldn't clear server history: {e}"));
            return Err(e);
        }
        Ok(())
    }

    /// Replace local history with the backend's stored conversation
    ///
    /// Returns the number of messages kept.
    ///
    /// # Errors
    ///
    /// Returns the backend error; local history is left untouched
    pub async fn restore_history(&self) -> Result<usize> {
        let generation = self.lock().generation;
        let messages = self.client.fetch_history().await?;

        let mut inner = self.lock();
        if inner.generation != generation {
            return Ok(0);
        }
        inner.history.replace(messages);
        tracing::debug!(restored = inner.history.len(), "history restored from backend");
        Ok(inner.history.len())
    }

    /// Route a presentation intent to the matching operation
    ///
    /// # Errors
    ///
    /// Whatever the routed operation returns
    pub async fn dispatch(&self, intent: Intent) -> Result<Option<TurnOutcome>> {
        match intent {
            Intent::RecordToggle => self.toggle_recording().await,
            Intent::Send => self.send_pending().await,
            Intent::Clear => self.clear_conversation().await.map(|()| None),
            Intent::InputChange(text) => {
                self.set_input(text);
                Ok(None)
            }
        }
    }
}

/// User-facing wording for adapter failures
fn notice_for(err: &Error) -> String {
    match err {
        Error::PermissionDenied => {
            "Unable to access microphone. Please allow microphone permission.".to_string()
        }
        Error::DeviceUnavailable(_) => "No microphone is available.".to_string(),
        Error::SpeechUnsupported => "Voice input is not supported here.".to_string(),
        other => other.to_string(),
    }
}
