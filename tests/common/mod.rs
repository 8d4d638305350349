//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fluent_flow::client::{Reply, ReplyClient, VoiceContext};
use fluent_flow::config::ChatMode;
use fluent_flow::session::{Message, Session, SessionSettings};
use fluent_flow::voice::{
    AudioClip, CaptureEvent, CaptureEvents, SpeechCapture, SpeechPlayback, Utterance,
};
use fluent_flow::{Error, Result};
use tokio::sync::{Notify, mpsc};

/// Holds a send open until the test releases it
#[derive(Default)]
pub struct Gate {
    /// Signalled once the client has received the request
    pub started: Notify,
    /// Signal to let the reply through
    pub release: Notify,
}

/// Backend double with queued replies and recorded calls
#[derive(Default)]
pub struct ScriptedClient {
    healthy: AtomicBool,
    replies: Mutex<VecDeque<Result<Reply>>>,
    clear_failure: Mutex<Option<Error>>,
    stored_history: Mutex<Vec<Message>>,
    gate: Option<Arc<Gate>>,
    pub text_calls: Mutex<Vec<String>>,
    pub audio_calls: Mutex<Vec<(AudioClip, VoiceContext)>>,
    pub clear_calls: AtomicUsize,
    pub health_calls: AtomicUsize,
}

impl ScriptedClient {
    /// A backend that reports healthy and echoes messages
    pub fn healthy() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// A backend whose health probe fails
    pub fn unhealthy() -> Self {
        Self::default()
    }

    /// Hold every send until the gate is released
    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Queue the result of the next send
    pub fn push_reply(&self, reply: Result<Reply>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn fail_next_clear(&self, err: Error) {
        *self.clear_failure.lock().unwrap() = Some(err);
    }

    pub fn store_history(&self, messages: Vec<Message>) {
        *self.stored_history.lock().unwrap() = messages;
    }

    pub fn text_calls(&self) -> Vec<String> {
        self.text_calls.lock().unwrap().clone()
    }

    pub fn audio_calls(&self) -> Vec<(AudioClip, VoiceContext)> {
        self.audio_calls.lock().unwrap().clone()
    }

    async fn next_reply(&self, fallback: impl FnOnce() -> Reply) -> Result<Reply> {
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(fallback()))
    }
}

#[async_trait]
impl ReplyClient for ScriptedClient {
    async fn send_text(&self, text: &str) -> Result<Reply> {
        self.text_calls.lock().unwrap().push(text.to_string());
        let text = text.to_string();
        self.next_reply(|| Reply::text(format!("echo: {text}"))).await
    }

    async fn send_audio(&self, clip: &AudioClip, context: &VoiceContext) -> Result<Reply> {
        self.audio_calls
            .lock()
            .unwrap()
            .push((clip.clone(), context.clone()));
        self.next_reply(|| Reply {
            transcript: Some("heard on server".to_string()),
            reply_text: "voice reply".to_string(),
            ..Reply::default()
        })
        .await
    }

    async fn clear_history(&self) -> Result<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        match self.clear_failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn check_health(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }

    async fn fetch_history(&self) -> Result<Vec<Message>> {
        Ok(self.stored_history.lock().unwrap().clone())
    }
}

/// Microphone double that replays scripted events
pub struct FakeCapture {
    supported: bool,
    start_error: Option<fn() -> Error>,
    partials: Vec<String>,
    clip: Option<AudioClip>,
    events: Option<mpsc::UnboundedSender<CaptureEvent>>,
    pub starts: Arc<AtomicUsize>,
}

impl FakeCapture {
    /// Capture that records `clip` and reports `partials` as soon as it starts
    pub fn recording(partials: &[&str], clip: Option<AudioClip>) -> Self {
        Self {
            supported: true,
            start_error: None,
            partials: partials.iter().map(ToString::to_string).collect(),
            clip,
            events: None,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Host without speech capture
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            start_error: Some(|| Error::SpeechUnsupported),
            ..Self::recording(&[], None)
        }
    }

    /// Microphone the user refuses access to
    pub fn denied() -> Self {
        Self {
            start_error: Some(|| Error::PermissionDenied),
            ..Self::recording(&[], None)
        }
    }
}

impl SpeechCapture for FakeCapture {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn is_active(&self) -> bool {
        self.events.is_some()
    }

    fn start(&mut self) -> Result<CaptureEvents> {
        if let Some(err) = self.start_error {
            return Err(err());
        }
        if self.events.is_some() {
            return Err(Error::CaptureActive);
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        for partial in &self.partials {
            let _ = tx.send(CaptureEvent::Partial(partial.clone()));
        }
        self.events = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) -> Result<Option<AudioClip>> {
        let Some(tx) = self.events.take() else {
            return Ok(None);
        };
        let _ = tx.send(CaptureEvent::End);
        Ok(self.clip.clone())
    }
}

/// Speaker double that records what it was asked to say
#[derive(Clone, Default)]
pub struct FakePlayback {
    pub spoken: Arc<Mutex<Vec<Utterance>>>,
    pub cancels: Arc<AtomicUsize>,
}

impl FakePlayback {
    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechPlayback for FakePlayback {
    fn is_supported(&self) -> bool {
        true
    }

    fn speak(&mut self, utterance: Utterance) -> Result<()> {
        self.spoken.lock().unwrap().push(utterance);
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Settings with the usual limits for the given mode
pub fn settings(mode: ChatMode) -> SessionSettings {
    SessionSettings {
        mode,
        ..SessionSettings::default()
    }
}

/// Session wired to test doubles
pub fn session_with(
    client: Arc<ScriptedClient>,
    capture: FakeCapture,
    playback: FakePlayback,
    mode: ChatMode,
) -> Session {
    Session::new(client, Box::new(capture), Box::new(playback), settings(mode))
}

/// A short WAV clip
pub fn test_clip() -> AudioClip {
    AudioClip::wav(vec![b'R', b'I', b'F', b'F', 0, 0, 0, 0])
}
