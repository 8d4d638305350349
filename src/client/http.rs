//! HTTP implementation of the reply client

use std::future::Future;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use super::retry::{self, RetryPolicy};
use super::types::{
    ChatRequest, ChatResponse, ClearResponse, HealthResponse, HistoryResponse, VoiceHistoryEntry,
    VoiceResponse,
    extract_error_message,
};
use super::{Reply, ReplyClient, VoiceContext};
use crate::config::{BackendConfig, ChatMode};
use crate::session::Message;
use crate::voice::AudioClip;
use crate::{Error, Result};

/// Talks to the text and voice backends over HTTP
#[derive(Debug, Clone)]
pub struct HttpReplyClient {
    client: reqwest::Client,
    text_url: Url,
    voice_url: Url,
    health_url: Url,
    health_timeout: std::time::Duration,
    retry: RetryPolicy,
}

impl HttpReplyClient {
    /// Create a client for the given backends
    ///
    /// The health probe targets the backend used by `mode`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(backend: &BackendConfig, mode: ChatMode) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(backend.request_timeout)
            .build()?;

        let health_base = match mode {
            ChatMode::Text => &backend.text_url,
            ChatMode::Voice => &backend.voice_url,
        };

        Ok(Self {
            client,
            text_url: backend.text_url.clone(),
            voice_url: backend.voice_url.clone(),
            health_url: endpoint(health_base, "health")?,
            health_timeout: backend.health_timeout,
            retry: backend.retry.clone(),
        })
    }

    /// Run `call`, retrying transient failures per the retry policy
    async fn with_retry<T, F, Fut>(&self, op: &'static str, idempotent: bool, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.max_retries && retry::should_retry(&e, idempotent) => {
                    let retry_after = match &e {
                        Error::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = retry::delay_for_attempt(&self.retry, attempt, retry_after);
                    tracing::warn!(op, attempt, ?delay, error = %e, "backend call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(op, error = %e, "backend call failed");
                    return Err(e);
                }
            }
        }
    }

    /// Resolve a backend-relative audio path against the voice backend
    fn resolve_audio(&self, audio_url: &str) -> Option<String> {
        match self.voice_url.join(audio_url) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                tracing::warn!(audio_url, error = %e, "ignoring unparseable audio url");
                None
            }
        }
    }
}

#[async_trait]
impl ReplyClient for HttpReplyClient {
    async fn send_text(&self, text: &str) -> Result<Reply> {
        let url = &endpoint(&self.text_url, "chat")?;
        tracing::debug!(url = %url, chars = text.len(), "sending text turn");

        let body: ChatResponse = self
            .with_retry("chat", false, || async move {
                let response = self
                    .client
                    .post(url.clone())
                    .json(&ChatRequest { message: text })
                    .send()
                    .await
                    .map_err(Error::from_transport)?;
                read_json(response).await
            })
            .await?;

        match body {
            ChatResponse {
                success: true,
                reply: Some(reply),
                ..
            } => {
                tracing::debug!(chars = reply.len(), "received reply");
                Ok(Reply::text(reply))
            }
            ChatResponse { error, .. } => Err(Error::ServerError {
                status: StatusCode::OK.as_u16(),
                message: error
                    .unwrap_or_else(|| "failed to get response from chatbot".to_string()),
            }),
        }
    }

    async fn send_audio(&self, clip: &AudioClip, context: &VoiceContext) -> Result<Reply> {
        let url = endpoint(&self.voice_url, "chat/voice")?;
        let history: Vec<VoiceHistoryEntry<'_>> = context.history.iter().map(Into::into).collect();
        let history = serde_json::to_string(&history)?;
        let hint = context
            .client_transcript
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        tracing::debug!(
            url = %url,
            audio_bytes = clip.data.len(),
            history_len = context.history.len(),
            has_hint = hint.is_some(),
            "sending voice turn"
        );

        let (url, history) = (&url, &history);
        let body: VoiceResponse = self
            .with_retry("chat/voice", false, || async move {
                let part = reqwest::multipart::Part::bytes(clip.data.clone())
                    .file_name(clip.file_name.clone())
                    .mime_str(&clip.mime_type)?;
                let mut form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("history", history.clone());
                if let Some(hint) = hint {
                    form = form.text("client_transcript", hint.to_string());
                }

                let response = self
                    .client
                    .post(url.clone())
                    .multipart(form)
                    .send()
                    .await
                    .map_err(Error::from_transport)?;
                read_json(response).await
            })
            .await?;

        let audio_ref = body.audio_url.as_deref().and_then(|u| self.resolve_audio(u));
        tracing::debug!(
            transcript = ?body.transcript,
            has_audio = audio_ref.is_some(),
            "received voice reply"
        );

        Ok(Reply {
            transcript: body.transcript.filter(|t| !t.trim().is_empty()),
            corrected_transcript: body.corrected_transcript,
            reply_text: body.reply.unwrap_or_default(),
            audio_ref,
        })
    }

    async fn clear_history(&self) -> Result<()> {
        let url = &endpoint(&self.text_url, "clear-history")?;

        let body: ClearResponse = self
            .with_retry("clear-history", true, || async move {
                let response = self
                    .client
                    .post(url.clone())
                    .send()
                    .await
                    .map_err(Error::from_transport)?;
                read_json(response).await
            })
            .await?;

        if body.success {
            tracing::debug!("backend history cleared");
            Ok(())
        } else {
            Err(Error::ServerError {
                status: StatusCode::OK.as_u16(),
                message: "backend refused to clear history".to_string(),
            })
        }
    }

    async fn check_health(&self) -> bool {
        let response = match self
            .client
            .get(self.health_url.clone())
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %self.health_url, error = %e, "health check failed");
                return false;
            }
        };

        match read_json::<HealthResponse>(response).await {
            Ok(body) if body.status == "healthy" => true,
            Ok(body) => {
                tracing::warn!(status = %body.status, "backend reports unhealthy");
                false
            }
            Err(e) => {
                tracing::warn!(url = %self.health_url, error = %e, "health check failed");
                false
            }
        }
    }

    async fn fetch_history(&self) -> Result<Vec<Message>> {
        let url = &endpoint(&self.text_url, "get-history")?;

        let body: HistoryResponse = self
            .with_retry("get-history", true, || async move {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(Error::from_transport)?;
                read_json(response).await
            })
            .await?;

        Ok(body.history.into_iter().map(Message::from).collect())
    }
}

/// Join `path` onto `base`, treating `base` as a directory
fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path)
        .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
}

/// Check the status line and decode a JSON body
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(retry::parse_retry_after);
        return Err(Error::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body
            }
        });
        return Err(Error::ServerError {
            status: status.as_u16(),
            message,
        });
    }

    response.json().await.map_err(Error::from_transport)
}
