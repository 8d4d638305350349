//! HTTP reply client tests against a `wiremock` backend

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fluent_flow::client::{HttpReplyClient, ReplyClient, RetryPolicy, VoiceContext};
use fluent_flow::config::{BackendConfig, ChatMode};
use fluent_flow::session::Message;
use fluent_flow::voice::AudioClip;
use fluent_flow::Error;

/// Both backends pointed at the mock server, with fast retries
fn backend(server: &MockServer) -> BackendConfig {
    backend_at(Url::parse(&server.uri()).expect("valid url"))
}

fn backend_at(url: Url) -> BackendConfig {
    BackendConfig {
        text_url: url.clone(),
        voice_url: url,
        request_timeout: Duration::from_secs(5),
        health_timeout: Duration::from_secs(1),
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
    }
}

fn client(server: &MockServer, mode: ChatMode) -> HttpReplyClient {
    HttpReplyClient::new(&backend(server), mode).expect("client builds")
}

#[tokio::test]
async fn text_chat_returns_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_json(json!({ "message": "Hello" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "reply": "Hi there" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let reply = client(&server, ChatMode::Text)
        .send_text("Hello")
        .await
        .unwrap();

    assert_eq!(reply.reply_text, "Hi there");
    assert_eq!(reply.transcript, None);
    assert_eq!(reply.audio_ref, None);
}

#[tokio::test]
async fn text_chat_error_body_becomes_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "No message provided" })),
        )
        .mount(&server)
        .await;

    let err = client(&server, ChatMode::Text)
        .send_text("Hello")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::ServerError { status: 400, ref message } if message == "No message provided"
    ));
}

#[tokio::test]
async fn unsuccessful_chat_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "error": "model offline" })),
        )
        .mount(&server)
        .await;

    let err = client(&server, ChatMode::Text)
        .send_text("Hello")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ServerError { ref message, .. } if message == "model offline"));
}

#[tokio::test]
async fn rate_limited_chat_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "reply": "ok" })),
        )
        .mount(&server)
        .await;

    let reply = client(&server, ChatMode::Text)
        .send_text("Hello")
        .await
        .unwrap();

    assert_eq!(reply.reply_text, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn server_failure_on_chat_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, ChatMode::Text)
        .send_text("Hello")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ServerError { status: 503, .. }));
}

#[tokio::test]
async fn health_reports_backend_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "healthy" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "degraded" })))
        .mount(&server)
        .await;

    let client = client(&server, ChatMode::Text);
    assert!(client.check_health().await);
    assert!(!client.check_health().await);
}

#[tokio::test]
async fn health_fails_when_backend_is_unreachable() {
    let server = MockServer::start().await;
    let mut config = backend(&server);
    config.text_url = Url::parse("http://127.0.0.1:9").unwrap();
    drop(server);

    let client = HttpReplyClient::new(&config, ChatMode::Text).unwrap();
    assert!(!client.check_health().await);
}

#[tokio::test]
async fn voice_chat_uploads_clip_and_resolves_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/voice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transcript": "I go to school",
            "corrected_transcript": "I go to school.",
            "reply": "Great sentence!",
            "audio_url": "/audio/response.mp3"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let context = VoiceContext {
        history: vec![Message::user("Hi"), Message::assistant("Hello!")],
        client_transcript: Some("I go to school".into()),
    };
    let reply = client(&server, ChatMode::Voice)
        .send_audio(&AudioClip::wav(b"RIFF-test".to_vec()), &context)
        .await
        .unwrap();

    assert_eq!(reply.transcript.as_deref(), Some("I go to school"));
    assert_eq!(reply.corrected_transcript.as_deref(), Some("I go to school."));
    assert_eq!(reply.reply_text, "Great sentence!");
    assert_eq!(
        reply.audio_ref,
        Some(format!("{}/audio/response.mp3", server.uri()))
    );

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains(r#"name="file"; filename="recording.wav""#));
    assert!(body.contains("RIFF-test"));
    assert!(body.contains(r#"name="client_transcript""#));
    assert!(body.contains(r#"{"type":"user","content":"Hi"}"#));
}

#[tokio::test]
async fn voice_chat_omits_blank_transcript_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/voice"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "transcript": "", "reply": "Hm?" })),
        )
        .mount(&server)
        .await;

    let context = VoiceContext {
        history: Vec::new(),
        client_transcript: Some("   ".into()),
    };
    let reply = client(&server, ChatMode::Voice)
        .send_audio(&AudioClip::wav(vec![0; 8]), &context)
        .await
        .unwrap();

    assert_eq!(reply.transcript, None);
    assert_eq!(reply.audio_ref, None);
    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(!body.contains("client_transcript"));
}

#[tokio::test]
async fn voice_backend_detail_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/voice"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "detail": "Audio file is empty" })),
        )
        .mount(&server)
        .await;

    let err = client(&server, ChatMode::Voice)
        .send_audio(&AudioClip::wav(Vec::new()), &VoiceContext::default())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Audio file is empty"));
}

#[tokio::test]
async fn clear_history_posts_to_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clear-history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, ChatMode::Text).clear_history().await.unwrap();
}

#[tokio::test]
async fn fetch_history_maps_roles_and_retries_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get-history"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get-history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "history": [
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": "Hello!" }
            ],
            "count": 2
        })))
        .mount(&server)
        .await;

    let history = client(&server, ChatMode::Text).fetch_history().await.unwrap();

    assert_eq!(
        history,
        vec![Message::user("Hi"), Message::assistant("Hello!")]
    );
}

/// Accepts connections, reads one full `/chat` request from each, then hangs
/// up without answering. Returns the base URL and the request counter.
async fn hang_up_after_request() -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
                if String::from_utf8_lossy(&request).contains(r#""message":"Hello"}"#) {
                    counter.fetch_add(1, Ordering::SeqCst);
                    break;
                }
            }
            drop(socket);
        }
    });

    (url, received)
}

#[tokio::test]
async fn chat_is_not_resent_after_connection_drops() {
    let (url, received) = hang_up_after_request().await;
    let client = HttpReplyClient::new(&backend_at(url), ChatMode::Text).unwrap();

    let err = client.send_text("Hello").await.unwrap_err();

    assert!(matches!(err, Error::ConnectionLost(_)), "got {err:?}");
    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let client =
        HttpReplyClient::new(&backend_at(Url::parse("http://127.0.0.1:9").unwrap()), ChatMode::Text)
            .unwrap();

    let err = client.send_text("Hello").await.unwrap_err();

    assert!(matches!(err, Error::NetworkUnreachable(_)), "got {err:?}");
}
