//! Backend Query Service Contract Tests
//!
//! These tests verify exact HTTP format compliance for the turn dispatcher:
//! request shape, success and error body parsing, and audio payload decoding.

use base64::Engine;
use serde_json::json;
use socorro::backend::{Dispatcher, TurnDispatcher};
use socorro::config::BackendConfig;
use socorro::error::SessionError;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher_for(server: &MockServer) -> TurnDispatcher {
    let config = BackendConfig {
        base_url: server.uri(),
        request_timeout_s: 5,
    };
    TurnDispatcher::new(&config).expect("build dispatcher")
}

#[tokio::test]
async fn request_posts_message_to_realtime_chat() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/realtime-chat"))
        .and(body_partial_json(json!({ "message": "me duele el pecho" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Llama al 112 de inmediato.",
            "audio": null,
            "rag_used": true,
            "tts_error": null
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let reply = dispatcher_for(&mock_server)
        .dispatch("me duele el pecho")
        .await
        .expect("turn should succeed");

    assert_eq!(reply.response_text, "Llama al 112 de inmediato.");
    assert!(reply.used_knowledge_base);
    assert!(reply.audio_clip.is_none());
    assert!(reply.tts_error.is_none());
}

#[tokio::test]
async fn audio_payload_is_base64_decoded() {
    let mock_server = MockServer::start().await;
    let clip_bytes = b"fake mp3 bytes".to_vec();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&clip_bytes);

    Mock::given(method("POST"))
        .and(path("/api/realtime-chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Mantenga la calma.",
            "audio": encoded,
        })))
        .mount(&mock_server)
        .await;

    let reply = dispatcher_for(&mock_server)
        .dispatch("ayuda")
        .await
        .expect("turn should succeed");

    let clip = reply.audio_clip.expect("clip present");
    assert_eq!(clip.bytes, clip_bytes);
    // rag_used defaults to false when the backend omits it.
    assert!(!reply.used_knowledge_base);
}

#[tokio::test]
async fn undecodable_audio_still_yields_the_reply_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/realtime-chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Mantenga la calma.",
            "audio": "%%% not base64 %%%",
        })))
        .mount(&mock_server)
        .await;

    let reply = dispatcher_for(&mock_server)
        .dispatch("ayuda")
        .await
        .expect("turn should succeed");

    assert_eq!(reply.response_text, "Mantenga la calma.");
    assert!(reply.audio_clip.is_none());
}

#[tokio::test]
async fn tts_error_is_surfaced_alongside_the_reply() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/realtime-chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Aplique presión sobre la herida.",
            "audio": null,
            "tts_error": "synthesis backend unavailable"
        })))
        .mount(&mock_server)
        .await;

    let reply = dispatcher_for(&mock_server)
        .dispatch("hay mucha sangre")
        .await
        .expect("turn should succeed");

    assert_eq!(reply.tts_error.as_deref(), Some("synthesis backend unavailable"));
    assert!(reply.audio_clip.is_none());
}

#[tokio::test]
async fn error_body_maps_to_service_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/realtime-chat"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": "model overloaded",
            "details": "try again in a few seconds"
        })))
        .mount(&mock_server)
        .await;

    let err = dispatcher_for(&mock_server)
        .dispatch("ayuda")
        .await
        .expect_err("must fail");

    match err {
        SessionError::Service { message, details } => {
            assert_eq!(message, "model overloaded");
            assert_eq!(details.as_deref(), Some("try again in a few seconds"));
        }
        other => panic!("expected service error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_body_falls_back_to_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/realtime-chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .mount(&mock_server)
        .await;

    let err = dispatcher_for(&mock_server)
        .dispatch("ayuda")
        .await
        .expect_err("must fail");

    match err {
        SessionError::Service { message, details } => {
            assert!(message.contains("500"), "message was: {message}");
            assert!(details.is_none());
        }
        other => panic!("expected service error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    // Port 1 is never listening.
    let config = BackendConfig {
        base_url: "http://127.0.0.1:1".into(),
        request_timeout_s: 5,
    };
    let dispatcher = TurnDispatcher::new(&config).expect("build dispatcher");

    let err = dispatcher.dispatch("ayuda").await.expect_err("must fail");
    assert!(matches!(err, SessionError::Transport(_)));
}

#[tokio::test]
async fn exactly_one_request_per_turn() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/realtime-chat"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({
            "error": "bad gateway"
        })))
        // A failing turn must not be retried.
        .expect(1)
        .mount(&mock_server)
        .await;

    let dispatcher = dispatcher_for(&mock_server);
    let err = dispatcher.dispatch("ayuda").await.expect_err("must fail");
    assert!(matches!(err, SessionError::Service { .. }));
}
