//! End-to-end tests for bridgebot
//!
//! These drive the whole bridge through the in-memory transport against
//! mock text and image backends; no real backend is needed.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use bridgebot::control::control_router;
use bridgebot::transport::{BotIdentity, InMemoryTransport, TransportEvent};
use bridgebot::{Bridge, Settings};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_settings(text_url: &str, image_url: &str) -> (tempfile::NamedTempFile, Settings) {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[bot]
name = "Fox"

[text_backend]
url = "{text_url}"
unload_poll_ms = 20

[image_backend]
url = "{image_url}"

[prompts.templates]
chat = ["{{{{bot}}}} chats with {{{{user}}}}."]

[routing.default]
template = "chat"

[image_templates.image]
prompt = "{{{{prompt}}}}, highly detailed"
negative = "blurry"
"#
    )
    .unwrap();
    let settings = Settings::from_file(file.path()).unwrap();
    (file, settings)
}

fn transport() -> Arc<InMemoryTransport> {
    Arc::new(InMemoryTransport::new(BotIdentity {
        id: 1,
        name: "Fox".to_string(),
    }))
}

async fn mount_generate(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "results": [{ "text": text }] })),
        )
        .mount(server)
        .await;
}

fn prompts_sent(requests: &[wiremock::Request]) -> Vec<String> {
    requests
        .iter()
        .filter(|r| r.url.path() == "/api/v1/generate")
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["prompt"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_image_prefix_end_to_end() {
    let text = MockServer::start().await;
    let image = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/API/GetNewSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_id": "s1" })))
        .expect(1)
        .mount(&image)
        .await;
    let encoded = base64::engine::general_purpose::STANDARD.encode([7u8, 7, 7]);
    Mock::given(method("POST"))
        .and(path("/API/GenerateText2Image"))
        .and(body_partial_json(json!({
            "session_id": "s1",
            "prompt": "a red fox, highly detailed",
            "negativeprompt": "blurry"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [format!("data:image/png;base64,{}", encoded)]
        })))
        .expect(1)
        .mount(&image)
        .await;

    let (_file, settings) = write_settings(&text.uri(), &image.uri());
    let transport = transport();
    let bridge = Bridge::start(&settings, transport.clone(), CancellationToken::new()).unwrap();

    let inbound = transport
        .receive(5, 42, "alice", "<@1> [image] a red fox", None)
        .await;
    bridge.submit(inbound.clone()).await.unwrap();
    bridge.shutdown().await.unwrap();

    let events = transport.events().await;
    let placeholders: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, TransportEvent::Placeholder { .. }))
        .collect();
    let edits: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TransportEvent::Edit {
                text, attachment, ..
            } => Some((text.clone(), attachment.clone())),
            _ => None,
        })
        .collect();

    assert_eq!(placeholders.len(), 1);
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, "a red fox");
    let attachment = edits[0].1.as_ref().unwrap();
    assert_eq!(attachment.file_name, format!("{}.png", inbound.id));
    assert_eq!(attachment.payload.bytes, vec![7, 7, 7]);
    assert!(prompts_sent(&text.received_requests().await.unwrap()).is_empty());
}

#[tokio::test]
async fn test_image_failure_renders_message() {
    let text = MockServer::start().await;
    let image = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/API/GetNewSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_id": "s1" })))
        .mount(&image)
        .await;
    Mock::given(method("POST"))
        .and(path("/API/GenerateText2Image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "images": [] })))
        .mount(&image)
        .await;

    let (_file, settings) = write_settings(&text.uri(), &image.uri());
    let transport = transport();
    let bridge = Bridge::start(&settings, transport.clone(), CancellationToken::new()).unwrap();

    let inbound = transport
        .receive(5, 42, "alice", "<@1> [image] nothing at all", None)
        .await;
    bridge.submit(inbound).await.unwrap();
    bridge.shutdown().await.unwrap();

    let events = transport.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        TransportEvent::Edit { text, attachment: None, .. } if text == "Failed to generate an image."
    )));
}

#[tokio::test]
async fn test_conversation_follows_reply_chain() {
    let text = MockServer::start().await;
    let image = MockServer::start().await;
    mount_generate(&text, " Hello alice!\n# User: more").await;

    let (_file, settings) = write_settings(&text.uri(), &image.uri());
    let transport = transport();
    let bridge = Bridge::start(&settings, transport.clone(), CancellationToken::new()).unwrap();

    let first = transport.receive(5, 42, "alice", "<@1> hi", None).await;
    bridge.orchestrator().handle_turn(&first).await.unwrap();
    let reply_id = transport
        .events()
        .await
        .iter()
        .find_map(|e| match e {
            TransportEvent::Reply { id, text, .. } => {
                assert_eq!(text, "Hello alice!");
                Some(*id)
            }
            _ => None,
        })
        .unwrap();

    let second = transport
        .receive(5, 42, "alice", "how are you?", Some(reply_id))
        .await;
    bridge.orchestrator().handle_turn(&second).await.unwrap();
    bridge.shutdown().await.unwrap();

    let prompts = prompts_sent(&text.received_requests().await.unwrap());
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], "Fox chats with User.\nUser: hi\nFox:");
    assert_eq!(
        prompts[1],
        "Fox chats with User.\nalice: hi\nFox: Hello alice!\nUser: how are you?\nFox:"
    );
}

#[tokio::test]
async fn test_reply_to_missing_turn_is_dropped() {
    let text = MockServer::start().await;
    let image = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/generate"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&text)
        .await;

    let (_file, settings) = write_settings(&text.uri(), &image.uri());
    let transport = transport();
    let bridge = Bridge::start(&settings, transport.clone(), CancellationToken::new()).unwrap();

    let inbound = transport
        .receive(5, 42, "alice", "<@1> what did you say?", Some(404))
        .await;
    bridge.submit(inbound).await.unwrap();
    bridge.shutdown().await.unwrap();

    assert!(transport
        .events()
        .await
        .iter()
        .all(|e| matches!(e, TransportEvent::Typing(_))));
}

#[tokio::test]
async fn test_generation_waits_for_reload() {
    let text = MockServer::start().await;
    let image = MockServer::start().await;
    mount_generate(&text, "back again").await;
    Mock::given(method("POST"))
        .and(path("/api/v1/model"))
        .and(body_partial_json(json!({ "action": "info" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "model_name": "llama-7b", "lora_names": [] }
        })))
        .mount(&text)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/model"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "ok" })))
        .mount(&text)
        .await;

    let (_file, settings) = write_settings(&text.uri(), &image.uri());
    let transport = transport();
    let bridge = Bridge::start(&settings, transport.clone(), CancellationToken::new()).unwrap();
    let router = control_router(bridge.text_client().clone());

    let post = |uri: &'static str| {
        let router = router.clone();
        async move {
            router
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
                .status()
        }
    };

    assert_eq!(post("/unload").await, StatusCode::OK);
    let inbound = transport.receive(5, 42, "alice", "<@1> still there?", None).await;
    bridge.submit(inbound).await.unwrap();

    sleep(Duration::from_millis(150)).await;
    assert!(!transport
        .events()
        .await
        .iter()
        .any(|e| matches!(e, TransportEvent::Reply { .. })));

    assert_eq!(post("/reload").await, StatusCode::OK);
    bridge.shutdown().await.unwrap();

    assert!(transport.events().await.iter().any(|e| matches!(
        e,
        TransportEvent::Reply { text, .. } if text == "back again"
    )));
}
