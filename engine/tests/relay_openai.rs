//! Relay flow against a fake OpenAI API.

use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dalibot_context::{HistorySettings, SessionDefaults, SessionStore};
use dalibot_engine::{Relay, RelayError, RelayReply, RelaySettings};
use dalibot_providers::{ClientSettings, OpenAIClient, RetryPolicy};
use dalibot_types::{ApiKey, ModelSelection, Role, SessionId};

fn completion(content: &str) -> Value {
    json!({
        "model": "stub",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12 }
    })
}

fn relay(server: &MockServer) -> Relay<OpenAIClient> {
    let client = OpenAIClient::new(
        ApiKey::new("sk-test"),
        ClientSettings {
            base_url: server.uri(),
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 0,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                jitter_factor: 0.0,
            },
        },
    )
    .unwrap();
    let sessions = SessionStore::new(SessionDefaults {
        system_prompt: "be brief".to_string(),
        models: ModelSelection::new("gpt-4o".into(), "dall-e-3".into()),
        history: HistorySettings::default(),
    });
    Relay::new(
        client,
        sessions,
        RelaySettings {
            bot_name: "Dalibot".to_string(),
            bot_username: None,
            router_model: "gpt-4o-mini".into(),
            image_size: "1024x1024".to_string(),
            temperature: 1.0,
        },
    )
}

async fn mount_router(server: &MockServer, reply: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini", "max_tokens": 512 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(reply)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn text_turn_uses_history_window() {
    let server = MockServer::start().await;
    mount_router(&server, "@noimage").await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "messages": [
                { "role": "system", "content": "be brief" },
                { "role": "user", "content": "ping" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("pong")))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay(&server);
    let chat = SessionId::new(1);
    let reply = relay.handle_text(chat, "Ada", "ping").await.unwrap();

    assert_eq!(reply, RelayReply::Text("pong".to_string()));
    let entries = relay.sessions().entries(chat);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].role(), Role::Assistant);
}

#[tokio::test]
async fn image_request_returns_photo() {
    let server = MockServer::start().await;
    mount_router(&server, "@image a lighthouse at dusk").await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .and(body_partial_json(json!({ "prompt": "a lighthouse at dusk" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": "https://images.example/lighthouse.png" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay(&server);
    let reply = relay
        .handle_text(SessionId::new(2), "Ada", "draw a lighthouse")
        .await
        .unwrap();

    assert_eq!(
        reply,
        RelayReply::Photo {
            url: "https://images.example/lighthouse.png".to_string(),
            caption: None,
        }
    );
}

#[tokio::test]
async fn upstream_failure_is_reported_as_relay_error() {
    let server = MockServer::start().await;
    mount_router(&server, "@noimage").await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "gpt-4o" })))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let relay = relay(&server);
    let err = relay
        .handle_text(SessionId::new(3), "Ada", "hello")
        .await
        .unwrap_err();

    let RelayError::Provider(source) = &err;
    assert_eq!(source.status().map(|status| status.as_u16()), Some(401));
    assert!(source.to_string().contains("invalid api key"));
}
