//! Route tests driving the router with a scripted provider.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_tool_runtime::frame;
use relay_tool_runtime::provider::mock::MockLlmProvider;
use relay_tool_runtime::{GetWeatherTool, LlmError, Role, SseParser, StreamEvent};

use crate::router::build_router;
use crate::state::AppState;
use crate::store::ConversationStore;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    provider: Arc<MockLlmProvider>,
    _dir: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    // Port 9 (discard) refuses connections, so weather lookups fail fast.
    test_app_with_weather("http://127.0.0.1:9/geo", "http://127.0.0.1:9/forecast").await
}

async fn test_app_with_weather(geocoding_url: &str, forecast_url: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = relay_core::Config::for_profile("RELAY_ROUTE_TESTS");
    config.storage.data_dir = dir.path().to_path_buf();
    config.server.cors_origin = "*".to_string();

    let provider = Arc::new(MockLlmProvider::new());
    let store = Arc::new(ConversationStore::open(dir.path()).await.unwrap());
    let state = Arc::new(
        AppState::with_weather_tool(config, provider.clone(), store, || {
            GetWeatherTool::with_endpoints(geocoding_url, forecast_url)
        })
        .unwrap(),
    );

    TestApp {
        router: build_router(state.clone()).unwrap(),
        state,
        provider,
        _dir: dir,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn decode_events(body: &str) -> Vec<StreamEvent> {
    SseParser::new()
        .feed(body.as_bytes())
        .unwrap()
        .iter()
        .filter_map(|f| frame::decode_event(f))
        .collect()
}

#[tokio::test]
async fn test_health() {
    let app = test_app().await;
    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "mock");
}

#[tokio::test]
async fn test_chat_streams_and_persists() {
    let app = test_app().await;
    app.provider.queue_text("Hello there!");

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/chat", json!({"message": "Hi"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let events = decode_events(&body_text(response).await);
    let StreamEvent::ConversationId { id } = &events[0] else {
        panic!("first event should announce the conversation: {:?}", events[0]);
    };
    assert!(events.contains(&StreamEvent::text("Hello there!")));
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    let messages = app.state.store.messages(id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hi");
    assert_eq!(messages[1].content, "Hello there!");

    let response = app
        .router
        .oneshot(get(&format!("/api/conversations/{id}/messages")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 2);
    assert_eq!(listed[1]["role"], "assistant");
}

#[tokio::test]
async fn test_chat_weather_lookup_event_order() {
    let weather = MockServer::start().await;
    Mock::given(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"name": "Tokyo", "country": "Japan", "latitude": 35.69, "longitude": 139.69}]
        })))
        .mount(&weather)
        .await;
    Mock::given(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "current": {"temperature_2m": 60.0, "wind_speed_10m": 4.0, "weather_code": 0}
        })))
        .mount(&weather)
        .await;
    let app = test_app_with_weather(
        &format!("{}/v1/search", weather.uri()),
        &format!("{}/v1/forecast", weather.uri()),
    )
    .await;
    app.provider
        .queue_tool_calls(&[("w1", "get_weather", json!({"location": "Tokyo, Japan"}))]);
    app.provider.queue_text("It is 60°F and clear in Tokyo.");

    let response = app
        .router
        .oneshot(post_json("/api/chat", json!({"message": "Weather in Tokyo?"})))
        .await
        .unwrap();
    let events: Vec<StreamEvent> = decode_events(&body_text(response).await)
        .into_iter()
        .filter(|e| !matches!(e, StreamEvent::Usage { .. } | StreamEvent::ConversationId { .. }))
        .collect();

    assert_eq!(
        events.iter().map(|e| e.kind()).collect::<Vec<_>>(),
        vec!["tool_call", "tool_result", "text_delta", "done"]
    );
    let StreamEvent::ToolResult { id, content, is_error, .. } = &events[1] else {
        panic!("expected a tool result: {:?}", events[1]);
    };
    assert_eq!(id, "w1");
    assert!(!is_error);
    let report: Value = serde_json::from_str(content).unwrap();
    assert_eq!(report["location"], "Tokyo, Japan");
    assert_eq!(report["temperature"], "60°F");
    assert_eq!(report["wind_speed"], "4 mph");
    assert_eq!(report["conditions"], "Clear sky");
    assert_eq!(events[2], StreamEvent::text("It is 60°F and clear in Tokyo."));
}

#[tokio::test]
async fn test_chat_replays_stored_history() {
    let app = test_app().await;
    let id = app.state.store.create_conversation("first").await.unwrap();
    {
        use relay_tool_runtime::MessageStore;
        app.state.store.append_message(&id, Role::User, "first").await.unwrap();
        app.state.store.append_message(&id, Role::Assistant, "reply").await.unwrap();
    }
    app.provider.queue_text("second reply");

    let response = app
        .router
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "second", "conversation_id": id, "history": [{"role": "user", "content": "ignored"}]}),
        ))
        .await
        .unwrap();
    let events = decode_events(&body_text(response).await);
    assert_eq!(events[0], StreamEvent::ConversationId { id: id.clone() });

    let request = &app.provider.requests()[0];
    assert_eq!(request.messages.len(), 3);
    assert_eq!(app.state.store.messages(&id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_chat_unknown_conversation_is_404() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "hi", "conversation_id": "does-not-exist"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.provider.call_count(), 0);
}

#[tokio::test]
async fn test_chat_rejects_bad_attachment() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "look", "attachments": [{"type": "image", "url": "ftp://example.com/a.png"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_hides_suggestion_tool() {
    let app = test_app().await;
    app.provider.queue_tool_calls(&[(
        "s1",
        "suggest_actions",
        json!({"suggestions": ["Weather in Paris", "Weekly forecast"]}),
    )]);
    app.provider.queue_text("Anything else?");

    let response = app
        .router
        .oneshot(post_json("/api/chat", json!({"message": "Hi"})))
        .await
        .unwrap();
    let events = decode_events(&body_text(response).await);

    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::ToolCall { .. } | StreamEvent::ToolResult { .. })));
    let suggestions_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Suggestions { .. }))
        .unwrap();
    assert_eq!(
        events[suggestions_at],
        StreamEvent::Suggestions {
            suggestions: vec!["Weather in Paris".into(), "Weekly forecast".into()]
        }
    );
    assert_eq!(events[suggestions_at + 1], StreamEvent::Done);

    // Chat offers the weather tool, the hidden tool and web search.
    let request = &app.provider.requests()[0];
    let names: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["get_weather", "suggest_actions"]);
    assert_eq!(request.server_tools.len(), 1);
}

#[tokio::test]
async fn test_chat_provider_failure_ends_with_error() {
    let app = test_app().await;
    app.provider.queue_rejection(LlmError::AuthError);

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/chat", json!({"message": "Hi"})))
        .await
        .unwrap();
    let events = decode_events(&body_text(response).await);

    let StreamEvent::ConversationId { id } = &events[0] else {
        panic!("missing conversation id");
    };
    assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
    assert!(app.state.store.messages(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sse_requires_message() {
    let app = test_app().await;
    let missing = app.router.clone().oneshot(get("/api/sse")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let empty = app.router.oneshot(get("/api/sse?message=")).await.unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(empty).await).unwrap();
    assert_eq!(body["error"], "Missing message parameter");
}

#[tokio::test]
async fn test_sse_uses_named_frames() {
    let app = test_app().await;
    app.provider.queue_text("Short answer.");

    let response = app
        .router
        .oneshot(get("/api/sse?message=hello%20there"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;

    assert!(body.starts_with("event: text_delta\ndata: "));
    assert!(body.ends_with("event: done\ndata: {\"type\":\"done\"}\n\n"));
    let request = &app.provider.requests()[0];
    assert!(request.tools.is_empty());
}

#[tokio::test]
async fn test_generate_streams_story() {
    let app = test_app().await;
    app.provider.queue_text("Once upon a time");

    let response = app
        .router
        .oneshot(post_json("/api/generate", json!({"prompt": "a lighthouse"})))
        .await
        .unwrap();
    let events = decode_events(&body_text(response).await);

    assert_eq!(events[0], StreamEvent::text("Once upon a time"));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    let request = &app.provider.requests()[0];
    assert_eq!(request.max_tokens, 1024);
    assert!(request.system_prompt.as_deref().unwrap().contains("storyteller"));
}

#[tokio::test]
async fn test_tools_returns_steps_and_final_text() {
    let app = test_app().await;
    app.provider
        .queue_tool_calls(&[("w1", "get_weather", json!({"location": "Paris, France"}))]);
    app.provider.queue_text("I could not reach the weather service.");

    let response = app
        .router
        .oneshot(post_json("/api/tools", json!({"message": "Weather in Paris?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();

    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["type"], "tool_call");
    assert_eq!(steps[0]["content"], "Calling get_weather...");
    assert_eq!(steps[1]["type"], "tool_result");
    assert!(steps[1]["content"].as_str().unwrap().contains("error"));
    assert_eq!(body["response"], "I could not reach the weather service.");
}

#[tokio::test]
async fn test_tools_failure_is_500() {
    let app = test_app().await;
    app.provider.queue_rejection(LlmError::AuthError);

    let response = app
        .router
        .oneshot(post_json("/api/tools", json!({"message": "hi"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_unknown_conversation_messages_is_404() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(get("/api/conversations/missing/messages"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
