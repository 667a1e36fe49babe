use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use parley_server::{app, config::Config, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Upstream stand-in that records every start request.
#[derive(Clone)]
struct MockUpstream {
    status: StatusCode,
    reply: String,
    delay: Duration,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

impl MockUpstream {
    fn new(status: StatusCode, reply: Value) -> Self {
        Self {
            status,
            reply: reply.to_string(),
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

async fn start(
    State(mock): State<MockUpstream>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    mock.seen.lock().unwrap().push((auth, payload));
    tokio::time::sleep(mock.delay).await;
    (mock.status, mock.reply.clone())
}

async fn serve_upstream(mock: MockUpstream) -> String {
    let router = Router::new()
        .route("/start", post(start))
        .route("/{agent}/start", post(start))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn local_relay(base: &str, window_ms: u64) -> Router {
    let mut config = Config::default();
    config.upstream.local_url = base.to_string();
    config.upstream.api_key = Some("must-not-leak".to_string());
    config.relay.dedup_window_ms = window_ms;
    app(AppState::from_config(&config).unwrap())
}

fn connect(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn connect_relays_and_normalizes_daily_fields() {
    let mock = MockUpstream::new(
        StatusCode::OK,
        json!({"dailyRoom": "https://rooms.example/x", "dailyToken": "tok-y", "sessionId": "s-1"}),
    );
    let base = serve_upstream(mock.clone()).await;
    let relay = local_relay(&base, 2000);

    let response = relay
        .oneshot(connect(
            "/api/connect?voiceAgentName=front-desk&voiceName=Puck&name=Sam",
            json!({"orderId": "A-7", "locale": "en-GB"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(
        body,
        json!({
            "room_url": "https://rooms.example/x",
            "token": "tok-y",
            "sessionId": "s-1",
            "voiceAgentName": "front-desk"
        })
    );

    let seen = mock.seen.lock().unwrap();
    let (auth, payload) = &seen[0];
    assert!(auth.is_none(), "local mode must not send the API key");
    assert_eq!(payload["createDailyRoom"], json!(true));
    assert_eq!(payload["dailyRoomProperties"]["start_video_off"], json!(true));
    let agent_body = &payload["body"];
    assert_eq!(agent_body["voiceAgentName"], "front-desk");
    assert_eq!(agent_body["voiceName"], "Puck");
    assert_eq!(agent_body["userName"], "Sam");
    assert_eq!(agent_body["orderId"], "A-7");
    assert_eq!(agent_body["locale"], "en-GB");
}

#[tokio::test]
async fn plain_field_names_pass_through_and_missing_session_is_null() {
    let mock = MockUpstream::new(
        StatusCode::OK,
        json!({"room_url": "https://rooms.example/x", "token": "tok-y"}),
    );
    let base = serve_upstream(mock).await;

    let response = local_relay(&base, 2000)
        .oneshot(connect("/api/connect?voiceAgentName=a", json!({})))
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(body["room_url"], "https://rooms.example/x");
    assert_eq!(body["token"], "tok-y");
    assert_eq!(body["sessionId"], Value::Null);
}

#[tokio::test]
async fn identical_requests_within_window_share_one_upstream_call() {
    let mut mock = MockUpstream::new(
        StatusCode::OK,
        json!({"room_url": "https://rooms.example/x", "token": "tok"}),
    );
    mock.delay = Duration::from_millis(100);
    let base = serve_upstream(mock.clone()).await;
    let relay = local_relay(&base, 500);
    let uri = "/api/connect?voiceAgentName=front-desk&voiceName=Puck";

    let (first, second) = tokio::join!(
        relay.clone().oneshot(connect(uri, json!({}))),
        relay.clone().oneshot(connect(uri, json!({}))),
    );
    assert_eq!(first.unwrap().status(), StatusCode::OK);
    assert_eq!(second.unwrap().status(), StatusCode::OK);
    assert_eq!(mock.calls(), 1);

    // A different query is a different key.
    let response = relay
        .clone()
        .oneshot(connect(
            "/api/connect?voiceAgentName=front-desk&voiceName=Kore",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.calls(), 2);

    tokio::time::sleep(Duration::from_millis(800)).await;
    let third = relay.oneshot(connect(uri, json!({}))).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn upstream_error_status_is_reported_with_details() {
    let mock = MockUpstream::new(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"message": "agent pool exhausted"}),
    );
    let base = serve_upstream(mock.clone()).await;
    let relay = local_relay(&base, 2000);

    let response = relay
        .clone()
        .oneshot(connect("/api/connect?voiceAgentName=a", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Failed to start agent");
    let details = body["details"].as_str().unwrap();
    assert!(details.starts_with("API responded with status: 503 - "));
    assert!(details.contains("agent pool exhausted"));

    // Failures are not cached: a retry reaches the upstream again.
    relay
        .oneshot(connect("/api/connect?voiceAgentName=a", json!({})))
        .await
        .unwrap();
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn unparseable_upstream_reply_is_an_error() {
    let mut mock = MockUpstream::new(StatusCode::OK, Value::Null);
    mock.reply = "<html>starting</html>".to_string();
    let base = serve_upstream(mock).await;

    let response = local_relay(&base, 2000)
        .oneshot(connect("/api/connect?voiceAgentName=a", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["details"]
        .as_str()
        .unwrap()
        .starts_with("Failed to parse upstream response"));
}

#[tokio::test]
async fn cloud_mode_targets_agent_url_with_bearer_key() {
    let mock = MockUpstream::new(StatusCode::OK, json!({"room_url": "r", "token": "t"}));
    let base = serve_upstream(mock.clone()).await;

    let mut config = Config::default();
    config.upstream.cloud_url_template = format!("{base}/{{agent}}");
    config.upstream.agent_name = "hospital-bot".to_string();
    config.upstream.api_key = Some("sk-cloud".to_string());
    let relay = app(AppState::from_config(&config).unwrap());

    let response = relay
        .oneshot(connect("/api/connect", json!({"voiceAgentName": "triage"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = mock.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-cloud"));
    assert_eq!(seen[0].1["body"]["voiceAgentName"], "triage");
}
