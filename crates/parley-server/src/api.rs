//! HTTP handlers for the relay.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Query,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{SecondsFormat, Utc};
use parley_types::SessionCredentials;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::dedup::request_key;
use crate::upstream::RelayError;
use crate::AppState;

/// Routes listed in the body of a 404.
pub const AVAILABLE_ROUTES: [&str; 3] = ["/health", "/api/test", "/api/connect"];

/// Optional fields forwarded to the agent, resolved query-first.
const FORWARDED_FIELDS: [&str; 4] = ["systemInstruction", "voiceName", "phoneNumber", "orderId"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("upstream failure: {0}")]
    Upstream(Arc<RelayError>),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Upstream(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Failed to start agent",
                    "details": err.to_string(),
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Handler for `GET /health`.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": timestamp(),
    }))
}

/// Handler for `GET /api/test`.
pub async fn test_handler() -> Json<Value> {
    Json(json!({
        "message": "API server is working",
        "timestamp": timestamp(),
    }))
}

/// Catch-all for unknown routes.
pub async fn not_found_handler(method: Method, uri: Uri) -> (StatusCode, Json<Value>) {
    tracing::warn!(%method, path = uri.path(), "route not found");
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "method": method.as_str(),
            "path": uri.path(),
            "availableRoutes": AVAILABLE_ROUTES,
        })),
    )
}

/// A connect request with its fields resolved from query and body.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub voice_agent_name: String,
    /// Custom body forwarded to the agent.
    pub agent_body: Map<String, Value>,
}

/// Query strings win over the body. Empty values count as absent.
fn resolve(query: &BTreeMap<String, String>, body: &Map<String, Value>, key: &str) -> Option<Value> {
    if let Some(value) = query.get(key).filter(|v| !v.is_empty()) {
        return Some(Value::String(value.clone()));
    }
    body.get(key)
        .filter(|v| !v.is_null() && v.as_str() != Some(""))
        .cloned()
}

impl ConnectRequest {
    pub fn resolve(
        query: &BTreeMap<String, String>,
        body: &Map<String, Value>,
    ) -> Result<Self, ApiError> {
        let voice_agent_name = match resolve(query, body, "voiceAgentName") {
            Some(Value::String(name)) => name,
            _ => {
                return Err(ApiError::BadRequest(
                    "voiceAgentName is required (as query parameter or in request body)"
                        .to_string(),
                ))
            }
        };

        let mut agent_body = Map::new();
        agent_body.insert(
            "voiceAgentName".to_string(),
            Value::String(voice_agent_name.clone()),
        );
        for field in FORWARDED_FIELDS {
            if let Some(value) = resolve(query, body, field) {
                agent_body.insert(field.to_string(), value);
            }
        }
        let user_name = query
            .get("name")
            .filter(|v| !v.is_empty())
            .map(|v| Value::String(v.clone()))
            .or_else(|| resolve(&BTreeMap::new(), body, "name"))
            .or_else(|| resolve(&BTreeMap::new(), body, "userName"));
        if let Some(user_name) = user_name {
            agent_body.insert("userName".to_string(), user_name);
        }
        for (key, value) in body {
            if key != "voiceAgentName" {
                agent_body.insert(key.clone(), value.clone());
            }
        }

        Ok(Self {
            voice_agent_name,
            agent_body,
        })
    }
}

fn parse_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::BadRequest(
            "request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(ApiError::BadRequest(format!("malformed JSON body: {e}"))),
    }
}

/// Handler for `POST /api/connect`.
pub async fn connect_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Result<Json<SessionCredentials>, ApiError> {
    let body = parse_body(&body)?;
    let request = ConnectRequest::resolve(&query, &body).inspect_err(|_| {
        tracing::warn!("connect request without voiceAgentName");
    })?;
    let agent = request.voice_agent_name;
    let key = request_key(&agent, &query);
    tracing::info!(%agent, "connect request");

    let upstream = state.upstream.clone();
    let agent_body = request.agent_body;
    let start_agent = agent.clone();
    let start = move || {
        let upstream = upstream.clone();
        let agent = start_agent.clone();
        let body = agent_body.clone();
        async move { upstream.start_session(&agent, body).await }
    };

    let credentials = state.in_flight.run(&key, start).await.map_err(|err| {
        tracing::error!(%agent, error = %err, "failed to start agent");
        ApiError::Upstream(err)
    })?;

    tracing::info!(
        %agent,
        has_room_url = !credentials.room_url.is_empty(),
        token_len = credentials.token.len(),
        "session credentials issued"
    );
    Ok(Json(credentials))
}
