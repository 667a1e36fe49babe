//! Client for the session-issuing upstream.
//!
//! The relay asks the upstream to start an agent and create a room, then
//! hands the room credentials back to the widget. The upstream has used two
//! spellings for the credential fields over time; both are accepted.

use parley_types::SessionCredentials;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::UpstreamConfig;

/// Failure of a single upstream start call.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("API responded with status: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse upstream response: {0}")]
    Parse(String),

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP client for `POST {base}/start`.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    start_url: String,
    bearer: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            start_url: format!("{}/start", config.base_url()),
            bearer: config.bearer_token().map(str::to_string),
        })
    }

    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    /// Starts `agent` with `body` forwarded as the agent's custom body.
    pub async fn start_session(
        &self,
        agent: &str,
        body: Map<String, Value>,
    ) -> Result<SessionCredentials, RelayError> {
        let payload = start_payload(body);
        tracing::debug!(
            url = %self.start_url,
            has_auth = self.bearer.is_some(),
            %agent,
            "sending start request upstream"
        );

        let mut request = self.http.post(&self.start_url).json(&payload);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(status = status.as_u16(), %agent, "upstream responded");

        let text = response.text().await?;
        if !status.is_success() {
            return Err(RelayError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let data: Value =
            serde_json::from_str(&text).map_err(|e| RelayError::Parse(e.to_string()))?;
        Ok(normalize_credentials(&data, agent))
    }
}

/// Wraps the agent's custom body in the upstream start request.
pub fn start_payload(body: Map<String, Value>) -> Value {
    json!({
        "createDailyRoom": true,
        "dailyRoomProperties": { "start_video_off": true },
        "body": body,
    })
}

fn first_text<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| data.get(*key).and_then(Value::as_str))
        .find(|value| !value.is_empty())
}

/// Maps either `room_url`/`token` or `dailyRoom`/`dailyToken` onto
/// [`SessionCredentials`].
///
/// Missing fields are logged and come back empty; the caller decides what an
/// empty credential means.
pub fn normalize_credentials(data: &Value, agent: &str) -> SessionCredentials {
    let room_url = first_text(data, &["room_url", "dailyRoom"]).unwrap_or_default();
    let token = first_text(data, &["token", "dailyToken"]).unwrap_or_default();
    let session_id = data
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string);

    if room_url.is_empty() || token.is_empty() {
        let keys: Vec<&str> = data
            .as_object()
            .map(|object| object.keys().map(String::as_str).collect())
            .unwrap_or_default();
        tracing::error!(
            %agent,
            has_room_url = !room_url.is_empty(),
            has_token = !token.is_empty(),
            ?keys,
            "upstream response is missing session credentials"
        );
    }

    SessionCredentials {
        room_url: room_url.to_string(),
        token: token.to_string(),
        session_id,
        voice_agent_name: agent.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_field_spellings_normalize_alike() {
        let daily = normalize_credentials(&json!({"dailyRoom": "X", "dailyToken": "Y"}), "a");
        let plain = normalize_credentials(&json!({"room_url": "X", "token": "Y"}), "a");
        assert_eq!(daily, plain);
        assert_eq!(daily.room_url, "X");
        assert_eq!(daily.token, "Y");
        assert_eq!(daily.voice_agent_name, "a");
        assert!(daily.session_id.is_none());
    }

    #[test]
    fn plain_spelling_wins_unless_empty() {
        let creds = normalize_credentials(
            &json!({
                "room_url": "",
                "dailyRoom": "https://rooms.example/d",
                "token": "t",
                "dailyToken": "d",
                "sessionId": "s-1"
            }),
            "a",
        );
        assert_eq!(creds.room_url, "https://rooms.example/d");
        assert_eq!(creds.token, "t");
        assert_eq!(creds.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn missing_credentials_come_back_empty() {
        let creds = normalize_credentials(&json!({"status": "starting"}), "a");
        assert!(!creds.is_complete());
        assert_eq!(creds.room_url, "");
    }

    #[test]
    fn payload_wraps_custom_body() {
        let mut body = Map::new();
        body.insert("voiceAgentName".to_string(), json!("front-desk"));
        let payload = start_payload(body);
        assert_eq!(payload["createDailyRoom"], json!(true));
        assert_eq!(payload["dailyRoomProperties"]["start_video_off"], json!(true));
        assert_eq!(payload["body"]["voiceAgentName"], json!("front-desk"));
    }

    #[test]
    fn status_error_text_includes_status_and_body() {
        let err = RelayError::Status {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "API responded with status: 503 - overloaded");
    }
}
