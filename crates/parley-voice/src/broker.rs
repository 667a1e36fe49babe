//! Client side of the session broker relay.

use std::time::Duration;

use async_trait::async_trait;
use parley_types::{AgentProfile, SessionCredentials};
use serde_json::json;

use crate::config::BrokerConfig;
use crate::error::VoiceError;

/// Exchanges an agent profile for transport credentials.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn request_credentials(
        &self,
        agent: &AgentProfile,
    ) -> Result<SessionCredentials, VoiceError>;
}

/// Calls `POST {base_url}/api/connect` on a Parley relay.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl BrokerClient {
    pub fn new(config: &BrokerConfig) -> Result<Self, VoiceError> {
        if config.base_url.trim().is_empty() {
            return Err(VoiceError::Config("broker base_url is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/connect", config.base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Agent settings travel as query parameters; the body stays empty.
pub(crate) fn connect_query(agent: &AgentProfile) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("voiceAgentName", agent.id.clone()),
        ("systemInstruction", agent.system_instruction.clone()),
        ("voiceName", agent.voice_name.clone()),
    ];
    if let Some(phone) = agent.phone_number.as_deref().filter(|p| !p.is_empty()) {
        query.push(("phoneNumber", phone.to_string()));
    }
    if let Some(name) = agent.user_name.as_deref().filter(|n| !n.is_empty()) {
        query.push(("name", name.to_string()));
    }
    query
}

#[async_trait]
impl CredentialBroker for BrokerClient {
    async fn request_credentials(
        &self,
        agent: &AgentProfile,
    ) -> Result<SessionCredentials, VoiceError> {
        tracing::info!(agent = %agent.id, endpoint = %self.endpoint, "requesting session credentials");

        let response = self
            .http
            .post(&self.endpoint)
            .query(&connect_query(agent))
            .json(&json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Broker {
                status: status.as_u16(),
                body,
            });
        }

        let credentials: SessionCredentials = response.json().await?;
        if !credentials.is_complete() {
            tracing::warn!(agent = %agent.id, "broker returned empty credentials");
            return Err(VoiceError::MissingCredentials);
        }
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_carries_optional_caller_fields_only_when_set() {
        let mut agent = AgentProfile::new("support-bot", "Support");
        agent.system_instruction = "Be brief.".to_string();
        agent.voice_name = "Aoede".to_string();

        let keys: Vec<&str> = connect_query(&agent).iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["voiceAgentName", "systemInstruction", "voiceName"]);

        agent.phone_number = Some("+15550100".to_string());
        agent.user_name = Some("Sam".to_string());
        let query = connect_query(&agent);
        assert!(query.contains(&("phoneNumber", "+15550100".to_string())));
        assert!(query.contains(&("name", "Sam".to_string())));
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let err = BrokerClient::new(&BrokerConfig::new("  ")).unwrap_err();
        assert!(matches!(err, VoiceError::Config(_)));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = BrokerClient::new(&BrokerConfig::new("http://relay.local/")).unwrap();
        assert_eq!(client.endpoint(), "http://relay.local/api/connect");
    }
}
