//! Agent profile and session credential definitions.
//!
//! An `AgentProfile` describes which remote voice agent a session talks to
//! and how it should behave. `SessionCredentials` is what the session broker
//! returns: the room endpoint and the token needed to join it.

use serde::{Deserialize, Serialize};

/// A remote voice agent the widget can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    /// Agent identifier, sent upstream as `voiceAgentName`.
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar_url: String,
    /// Prompt forwarded to the agent at session start.
    #[serde(default)]
    pub system_instruction: String,
    /// Synthesis voice the agent should use.
    #[serde(default)]
    pub voice_name: String,
    /// Caller phone number collected by the host form, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Caller name collected by the host form, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            description: String::new(),
            avatar_url: String::new(),
            system_instruction: String::new(),
            voice_name: String::new(),
            phone_number: None,
            user_name: None,
        }
    }
}

/// Transport credentials issued by the session broker.
///
/// Field names match the relay's wire format: `room_url` and `token` in
/// snake case, `sessionId` and `voiceAgentName` in camel case.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCredentials {
    #[serde(default)]
    pub room_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(rename = "voiceAgentName", default)]
    pub voice_agent_name: String,
}

impl SessionCredentials {
    /// Both the endpoint and the token are present.
    pub fn is_complete(&self) -> bool {
        !self.room_url.is_empty() && !self.token.is_empty()
    }
}
