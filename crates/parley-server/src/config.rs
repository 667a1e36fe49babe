//! Relay configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Placeholder in [`UpstreamConfig::cloud_url_template`] replaced by the agent name.
pub const AGENT_PLACEHOLDER: &str = "{agent}";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session-issuing upstream.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// In-flight request deduplication.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Cross-origin allow-list.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Where session credentials come from.
///
/// A non-empty `local_url` selects local mode: requests go straight to that
/// base URL and no API key is sent. Otherwise the relay runs in cloud mode
/// against `cloud_url_template` with `{agent}` replaced by `agent_name`.
#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub local_url: String,

    #[serde(default = "default_cloud_url_template")]
    pub cloud_url_template: String,

    #[serde(default)]
    pub agent_name: String,

    /// Bearer token for cloud mode.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Deduplication of identical connect requests.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// How long a started request is shared with identical requests.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// How often stale entries are swept.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to call the relay with credentials.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3001
}

fn default_cloud_url_template() -> String {
    "https://api.pipecat.daily.co/v1/public/{agent}".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_dedup_window_ms() -> u64 {
    2000
}

fn default_sweep_interval_ms() -> u64 {
    5000
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            local_url: String::new(),
            cloud_url_template: default_cloud_url_template(),
            agent_name: String::new(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("local_url", &self.local_url)
            .field("cloud_url_template", &self.cloud_url_template)
            .field("agent_name", &self.agent_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl UpstreamConfig {
    pub fn is_local(&self) -> bool {
        !self.local_url.trim().is_empty()
    }

    /// Base URL that `/start` is appended to, without a trailing slash.
    pub fn base_url(&self) -> String {
        let base = if self.is_local() {
            self.local_url.trim().to_string()
        } else {
            self.cloud_url_template
                .replace(AGENT_PLACEHOLDER, &self.agent_name)
        };
        base.trim_end_matches('/').to_string()
    }

    /// The key to send as a bearer token. Never set in local mode.
    pub fn bearer_token(&self) -> Option<&str> {
        if self.is_local() {
            return None;
        }
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl RelayConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` (or `PORT`) overrides `server.port`
/// - `PARLEY_LOCAL_UPSTREAM_URL` overrides `upstream.local_url`
/// - `PARLEY_AGENT_NAME` overrides `upstream.agent_name`
/// - `PARLEY_UPSTREAM_API_KEY` overrides `upstream.api_key`
/// - `PARLEY_CORS_ORIGINS` overrides `cors.allowed_origins` (comma-separated)
/// - `PARLEY_DEDUP_WINDOW_MS` overrides `relay.dedup_window_ms`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies overrides from `lookup`, which maps a variable name to its value.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("PARLEY_PORT").or_else(|| lookup("PORT")) {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = lookup("PARLEY_LOCAL_UPSTREAM_URL") {
        config.upstream.local_url = url;
    }
    if let Some(agent) = lookup("PARLEY_AGENT_NAME") {
        config.upstream.agent_name = agent;
    }
    if let Some(key) = lookup("PARLEY_UPSTREAM_API_KEY") {
        config.upstream.api_key = Some(key).filter(|k| !k.is_empty());
    }
    if let Some(origins) = lookup("PARLEY_CORS_ORIGINS") {
        config.cors.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(window) = lookup("PARLEY_DEDUP_WINDOW_MS") {
        if let Ok(parsed) = window.parse() {
            config.relay.dedup_window_ms = parsed;
        }
    }
    if let Some(level) = lookup("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_relay_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.relay.dedup_window(), Duration::from_secs(2));
        assert_eq!(config.relay.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.cors.allowed_origins.len(), 3);
        assert!(!config.upstream.is_local());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.relay.dedup_window_ms, 2000);
    }

    #[test]
    fn file_sections_are_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 8080

[upstream]
agent_name = "front-desk"
api_key = "secret"

[relay]
dedup_window_ms = 500

[cors]
allowed_origins = ["https://widget.example"]
"#
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.relay.dedup_window_ms, 500);
        assert_eq!(config.relay.sweep_interval_ms, 5000);
        assert_eq!(config.cors.allowed_origins, vec!["https://widget.example"]);
        assert_eq!(
            config.upstream.base_url(),
            "https://api.pipecat.daily.co/v1/public/front-desk"
        );
        assert_eq!(config.upstream.bearer_token(), Some("secret"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(matches!(
            load_config(file.path().to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn local_mode_never_sends_the_key() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            env(&[
                ("PARLEY_LOCAL_UPSTREAM_URL", "http://localhost:7860/"),
                ("PARLEY_UPSTREAM_API_KEY", "secret"),
            ]),
        );
        assert!(config.upstream.is_local());
        assert_eq!(config.upstream.base_url(), "http://localhost:7860");
        assert_eq!(config.upstream.bearer_token(), None);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            env(&[
                ("PORT", "4000"),
                ("PARLEY_HOST", "0.0.0.0"),
                ("PARLEY_CORS_ORIGINS", "https://a.example, https://b.example,"),
                ("PARLEY_DEDUP_WINDOW_MS", "750"),
                ("PARLEY_LOG_JSON", "1"),
            ]),
        );
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.relay.dedup_window_ms, 750);
        assert!(config.logging.json);

        apply_overrides(&mut config, env(&[("PARLEY_PORT", "5000"), ("PORT", "6000")]));
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let upstream = UpstreamConfig {
            api_key: Some("sk-live-123".to_string()),
            ..Default::default()
        };
        let rendered = format!("{upstream:?}");
        assert!(!rendered.contains("sk-live-123"));
        assert!(rendered.contains("<redacted>"));
    }
}
