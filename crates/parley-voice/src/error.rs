use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Session broker responded with status {status}: {body}")]
    Broker { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session broker returned no room URL or token")]
    MissingCredentials,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,
}
