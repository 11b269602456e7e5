use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing key '{0}' is missing or empty")]
    MissingKey(String),
}

#[derive(Debug, Error)]
pub enum AckError {
    #[error("signature does not match")]
    BadSignature,
    #[error("link expired")]
    Expired,
    #[error("link version {presented} is a replay of a version older than {minimum_accepted}")]
    Replay { presented: i64, minimum_accepted: i64 },
}

#[derive(Debug, Error)]
pub enum SorClientError {
    #[error("HTTP request to system of record failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("system of record returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("list item {0} not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request to chat API failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("root message lost (404/410)")]
    RootLost,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read workflow template: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse workflow template: {0}")]
    Parse(#[from] serde_json::Error),
}
