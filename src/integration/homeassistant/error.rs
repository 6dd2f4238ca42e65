//! Error handling for the Home Assistant API client.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Request rejected: circuit breaker open")]
    RequestRejected,
    #[error("JSON serialization failed: {0}")]
    JsonSerializationFailed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
