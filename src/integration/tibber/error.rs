//! Error handling for the Tibber API client.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Authentication failed: invalid credentials")]
    InvalidCredentials,
    #[error("Authentication failed: no app credentials configured")]
    NoCredentials,
    #[error("Authorization failed: session expired")]
    SessionExpired,

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Request rejected: circuit breaker open")]
    RequestRejected,

    #[error("GraphQL error: {0}")]
    GraphqlError(String),
    #[error("Response JSON error: {0}")]
    ResponseJsonError(#[from] serde_json::Error),
    #[error("Value parse error: {0}")]
    ValueParseError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
