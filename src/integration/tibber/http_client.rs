//! Tibber HTTP client.
//! This is the lower level client for the two Tibber endpoints: the public
//! GraphQL API (bearer token) and the app API (credential login with a
//! cached session token).
use failsafe::{
    backoff::{self, Constant},
    failure_policy::{self, ConsecutiveFailures},
    futures::CircuitBreaker,
};
use reqwest::{Client, StatusCode, Url};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use super::{Error, Result};

/// App API credentials. Without them only the public API is available.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub struct HttpClient {
    client: Client,
    api_url: Url,
    app_url: Url,
    token: String,
    credentials: Option<Credentials>,
    session_token: RwLock<Option<String>>,
    api_circuit_breaker: failsafe::StateMachine<ConsecutiveFailures<Constant>, ()>,
    app_circuit_breaker: failsafe::StateMachine<ConsecutiveFailures<Constant>, ()>,
}

impl HttpClient {
    /// Creates a new instance of `HttpClient`.
    pub fn new(api_url: Url, app_url: Url, token: String, credentials: Option<Credentials>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        HttpClient {
            client,
            api_url,
            app_url,
            token,
            credentials,
            session_token: RwLock::new(None),
            api_circuit_breaker: circuit_breaker(),
            app_circuit_breaker: circuit_breaker(),
        }
    }

    /// Query the public GraphQL API and return the `data` value.
    pub async fn graphql(&self, query: &str) -> Result<Value> {
        RetryIf::spawn(
            retry_strategy(),
            || async {
                self.api_circuit_breaker
                    .call_with(is_recorded_error, self.request_graphql(query))
                    .await
                    .map_err(|err| match err {
                        failsafe::Error::Inner(e) => e,
                        failsafe::Error::Rejected => Error::RequestRejected,
                    })
            },
            is_retryable_error,
        )
        .await
    }

    /// Query the app GraphQL API and return the `data` value.
    /// Logs in lazily; an expired session is cleared so the retry
    /// authenticates again.
    pub async fn app_graphql(&self, query: &str) -> Result<Value> {
        RetryIf::spawn(
            retry_strategy(),
            || async {
                self.app_circuit_breaker
                    .call_with(is_recorded_error, self.request_app_graphql(query))
                    .await
                    .map_err(|err| match err {
                        failsafe::Error::Inner(e) => e,
                        failsafe::Error::Rejected => Error::RequestRejected,
                    })
            },
            is_retryable_error,
        )
        .await
    }

    /// Returns `true` if app credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Login to the app API.
    /// No operation is performed if a session token is already cached.
    pub async fn login(&self) -> Result<()> {
        RetryIf::spawn(
            retry_strategy(),
            || async {
                self.app_circuit_breaker
                    .call_with(is_recorded_error, self.refresh_session_token(false))
                    .await
                    .map_err(|err| match err {
                        failsafe::Error::Inner(e) => e,
                        failsafe::Error::Rejected => Error::RequestRejected,
                    })
            },
            is_retryable_error,
        )
        .await?;
        Ok(())
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session_token.read().await.is_some()
    }

    /// Drop the cached app session token.
    pub async fn logout(&self) {
        let mut token_lock = self.session_token.write().await;
        *token_lock = None;
    }

    /// Private methods --------------------------------------------------------

    /// Refresh the session token and return it.
    /// If `force` is true a new login is performed even if a token is cached.
    async fn refresh_session_token(&self, force: bool) -> Result<String> {
        let mut token_write = self.session_token.write().await;
        if !force {
            if let Some(token) = token_write.as_ref() {
                return Ok(token.clone());
            }
        }
        let token = self.request_login().await?;
        *token_write = Some(token.clone());
        Ok(token)
    }

    /// Get the session token if cached, otherwise login.
    async fn get_session_token(&self) -> Result<String> {
        if let Some(token) = self.session_token.read().await.as_ref() {
            return Ok(token.clone());
        }
        self.refresh_session_token(false).await
    }

    /// Clear the session token if it still matches the provided one.
    async fn clear_session_token(&self, token: &str) {
        let mut token_write = self.session_token.write().await;
        if let Some(ref current) = *token_write {
            if current == token {
                *token_write = None;
            }
        }
    }

    /// Internal method to request a login and retrieve the session token.
    async fn request_login(&self) -> Result<String> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(Error::NoCredentials);
        };
        log::debug!("Sending login request");
        let url = self
            .app_url
            .join("/v1/login.credentials")
            .expect("cannot build login URL");
        let body = json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let response = self.client.post(url).json(&body).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::InvalidCredentials);
        }
        let value: Value = response.error_for_status()?.json().await?;
        match value.get("token").and_then(|t| t.as_str()) {
            Some(token) => {
                log::debug!("Login successful");
                Ok(token.to_string())
            }
            None => Err(Error::InvalidCredentials),
        }
    }

    /// Internal method to query the public GraphQL API.
    async fn request_graphql(&self, query: &str) -> Result<Value> {
        log::debug!("Sending GraphQL request: {query}");
        let body = json!({ "query": query, "variables": {} });
        let response = self
            .client
            .post(self.api_url.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: Value = response.json().await?;
        extract_data(value)
    }

    /// Internal method to query the app GraphQL API.
    async fn request_app_graphql(&self, query: &str) -> Result<Value> {
        let token = self.get_session_token().await?;
        log::debug!("Sending app GraphQL request: {query}");
        let url = self.app_url.join("/v4/gql").expect("cannot build gql URL");
        let body = json!({ "query": query, "variables": {} });
        let response = self
            .client
            .post(url)
            .header("cookie", format!("token={token}"))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            log::debug!("Session expired, clearing token");
            self.clear_session_token(&token).await;
            return Err(Error::SessionExpired);
        }
        let value: Value = response.error_for_status()?.json().await?;
        extract_data(value)
    }
}

/// Extract the `data` value from a GraphQL response envelope.
fn extract_data(value: Value) -> Result<Value> {
    if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
        if let Some(error) = errors.first() {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(Error::GraphqlError(message.to_string()));
        }
    }
    match value.get("data") {
        Some(data) if !data.is_null() => Ok(data.clone()),
        _ => Err(Error::GraphqlError("no data in response".to_string())),
    }
}

/// Creates a circuit breaker allowing up to 3 consecutive failures with a retry after 60 seconds.
fn circuit_breaker() -> failsafe::StateMachine<ConsecutiveFailures<Constant>, ()> {
    let backoff = backoff::constant(Duration::from_secs(60));
    let policy = failure_policy::consecutive_failures(3, backoff);
    failsafe::Config::new().failure_policy(policy).build()
}

/// Create a retry strategy with exponential backoff starting at 10 milliseconds, with jitter, and a maximum of 3 retries.
fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(10).map(jitter).take(3)
}

/// Check if the error is a HTTP 4xx client error.
fn is_client_error(error: &reqwest::Error) -> bool {
    error
        .status()
        .map(|status_code| StatusCode::is_client_error(&status_code))
        .unwrap_or(false)
}

// Predicate function for the retry strategy to determine if an error is retryable.
fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::RequestFailed(err) => !is_client_error(err),
        Error::SessionExpired => true, // Retry after the token has been cleared
        Error::InvalidCredentials => false,
        Error::NoCredentials => false,
        Error::GraphqlError(_) => false,
        Error::ResponseJsonError(_) => false,
        Error::ValueParseError(_) => false,
        Error::RequestRejected => false,
    }
}

/// Predicate function for the circuit breaker to record errors that are not client errors.
fn is_recorded_error(error: &Error) -> bool {
    match error {
        Error::RequestFailed(err) => !is_client_error(err),
        _ => false,
    }
}
