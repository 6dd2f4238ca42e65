//! Home Assistant HTTP client.
//! This is the lower level client for the Home Assistant REST API.
use failsafe::{
    backoff::{self, Constant},
    failure_policy::{self, ConsecutiveFailures},
    futures::CircuitBreaker,
};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use super::schemas::StateCreateOrUpdate;
use super::{Error, Result};

pub struct HttpClient {
    client: Client,
    token: String,
    base_url: Url,
    circuit_breaker: failsafe::StateMachine<ConsecutiveFailures<Constant>, ()>,
}

impl HttpClient {
    /// Creates a new instance of `HttpClient`.
    pub fn new(url: Url, token: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        HttpClient {
            client,
            token,
            base_url: url,
            circuit_breaker: circuit_breaker(),
        }
    }

    /// Creates or updates an entity state in Home Assistant.
    pub async fn set_state(&self, entity_id: &str, state: &StateCreateOrUpdate) -> Result<()> {
        let body = serde_json::to_string(state)?;
        RetryIf::spawn(
            retry_strategy(),
            || async {
                self.circuit_breaker
                    .call_with(is_recorded_error, self.request_post_state(entity_id, &body))
                    .await
                    .map_err(|err| match err {
                        failsafe::Error::Rejected => Error::RequestRejected,
                        failsafe::Error::Inner(e) => e,
                    })
            },
            is_retryable_error,
        )
        .await?;
        Ok(())
    }

    /// Internal method to post a state to Home Assistant.
    async fn request_post_state(&self, entity_id: &str, body: &str) -> Result<()> {
        log::debug!("Sending post state request for entity '{entity_id}': {body}");
        let url = self
            .base_url
            .join(&format!("api/states/{entity_id}"))
            .expect("cannot build state URL");
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Creates a circuit breaker allowing up to 5 consecutive failures with a retry after 60 seconds.
fn circuit_breaker() -> failsafe::StateMachine<ConsecutiveFailures<Constant>, ()> {
    let backoff = backoff::constant(Duration::from_secs(60));
    let policy = failure_policy::consecutive_failures(5, backoff);
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
        Error::RequestRejected => false,
        Error::JsonSerializationFailed(_) => false,
    }
}

/// Predicate function for the circuit breaker to record errors that are not client errors.
fn is_recorded_error(error: &Error) -> bool {
    match error {
        Error::RequestFailed(err) => !is_client_error(err),
        Error::RequestRejected => false,
        Error::JsonSerializationFailed(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_reqwest_error_with_status(status: StatusCode) -> reqwest::Error {
        let response = http::Response::builder()
            .status(status)
            .body(Vec::new())
            .unwrap();
        reqwest::Response::from(response)
            .error_for_status()
            .unwrap_err()
    }

    fn create_json_serialization_error() -> Error {
        Error::JsonSerializationFailed(serde_json::Error::io(std::io::Error::other("fail")))
    }

    #[test]
    fn test_is_client_error() {
        let err_400 = create_reqwest_error_with_status(StatusCode::BAD_REQUEST);
        let err_500 = create_reqwest_error_with_status(StatusCode::INTERNAL_SERVER_ERROR);

        assert!(is_client_error(&err_400), "400 should be a client error");
        assert!(
            !is_client_error(&err_500),
            "500 should not be a client error"
        );
    }

    #[test]
    fn test_is_retryable_error() {
        let err_400 =
            Error::RequestFailed(create_reqwest_error_with_status(StatusCode::BAD_REQUEST));
        let err_500 = Error::RequestFailed(create_reqwest_error_with_status(
            StatusCode::INTERNAL_SERVER_ERROR,
        ));

        assert!(!is_retryable_error(&err_400), "4xx should not be retried");
        assert!(is_retryable_error(&err_500), "5xx should be retried");
        assert!(!is_retryable_error(&Error::RequestRejected));
        assert!(!is_retryable_error(&create_json_serialization_error()));
    }

    #[test]
    fn test_is_recorded_error() {
        let err_400 =
            Error::RequestFailed(create_reqwest_error_with_status(StatusCode::BAD_REQUEST));
        let err_500 = Error::RequestFailed(create_reqwest_error_with_status(
            StatusCode::INTERNAL_SERVER_ERROR,
        ));

        assert!(!is_recorded_error(&err_400), "4xx should not be recorded");
        assert!(is_recorded_error(&err_500), "5xx should be recorded");
        assert!(!is_recorded_error(&Error::RequestRejected));
        assert!(!is_recorded_error(&create_json_serialization_error()));
    }
}
