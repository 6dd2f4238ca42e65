//! Home Assistant Client.
//! This client is the higher level API client for Home Assistant.

use super::Result;
use super::http_client::HttpClient;
use super::schemas::StateCreateOrUpdate;
use reqwest::Url;
use serde_json::{Map, Value};

pub struct Client {
    http: HttpClient,
}

impl Client {
    /// Creates a new instance of `Client`.
    pub fn new(url: Url, token: String) -> Self {
        let http = HttpClient::new(url, token);
        Client { http }
    }

    /// Publish an entity state to Home Assistant.
    pub async fn publish(&self, entity_id: &str, state: &StateCreateOrUpdate) -> Result<()> {
        self.http.set_state(entity_id, state).await
    }

    /// Build a numeric sensor state, rounded to two decimals.
    pub fn numeric_state(value: f64, attributes: Map<String, Value>) -> StateCreateOrUpdate {
        StateCreateOrUpdate {
            state: format!("{value:.2}"),
            attributes: Some(attributes),
        }
    }

    /// Build a sensor state for a metric without a value.
    pub fn unknown_state(attributes: Map<String, Value>) -> StateCreateOrUpdate {
        StateCreateOrUpdate {
            state: "unknown".to_string(),
            attributes: Some(attributes),
        }
    }

    /// Build a binary sensor state.
    pub fn binary_state(is_on: bool, attributes: Map<String, Value>) -> StateCreateOrUpdate {
        StateCreateOrUpdate {
            state: if is_on { "on" } else { "off" }.to_string(),
            attributes: Some(attributes),
        }
    }
}
