//! Dependency injection container for tibbersync.

use std::sync::Arc;

use super::config::Config;
use crate::integration::tibber::{Credentials, Home};
use crate::integration::{homeassistant, tibber};
use crate::services;

/// Container for application dependencies.
pub struct Container {
    config: Arc<Config>,
    tibber: Arc<tibber::Client>,
    homeassistant: Arc<homeassistant::Client>,
}

impl Container {
    /// Creates a new instance of the dependency injection container.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let credentials = match (&config.tibber_email, &config.tibber_password) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Some(Credentials {
                    email: email.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        };

        let tibber = Arc::new(tibber::Client::new(
            config.tibber_api_url.clone(),
            config.tibber_app_url.clone(),
            config.tibber_token.clone(),
            credentials,
        ));

        let homeassistant = Arc::new(homeassistant::Client::new(
            config.homeassistant_url.clone(),
            config.homeassistant_token.clone(),
        ));

        Self {
            config,
            tibber,
            homeassistant,
        }
    }

    /// Returns a reference to the application config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a reference to the Tibber client.
    pub fn tibber_client(&self) -> Arc<tibber::Client> {
        Arc::clone(&self.tibber)
    }

    /// Returns a reference to the HomeAssistant client.
    pub fn homeassistant_client(&self) -> Arc<homeassistant::Client> {
        Arc::clone(&self.homeassistant)
    }

    /// Creates the bridge service for the discovered homes.
    pub fn bridge_service(&self, homes: Vec<Home>) -> services::TibberBridgeBackgroundService {
        services::TibberBridgeBackgroundService::new(
            Arc::clone(&self.tibber),
            Arc::clone(&self.homeassistant),
            homes,
            self.config.scheduler_tick_interval.into(),
        )
    }

    /// Shutdown the container and clean up resources.
    pub async fn shutdown(&self) {
        self.tibber.logout().await;
    }
}
