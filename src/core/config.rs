//! Application configuration loaded from environment variables.
use std::env;

use envconfig::Envconfig;
use humantime::Duration;
use reqwest::Url;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Envconfig)]
pub struct Config {
    #[allow(dead_code)]
    #[envconfig(from = "APP_LOG", default = "error")]
    pub app_log: String,
    #[allow(dead_code)]
    #[envconfig(from = "APP_LOG_STYLE", default = "always")]
    pub app_log_style: String,
    #[envconfig(from = "TIBBER_API_URL", default = "https://api.tibber.com/v1-beta/gql")]
    pub tibber_api_url: Url,
    #[envconfig(from = "TIBBER_APP_URL", default = "https://app.tibber.com")]
    pub tibber_app_url: Url,
    #[envconfig(from = "TIBBER_TOKEN")]
    pub tibber_token: String,
    #[envconfig(from = "TIBBER_EMAIL")]
    pub tibber_email: Option<String>,
    #[envconfig(from = "TIBBER_PASSWORD")]
    pub tibber_password: Option<String>,
    #[envconfig(from = "HOMEASSISTANT_URL")]
    pub homeassistant_url: Url,
    #[envconfig(from = "HOMEASSISTANT_TOKEN")]
    pub homeassistant_token: String,
    #[envconfig(from = "SCHEDULER_TICK_INTERVAL", default = "15s")]
    pub scheduler_tick_interval: Duration,
}

pub fn configure_logger() {
    let env = env_logger::Env::default()
        .filter_or("APP_LOG", "info")
        .write_style_or("APP_LOG_STYLE", "always");
    env_logger::init_from_env(env);
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::{with_var, with_vars};

    #[test]
    fn test_config_from_env() {
        with_vars(
            [
                ("APP_LOG", Some("debug")),
                ("APP_LOG_STYLE", Some("auto")),
                ("TIBBER_TOKEN", Some("test_api_token")),
                ("TIBBER_EMAIL", Some("user@example.com")),
                ("TIBBER_PASSWORD", Some("test_password")),
                ("HOMEASSISTANT_URL", Some("http://localhost:8001")),
                ("HOMEASSISTANT_TOKEN", Some("test_token")),
                ("SCHEDULER_TICK_INTERVAL", Some("30s")),
            ],
            || {
                let config = Config::init_from_env().unwrap();
                assert_eq!(config.app_log, "debug");
                assert_eq!(config.app_log_style, "auto");
                assert_eq!(
                    config.tibber_api_url,
                    Url::parse("https://api.tibber.com/v1-beta/gql").unwrap()
                );
                assert_eq!(
                    config.tibber_app_url,
                    Url::parse("https://app.tibber.com").unwrap()
                );
                assert_eq!(config.tibber_token, "test_api_token");
                assert_eq!(config.tibber_email.as_deref(), Some("user@example.com"));
                assert_eq!(config.tibber_password.as_deref(), Some("test_password"));
                assert_eq!(
                    config.homeassistant_url,
                    Url::parse("http://localhost:8001").unwrap()
                );
                assert_eq!(config.homeassistant_token, "test_token");
                assert_eq!(
                    config.scheduler_tick_interval,
                    std::time::Duration::from_secs(30).into()
                );
            },
        );
    }

    #[test]
    fn test_config_without_credentials() {
        with_vars(
            [
                ("TIBBER_TOKEN", Some("test_api_token")),
                ("TIBBER_EMAIL", None::<&str>),
                ("TIBBER_PASSWORD", None),
                ("HOMEASSISTANT_URL", Some("http://localhost:8001")),
                ("HOMEASSISTANT_TOKEN", Some("test_token")),
            ],
            || {
                let config = Config::init_from_env().unwrap();
                assert_eq!(config.tibber_email, None);
                assert_eq!(config.tibber_password, None);
                assert_eq!(
                    config.scheduler_tick_interval,
                    std::time::Duration::from_secs(15).into()
                );
            },
        );
    }

    #[test]
    fn test_configure_logger() {
        with_var("APP_LOG", Some("debug"), || {
            configure_logger();
            let log_level = log::max_level();
            assert_eq!(log_level, log::LevelFilter::Debug);
        });
    }
}
