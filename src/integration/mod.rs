//! Integration modules for external APIs.
pub mod homeassistant;
pub mod tibber;
