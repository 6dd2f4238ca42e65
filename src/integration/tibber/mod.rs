//! Tibber Integration Module
//! The integration is done via the public GraphQL API (bearer token) and the
//! app API (credential login) over HTTPS.
mod client;
mod error;
mod http_client;
mod schemas;

pub use client::Client;
pub use error::{Error, Result};
pub use http_client::Credentials;
pub use schemas::{
    ChargerConsumptionNode, ChargerData, ConsumptionNode, GridPriceEntry, Home, PriceEntry,
    ProductionNode, Setting, Vehicle,
};
