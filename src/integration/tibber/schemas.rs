//! Tibber API schemas.
//! Typed views over the GraphQL responses of the public and the app API.
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

/// A metering point tracked by the account.
#[derive(Debug, Clone, PartialEq)]
pub struct Home {
    pub id: String,
    pub address: String,
    pub currency: String,
    pub has_real_time_consumption: bool,
    pub has_production: bool,
}

/// One hour of metered consumption with price and cost.
/// All value fields are absent until the utility has settled the hour.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionNode {
    pub from: DateTime<FixedOffset>,
    pub consumption: Option<f64>,
    pub cost: Option<f64>,
    pub unit_price: Option<f64>,
}

/// One hour of production profit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionNode {
    pub from: DateTime<FixedOffset>,
    pub profit: Option<f64>,
}

/// Spot price for one hour, published ahead of consumption.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEntry {
    pub starts_at: DateTime<FixedOffset>,
    pub total: f64,
}

/// Hourly price entry from the app API, including the grid rental price.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPriceEntry {
    pub time: DateTime<FixedOffset>,
    pub grid_price: Option<f64>,
    pub total: Option<f64>,
}

/// One day of EV charger consumption, daily resolution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerConsumptionNode {
    pub from: DateTime<FixedOffset>,
    pub consumption: Option<f64>,
    pub energy_cost: Option<f64>,
}

/// A key/value setting as exposed by the app API settings screens.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// EV charger metadata and month-to-date consumption.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargerData {
    pub name: String,
    pub is_charging: bool,
    pub settings: Vec<Setting>,
    pub consumption: Vec<ChargerConsumptionNode>,
}

/// A vehicle registered in the app without its own charger integration.
/// Only vehicles reporting both a model name and a battery level are exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: String,
    pub brand_and_model: String,
    pub battery_level: f64,
}
