//! Tibber Client.
//! This client is the higher level API client for Tibber. Queries are fixed
//! GraphQL strings; responses are extracted into the schema types.
use super::http_client::{Credentials, HttpClient};
use super::schemas::{
    ChargerConsumptionNode, ChargerData, ConsumptionNode, GridPriceEntry, Home, PriceEntry,
    ProductionNode, Setting, Vehicle,
};
use super::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Local};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub struct Client {
    http: HttpClient,
}

impl Client {
    /// Creates a new instance of `Client`.
    pub fn new(
        api_url: Url,
        app_url: Url,
        token: String,
        credentials: Option<Credentials>,
    ) -> Self {
        let http = HttpClient::new(api_url, app_url, token, credentials);
        Client { http }
    }

    /// Returns `true` if app credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.http.has_credentials()
    }

    /// Login to the app API.
    /// No operation is performed if already logged in.
    pub async fn login(&self) -> Result<()> {
        self.http.login().await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.http.is_logged_in().await
    }

    /// Drop the cached app session so the next app query authenticates again.
    pub async fn logout(&self) {
        self.http.logout().await
    }

    /// Get the homes of the account.
    pub async fn homes(&self) -> Result<Vec<Home>> {
        let query = "{ viewer { homes { id \
            address { address1 } \
            meteringPointData { productionEan } \
            features { realTimeConsumptionEnabled } \
            currentSubscription { priceInfo { current { currency } } } } } }";
        let data = self.http.graphql(query).await?;
        Self::extract_homes(&data)
    }

    /// Get the hourly consumption history of a home, newest hours last.
    pub async fn consumption_history(
        &self,
        home_id: &str,
        hours: u32,
    ) -> Result<Vec<ConsumptionNode>> {
        let query = format!(
            "{{ viewer {{ home(id: \"{home_id}\") {{ \
             consumption(resolution: HOURLY, last: {hours}, before: \"{cursor}\") {{ \
             nodes {{ consumption cost from unitPrice }} }} }} }} }}",
            cursor = before_cursor(),
        );
        let data = self.http.graphql(&query).await?;
        Self::extract_nodes(&data, "consumption")
    }

    /// Get the hourly production history of a home, newest hours last.
    pub async fn production_history(
        &self,
        home_id: &str,
        hours: u32,
    ) -> Result<Vec<ProductionNode>> {
        let query = format!(
            "{{ viewer {{ home(id: \"{home_id}\") {{ \
             production(resolution: HOURLY, last: {hours}, before: \"{cursor}\") {{ \
             nodes {{ from profit }} }} }} }} }}",
            cursor = before_cursor(),
        );
        let data = self.http.graphql(&query).await?;
        Self::extract_nodes(&data, "production")
    }

    /// Get the published spot prices of a home (today, and tomorrow once available).
    pub async fn price_info(&self, home_id: &str) -> Result<Vec<PriceEntry>> {
        let query = format!(
            "{{ viewer {{ home(id: \"{home_id}\") {{ currentSubscription {{ priceInfo {{ \
             today {{ total startsAt }} tomorrow {{ total startsAt }} }} }} }} }} }}"
        );
        let data = self.http.graphql(&query).await?;
        Self::extract_price_entries(&data)
    }

    /// Get the hourly grid price entries of a home from the app API.
    pub async fn grid_prices(&self, home_id: &str) -> Result<Vec<GridPriceEntry>> {
        let query = "{ me { homes { id subscription { priceRating { hourly { \
            entries { time gridPrice total } } } } } } }";
        let data = self.http.app_graphql(query).await?;
        Self::extract_grid_price_entries(&data, home_id)
    }

    /// Get the ids of the EV chargers linked to a home.
    pub async fn chargers(&self, home_id: &str) -> Result<Vec<String>> {
        let query =
            format!("{{ me {{ home(id: \"{home_id}\") {{ bubbles {{ type id }} }} }} }}");
        let data = self.http.app_graphql(&query).await?;
        Self::extract_charger_ids(&data)
    }

    /// Get charger metadata and its daily consumption since `month_start`.
    pub async fn charger_data(
        &self,
        home_id: &str,
        charger_id: &str,
        month_start: DateTime<Local>,
    ) -> Result<ChargerData> {
        let query = format!(
            "{{ me {{ home(id: \"{home_id}\") {{ evCharger( id: \"{charger_id}\" ) {{ \
             name lastSeen settingsScreen {{ settings {{ key value }} }} \
             state {{ cableIsLocked isCharging permanentCableLock }} }} }} }} }}"
        );
        let data = self.http.app_graphql(&query).await?;
        let (name, is_charging, settings) = Self::extract_charger_meta(&data)?;

        let from = month_start.format("%Y-%m-%dT%H:%M:%S%z");
        let query = format!(
            "{{ me {{ home(id: \"{home_id}\") {{ evChargerConsumption( id: \"{charger_id}\" \
             resolution: \"DAILY\" from: \"{from}\" ) {{ from consumption energyCost }} }} }} }}"
        );
        let data = self.http.app_graphql(&query).await?;
        let consumption = Self::extract_charger_consumption(&data)?;

        Ok(ChargerData {
            name,
            is_charging,
            settings,
            consumption,
        })
    }

    /// Get the vehicles of the account that report a battery level.
    pub async fn vehicles(&self) -> Result<Vec<Vehicle>> {
        let query = "{ me { myVehicles { vehicles { title id \
            detailsScreen { settings { key value } } } } } }";
        let data = self.http.app_graphql(query).await?;
        Self::extract_vehicles(&data)
    }

    /// Extract the homes from the viewer response.
    fn extract_homes(data: &Value) -> Result<Vec<Home>> {
        let homes = data
            .pointer("/viewer/homes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::ValueParseError("Missing viewer homes".to_string()))?;
        let mut result = Vec::with_capacity(homes.len());
        for home in homes {
            let id = home
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::ValueParseError("Missing home id".to_string()))?;
            let address = home
                .pointer("/address/address1")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let currency = home
                .pointer("/currentSubscription/priceInfo/current/currency")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let has_real_time_consumption = home
                .pointer("/features/realTimeConsumptionEnabled")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let has_production = home
                .pointer("/meteringPointData/productionEan")
                .and_then(|v| v.as_str())
                .is_some_and(|ean| !ean.is_empty());
            result.push(Home {
                id: id.to_string(),
                address: address.to_string(),
                currency: currency.to_string(),
                has_real_time_consumption,
                has_production,
            });
        }
        Ok(result)
    }

    /// Extract the `nodes` list of a home time series field.
    /// A null field yields an empty list.
    fn extract_nodes<T: DeserializeOwned>(data: &Value, field: &str) -> Result<Vec<T>> {
        let nodes = match data.pointer(&format!("/viewer/home/{field}/nodes")) {
            Some(nodes) if !nodes.is_null() => nodes,
            _ => return Ok(Vec::new()),
        };
        let nodes = serde_json::from_value(nodes.clone())?;
        Ok(nodes)
    }

    /// Extract the spot price entries for today and tomorrow.
    fn extract_price_entries(data: &Value) -> Result<Vec<PriceEntry>> {
        let mut entries: Vec<PriceEntry> = Vec::new();
        for day in ["today", "tomorrow"] {
            let value = data.pointer(&format!(
                "/viewer/home/currentSubscription/priceInfo/{day}"
            ));
            match value {
                Some(value) if !value.is_null() => {
                    let day_entries: Vec<PriceEntry> = serde_json::from_value(value.clone())?;
                    entries.extend(day_entries);
                }
                _ => {}
            }
        }
        Ok(entries)
    }

    /// Extract the hourly grid price entries for a specific home.
    fn extract_grid_price_entries(data: &Value, home_id: &str) -> Result<Vec<GridPriceEntry>> {
        let homes = data
            .pointer("/me/homes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::ValueParseError("Missing me homes".to_string()))?;
        for home in homes {
            if home.get("id").and_then(|v| v.as_str()) != Some(home_id) {
                continue;
            }
            let entries = home
                .pointer("/subscription/priceRating/hourly/entries")
                .ok_or_else(|| {
                    Error::ValueParseError("Missing hourly price entries".to_string())
                })?;
            let entries = serde_json::from_value(entries.clone())?;
            return Ok(entries);
        }
        Err(Error::ValueParseError(format!(
            "Home {home_id} not found in app response"
        )))
    }

    /// Extract the ids of the `ev-charger` bubbles.
    fn extract_charger_ids(data: &Value) -> Result<Vec<String>> {
        let bubbles = data
            .pointer("/me/home/bubbles")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::ValueParseError("Missing home bubbles".to_string()))?;
        let ids = bubbles
            .iter()
            .filter(|bubble| {
                bubble.get("type").and_then(|v| v.as_str()) == Some("ev-charger")
            })
            .filter_map(|bubble| bubble.get("id").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect();
        Ok(ids)
    }

    /// Extract charger name, charging state and settings.
    fn extract_charger_meta(data: &Value) -> Result<(String, bool, Vec<Setting>)> {
        let charger = data
            .pointer("/me/home/evCharger")
            .ok_or_else(|| Error::ValueParseError("Missing evCharger".to_string()))?;
        let name = charger
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ValueParseError("Missing charger name".to_string()))?;
        let is_charging = charger
            .pointer("/state/isCharging")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| Error::ValueParseError("Missing charger state".to_string()))?;
        let settings = charger
            .pointer("/settingsScreen/settings")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();
        Ok((name.to_string(), is_charging, settings))
    }

    /// Extract the daily charger consumption nodes.
    fn extract_charger_consumption(data: &Value) -> Result<Vec<ChargerConsumptionNode>> {
        let nodes = match data.pointer("/me/home/evChargerConsumption") {
            Some(nodes) if !nodes.is_null() => nodes,
            _ => return Ok(Vec::new()),
        };
        let nodes = serde_json::from_value(nodes.clone())?;
        Ok(nodes)
    }

    /// Extract the vehicles reporting both a model name and a battery level.
    fn extract_vehicles(data: &Value) -> Result<Vec<Vehicle>> {
        let vehicles = data
            .pointer("/me/myVehicles/vehicles")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::ValueParseError("Missing vehicles".to_string()))?;
        let mut result = Vec::new();
        for vehicle in vehicles {
            let Some(id) = vehicle.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let settings = vehicle
                .pointer("/detailsScreen/settings")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let mut brand_and_model = None;
            let mut battery_level = None;
            for setting in &settings {
                let (Some(key), Some(value)) = (
                    setting.get("key").and_then(|v| v.as_str()),
                    setting.get("value").and_then(|v| v.as_str()),
                ) else {
                    continue;
                };
                match key {
                    "brandAndModel" => brand_and_model = Some(value.to_string()),
                    "batteryLevel" => battery_level = value.parse::<f64>().ok(),
                    _ => {}
                }
            }
            if let (Some(brand_and_model), Some(battery_level)) =
                (brand_and_model, battery_level)
            {
                result.push(Vehicle {
                    id: id.to_string(),
                    brand_and_model,
                    battery_level,
                });
            }
        }
        Ok(result)
    }
}

/// Pagination cursor for history queries: base64 of the current local time.
fn before_cursor() -> String {
    STANDARD.encode(Local::now().to_rfc3339())
}
