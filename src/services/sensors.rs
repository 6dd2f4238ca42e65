//! Sensor catalog for the derived Tibber metrics.
//! Each sensor carries the Home Assistant presentation metadata (friendly
//! name, unit, device class, state class) and knows its entity id.
use regex::Regex;
use serde_json::{Map, Value, json};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum DeviceClass {
    #[strum(serialize = "energy")]
    Energy,
    #[strum(serialize = "monetary")]
    Monetary,
    #[strum(serialize = "current")]
    Current,
    #[strum(serialize = "battery")]
    Battery,
}

#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum StateClass {
    #[strum(serialize = "measurement")]
    Measurement,
    #[strum(serialize = "total")]
    Total,
}

/// A sensor exposed to Home Assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub key: String,
    pub name: String,
    pub binary: bool,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    /// Explicit unit; sensors without one fall back to the home price unit.
    pub unit: Option<String>,
}

impl Sensor {
    fn new(
        key: &str,
        name: &str,
        device_class: Option<DeviceClass>,
        state_class: Option<StateClass>,
        unit: Option<&str>,
    ) -> Self {
        Sensor {
            key: key.to_string(),
            name: name.to_string(),
            binary: false,
            device_class,
            state_class,
            unit: unit.map(str::to_string),
        }
    }

    fn binary(key: &str, name: &str) -> Self {
        Sensor {
            key: key.to_string(),
            name: name.to_string(),
            binary: true,
            device_class: None,
            state_class: None,
            unit: None,
        }
    }

    /// The Home Assistant entity id of this sensor for a home.
    pub fn entity_id(&self, address: &str) -> String {
        let domain = if self.binary { "binary_sensor" } else { "sensor" };
        format!("{domain}.tibber_data_{}_{}", slugify(address), slugify(&self.key))
    }

    /// The presentation attributes of this sensor for a home.
    pub fn attributes(&self, address: &str, price_unit: &str) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert(
            "friendly_name".to_string(),
            json!(format!("{} {}", self.name, address)),
        );
        if !self.binary {
            let unit = self.unit.as_deref().unwrap_or(price_unit);
            if !unit.is_empty() {
                attributes.insert("unit_of_measurement".to_string(), json!(unit));
            }
        }
        if let Some(device_class) = self.device_class {
            attributes.insert("device_class".to_string(), json!(device_class.to_string()));
        }
        if let Some(state_class) = self.state_class {
            attributes.insert("state_class".to_string(), json!(state_class.to_string()));
        }
        attributes
    }
}

/// The per-home sensors derived from the public API data.
pub fn home_sensors() -> Vec<Sensor> {
    vec![
        Sensor::new(
            "peak_consumption",
            "Average of 3 highest hourly consumption",
            Some(DeviceClass::Energy),
            Some(StateClass::Measurement),
            Some("kWh"),
        ),
        Sensor::new(
            "monthly_avg_price",
            "Monthly avg price",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "customer_avg_price",
            "Monthly avg customer price",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "est_subsidy",
            "Estimated subsidy",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "est_current_price_with_subsidy",
            "Estimated price with subsidy",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "daily_cost_with_subsidy",
            "Daily cost with subsidy",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "monthly_cost_with_subsidy",
            "Monthly cost with subsidy",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "yearly_cost",
            "Yearly cost",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "yearly_cons",
            "Yearly consumption",
            Some(DeviceClass::Energy),
            Some(StateClass::Total),
            Some("kWh"),
        ),
        Sensor::new(
            "month_cons",
            "Monthly consumption",
            Some(DeviceClass::Energy),
            Some(StateClass::Total),
            Some("kWh"),
        ),
        Sensor::new(
            "compare_cons",
            "Monthly consumption compared to last year",
            Some(DeviceClass::Energy),
            Some(StateClass::Total),
            Some("kWh"),
        ),
        Sensor::new(
            "production_profit_day",
            "Daily production profit",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
        Sensor::new(
            "production_profit_month",
            "Monthly production profit",
            Some(DeviceClass::Monetary),
            Some(StateClass::Total),
            None,
        ),
    ]
}

/// The per-home sensors derived from the app API price entries.
pub fn app_price_sensors() -> Vec<Sensor> {
    vec![
        Sensor::new("grid_price", "Grid price", None, Some(StateClass::Total), None),
        Sensor::new("energy_price", "Energy price", None, Some(StateClass::Total), None),
        Sensor::new("total_price", "Total price", None, Some(StateClass::Total), None),
        Sensor::new(
            "total_price_with_subsidy",
            "Estimated total price with subsidy and grid price",
            None,
            Some(StateClass::Total),
            None,
        ),
    ]
}

/// The sensors of one EV charger.
pub fn charger_sensors(charger_id: &str, charger_name: &str) -> Vec<Sensor> {
    vec![
        Sensor::new(
            &format!("charger_{charger_id}_cost_day"),
            &format!("{charger_name} cost day"),
            Some(DeviceClass::Monetary),
            Some(StateClass::Measurement),
            None,
        ),
        Sensor::new(
            &format!("charger_{charger_id}_cost_month"),
            &format!("{charger_name} cost month"),
            Some(DeviceClass::Monetary),
            Some(StateClass::Measurement),
            None,
        ),
        Sensor::new(
            &format!("charger_{charger_id}_consumption_day"),
            &format!("{charger_name} consumption day"),
            Some(DeviceClass::Energy),
            None,
            Some("kWh"),
        ),
        Sensor::new(
            &format!("charger_{charger_id}_consumption_month"),
            &format!("{charger_name} consumption month"),
            Some(DeviceClass::Energy),
            None,
            Some("kWh"),
        ),
        Sensor::new(
            &format!("charger_{charger_id}_max_circuit_power"),
            &format!("{charger_name} max circuit power"),
            Some(DeviceClass::Current),
            None,
            Some("A"),
        ),
        Sensor::new(
            &format!("charger_{charger_id}_max_current_charger"),
            &format!("{charger_name} max current charger"),
            Some(DeviceClass::Current),
            None,
            Some("A"),
        ),
    ]
}

/// The binary sensors of one EV charger.
pub fn charger_binary_sensors(charger_id: &str, charger_name: &str) -> Vec<Sensor> {
    vec![
        Sensor::binary(
            &format!("charger_{charger_id}_is_charging"),
            &format!("Is charging {charger_name}"),
        ),
        Sensor::binary(
            &format!("charger_{charger_id}_sc_enabled"),
            &format!("Smart charging enabled {charger_name}"),
        ),
    ]
}

/// A home sensor by key.
/// Panics on a key absent from the catalog; keys are static.
pub fn home_sensor(key: &str) -> Sensor {
    home_sensors()
        .into_iter()
        .find(|sensor| sensor.key == key)
        .expect("unknown home sensor key")
}

/// An app price sensor by key.
/// Panics on a key absent from the catalog; keys are static.
pub fn app_price_sensor(key: &str) -> Sensor {
    app_price_sensors()
        .into_iter()
        .find(|sensor| sensor.key == key)
        .expect("unknown app price sensor key")
}

/// The state of charge sensor of an offline EV.
pub fn offline_ev_sensor(brand_and_model: &str) -> Sensor {
    Sensor::new(
        &format!("offline_ev_{brand_and_model}_soc"),
        &format!("{brand_and_model} soc"),
        Some(DeviceClass::Battery),
        Some(StateClass::Measurement),
        Some("%"),
    )
}

/// Lowercase alphanumeric slug with underscore separators.
fn slugify(text: &str) -> String {
    let separators = Regex::new(r"[^a-z0-9]+").expect("invalid slug regex");
    separators
        .replace_all(&text.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}
