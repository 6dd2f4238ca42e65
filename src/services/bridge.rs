//! Tibber Bridge Background Service.
//! This service bridges Tibber and Home Assistant: it polls each data
//! category on its own cadence, aggregates the raw series into derived
//! metrics, and publishes them as sensor states.
use chrono::{DateTime, Datelike, Duration, Local};
use rand::Rng;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::integration::homeassistant::{self, StateCreateOrUpdate};
use crate::integration::tibber::{self, Home, Setting};
use crate::services::aggregate::{
    self, MonthRecords, aggregate_consumption, charger_stats, merge_price_entries,
    month_comparison, month_stats, production_stats, year_stats,
};
use crate::services::schedule::{
    ConsumptionObservation, ProductionObservation, Scheduler, UpdateCategory,
    next_after_error, next_app_prices_update, next_chargers_update, next_consumption_update,
    next_offline_evs_update, next_production_update,
};
use crate::services::sensors::{
    Sensor, app_price_sensor, charger_binary_sensors, charger_sensors, home_sensor,
    offline_ev_sensor,
};

/// Hours of hourly consumption history to fetch; covers the year-over-year
/// comparison window.
const CONSUMPTION_HOURS: u32 = 9600;
/// Hours of hourly production history to fetch.
const PRODUCTION_HOURS: u32 = 744;

/// Mutable per-home state: scheduling, the month records for price lookups,
/// and the last published entity states.
pub struct HomeState {
    home: Home,
    scheduler: Scheduler,
    records: MonthRecords,
    published: BTreeMap<String, StateCreateOrUpdate>,
}

impl HomeState {
    /// Creates the state for a home, with every applicable category due.
    pub fn new(home: Home, with_app_categories: bool, now: DateTime<Local>) -> Self {
        let mut categories = vec![UpdateCategory::Consumption];
        if with_app_categories {
            categories.push(UpdateCategory::AppPrices);
            categories.push(UpdateCategory::Chargers);
            categories.push(UpdateCategory::OfflineEvs);
        }
        if home.has_production {
            categories.push(UpdateCategory::Production);
        }
        HomeState {
            home,
            scheduler: Scheduler::new(categories, now),
            records: MonthRecords::default(),
            published: BTreeMap::new(),
        }
    }

    pub fn home(&self) -> &Home {
        &self.home
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The unit for price sensors without an explicit unit.
    fn price_unit(&self) -> String {
        if self.home.currency.is_empty() {
            String::new()
        } else {
            format!("{}/kWh", self.home.currency)
        }
    }
}

pub struct TibberBridgeBackgroundService {
    tibber: Arc<tibber::Client>,
    homeassistant: Arc<homeassistant::Client>,
    homes: Vec<Home>,
    tick_interval: tokio::time::Duration,
}

impl TibberBridgeBackgroundService {
    /// Creates a new instance of `TibberBridgeBackgroundService`.
    pub fn new(
        tibber: Arc<tibber::Client>,
        homeassistant: Arc<homeassistant::Client>,
        homes: Vec<Home>,
        tick_interval: tokio::time::Duration,
    ) -> Self {
        TibberBridgeBackgroundService {
            tibber,
            homeassistant,
            homes,
            tick_interval,
        }
    }

    /// Run the background service until the shutdown token is cancelled.
    /// Each tick runs the updates that have become due.
    pub async fn run(&self, shutdown_token: CancellationToken) {
        let now = Local::now();
        let mut states: Vec<HomeState> = self
            .homes
            .iter()
            .cloned()
            .map(|home| HomeState::new(home, self.tibber.has_credentials(), now))
            .collect();

        let mut interval = interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            for state in states.iter_mut() {
                self.update_home(state).await;
            }
        }
    }

    /// Run the due category updates of one home and reschedule them.
    pub async fn update_home(&self, state: &mut HomeState) {
        let now = Local::now();
        for category in state.scheduler.due(now) {
            log::info!(
                "Updating {category} for home {} (due {:?})",
                state.home.address,
                state.scheduler.next_update(category),
            );
            let next = match self.update_category(state, category, now).await {
                Ok(next) => next,
                Err(e) => {
                    log::error!(
                        "Error updating {category} for home {}: {e}",
                        state.home.address
                    );
                    if is_app_category(category) {
                        self.tibber.logout().await;
                    }
                    next_after_error(now)
                }
            };
            state.scheduler.set_next(category, next);
        }
    }

    async fn update_category(
        &self,
        state: &mut HomeState,
        category: UpdateCategory,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, anyhow::Error> {
        match category {
            UpdateCategory::Consumption => self.update_consumption(state, now).await,
            UpdateCategory::AppPrices => self.update_app_prices(state, now).await,
            UpdateCategory::Chargers => self.update_chargers(state, now).await,
            UpdateCategory::OfflineEvs => self.update_offline_evs(state, now).await,
            UpdateCategory::Production => self.update_production(state, now).await,
        }
    }

    /// Fetch the consumption history and spot prices, rebuild the derived
    /// metrics, and publish them.
    pub async fn update_consumption(
        &self,
        state: &mut HomeState,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, anyhow::Error> {
        let home_id = state.home.id.clone();
        let nodes = self
            .tibber
            .consumption_history(&home_id, CONSUMPTION_HOURS)
            .await?;
        let mut aggregate = aggregate_consumption(&nodes, now);
        let prices = self.tibber.price_info(&home_id).await?;
        let tomorrow_prices_available =
            merge_price_entries(&mut aggregate.records, &prices, now);

        let stats = month_stats(&aggregate.records, now);
        let year = year_stats(&nodes, now);
        let comparison = month_comparison(&nodes, now);

        let peak_attributes = peak_attributes(&aggregate.peaks);
        self.publish_sensor(
            state,
            &home_sensor("peak_consumption"),
            aggregate.peaks.average(),
            peak_attributes,
        )
        .await?;
        self.publish_sensor(
            state,
            &home_sensor("monthly_avg_price"),
            stats.monthly_avg_price,
            Map::new(),
        )
        .await?;
        self.publish_sensor(
            state,
            &home_sensor("customer_avg_price"),
            stats.customer_avg_price,
            Map::new(),
        )
        .await?;
        self.publish_sensor(
            state,
            &home_sensor("daily_cost_with_subsidy"),
            Some(stats.daily_cost_with_subsidy),
            Map::new(),
        )
        .await?;
        self.publish_sensor(
            state,
            &home_sensor("monthly_cost_with_subsidy"),
            Some(stats.monthly_cost_with_subsidy),
            Map::new(),
        )
        .await?;
        self.publish_sensor(state, &home_sensor("yearly_cost"), Some(year.yearly_cost), Map::new())
            .await?;
        self.publish_sensor(state, &home_sensor("yearly_cons"), Some(year.yearly_cons), Map::new())
            .await?;
        self.publish_sensor(
            state,
            &home_sensor("month_cons"),
            Some(comparison.month_cons),
            Map::new(),
        )
        .await?;
        self.publish_sensor(
            state,
            &home_sensor("compare_cons"),
            Some(comparison.compare_cons),
            Map::new(),
        )
        .await?;

        let price_now = aggregate.records.price_at(now);
        let est_subsidy = price_now.map(aggregate::subsidy);
        self.publish_sensor(state, &home_sensor("est_subsidy"), est_subsidy, Map::new())
            .await?;
        let price_with_subsidy = price_now.map(|price| price - aggregate::subsidy(price));
        self.publish_sensor(
            state,
            &home_sensor("est_current_price_with_subsidy"),
            price_with_subsidy,
            Map::new(),
        )
        .await?;

        state.records = aggregate.records;

        Ok(next_consumption_update(
            now,
            ConsumptionObservation {
                real_time: state.home.has_real_time_consumption,
                prev_hour_available: aggregate.prev_hour_available,
                yesterday_available: aggregate.yesterday_available,
                tomorrow_prices_available,
            },
        ))
    }

    /// Fetch the app API price entries and publish the price sensors for
    /// the current hour.
    pub async fn update_app_prices(
        &self,
        state: &mut HomeState,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, anyhow::Error> {
        let entries = self.tibber.grid_prices(&state.home.id).await?;
        let tomorrow = now.date_naive() + Duration::days(1);
        let tomorrow_available = entries
            .iter()
            .any(|entry| entry.time.with_timezone(&Local).date_naive() == tomorrow);

        let this_hour = aggregate::truncate_to_hour(now);
        let current = entries
            .iter()
            .find(|entry| entry.time.with_timezone(&Local) == this_hour);
        let grid_price = current.and_then(|entry| entry.grid_price);
        let energy_price = current.and_then(|entry| entry.total);
        let total_price = match (grid_price, energy_price) {
            (Some(grid), Some(energy)) => Some(grid + energy),
            _ => None,
        };
        let est_subsidy = state.records.price_at(now).map(aggregate::subsidy);
        let total_price_with_subsidy = match (total_price, est_subsidy) {
            (Some(total), Some(subsidy)) => Some(total - subsidy),
            _ => None,
        };

        self.publish_sensor(state, &app_price_sensor("grid_price"), grid_price, Map::new())
            .await?;
        self.publish_sensor(
            state,
            &app_price_sensor("energy_price"),
            energy_price,
            Map::new(),
        )
        .await?;
        self.publish_sensor(
            state,
            &app_price_sensor("total_price"),
            total_price,
            Map::new(),
        )
        .await?;
        self.publish_sensor(
            state,
            &app_price_sensor("total_price_with_subsidy"),
            total_price_with_subsidy,
            Map::new(),
        )
        .await?;

        Ok(next_app_prices_update(now, tomorrow_available, price_jitter()))
    }

    /// Fetch the chargers of the home and publish their usage and settings.
    pub async fn update_chargers(
        &self,
        state: &mut HomeState,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, anyhow::Error> {
        let home_id = state.home.id.clone();
        let chargers = self.tibber.chargers(&home_id).await?;
        if chargers.is_empty() {
            return Ok(next_chargers_update(now, false));
        }

        for charger_id in &chargers {
            let data = self
                .tibber
                .charger_data(&home_id, charger_id, month_start(now))
                .await?;
            let stats = charger_stats(&data.consumption, now);

            let sensors = charger_sensors(charger_id, &data.name);
            let values = [
                Some(stats.cost_day),
                Some(stats.cost_month),
                Some(stats.consumption_day),
                Some(stats.consumption_month),
                setting_value(&data.settings, "maxCircuitPower"),
                setting_value(&data.settings, "maxCurrentCharger"),
            ];
            for (sensor, value) in sensors.iter().zip(values) {
                self.publish_sensor(state, sensor, value, Map::new()).await?;
            }

            let binary_sensors = charger_binary_sensors(charger_id, &data.name);
            self.publish_binary_sensor(state, &binary_sensors[0], data.is_charging, Map::new())
                .await?;
            let sc_enabled = setting(&data.settings, "schedule.isEnabled")
                .is_some_and(|value| value.eq_ignore_ascii_case("on"));
            self.publish_binary_sensor(
                state,
                &binary_sensors[1],
                sc_enabled,
                departure_time_attributes(&data.settings),
            )
            .await?;
        }

        Ok(next_chargers_update(now, true))
    }

    /// Fetch the offline EVs of the account and publish their state of charge.
    pub async fn update_offline_evs(
        &self,
        state: &mut HomeState,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, anyhow::Error> {
        let vehicles = self.tibber.vehicles().await?;
        for vehicle in &vehicles {
            self.publish_sensor(
                state,
                &offline_ev_sensor(&vehicle.brand_and_model),
                Some(vehicle.battery_level),
                Map::new(),
            )
            .await?;
        }
        Ok(next_offline_evs_update(now, !vehicles.is_empty()))
    }

    /// Fetch the production history and publish the profit sensors.
    pub async fn update_production(
        &self,
        state: &mut HomeState,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, anyhow::Error> {
        let nodes = self
            .tibber
            .production_history(&state.home.id, PRODUCTION_HOURS)
            .await?;
        let stats = production_stats(&nodes, now);

        self.publish_sensor(
            state,
            &home_sensor("production_profit_day"),
            Some(stats.profit_day),
            Map::new(),
        )
        .await?;
        self.publish_sensor(
            state,
            &home_sensor("production_profit_month"),
            Some(stats.profit_month),
            Map::new(),
        )
        .await?;

        Ok(next_production_update(
            now,
            ProductionObservation {
                real_time: state.home.has_real_time_consumption,
                prev_hour_available: stats.prev_hour_available,
                yesterday_available: stats.yesterday_available,
            },
        ))
    }

    /// Publish a numeric sensor state if it changed since the last publish.
    async fn publish_sensor(
        &self,
        state: &mut HomeState,
        sensor: &Sensor,
        value: Option<f64>,
        extra_attributes: Map<String, Value>,
    ) -> Result<(), homeassistant::Error> {
        let mut attributes = sensor.attributes(&state.home.address, &state.price_unit());
        attributes.extend(extra_attributes);
        let entity_state = match value {
            Some(value) => homeassistant::Client::numeric_state(value, attributes),
            None => homeassistant::Client::unknown_state(attributes),
        };
        self.publish_if_changed(state, sensor, entity_state).await
    }

    /// Publish a binary sensor state if it changed since the last publish.
    async fn publish_binary_sensor(
        &self,
        state: &mut HomeState,
        sensor: &Sensor,
        is_on: bool,
        extra_attributes: Map<String, Value>,
    ) -> Result<(), homeassistant::Error> {
        let mut attributes = sensor.attributes(&state.home.address, &state.price_unit());
        attributes.extend(extra_attributes);
        let entity_state = homeassistant::Client::binary_state(is_on, attributes);
        self.publish_if_changed(state, sensor, entity_state).await
    }

    async fn publish_if_changed(
        &self,
        state: &mut HomeState,
        sensor: &Sensor,
        entity_state: StateCreateOrUpdate,
    ) -> Result<(), homeassistant::Error> {
        let entity_id = sensor.entity_id(&state.home.address);
        if state.published.get(&entity_id) == Some(&entity_state) {
            return Ok(());
        }
        self.homeassistant.publish(&entity_id, &entity_state).await?;
        log::debug!("Published {entity_id}: {}", entity_state.state);
        state.published.insert(entity_id, entity_state);
        Ok(())
    }
}

/// The peak dates and values exposed on the peak consumption sensor.
fn peak_attributes(peaks: &aggregate::PeakTracker) -> Map<String, Value> {
    if peaks.records().is_empty() {
        return Map::new();
    }
    let dates: Vec<String> = peaks
        .records()
        .iter()
        .map(|peak| peak.timestamp.to_rfc3339())
        .collect();
    let values: Vec<Option<f64>> = peaks
        .records()
        .iter()
        .map(|peak| peak.consumption)
        .collect();
    let mut attributes = Map::new();
    attributes.insert("peak_consumption_dates".to_string(), json!(dates));
    attributes.insert("peak_consumptions".to_string(), json!(values));
    attributes
}

/// Departure times from the charger settings, one attribute per weekday.
fn departure_time_attributes(settings: &[Setting]) -> Map<String, Value> {
    let mut attributes = Map::new();
    for day in [
        "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    ] {
        if let Some(value) = setting(settings, &format!("departureTimes.{day}")) {
            attributes.insert(format!("{day}_departure_time"), json!(value));
        }
    }
    attributes
}

fn setting<'a>(settings: &'a [Setting], key: &str) -> Option<&'a str> {
    settings
        .iter()
        .find(|setting| setting.key == key)
        .map(|setting| setting.value.as_str())
}

fn setting_value(settings: &[Setting], key: &str) -> Option<f64> {
    setting(settings, key).and_then(|value| value.parse().ok())
}

fn is_app_category(category: UpdateCategory) -> bool {
    matches!(
        category,
        UpdateCategory::AppPrices | UpdateCategory::Chargers | UpdateCategory::OfflineEvs
    )
}

/// The first of the current month at local midnight.
pub fn month_start(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .with_day(1)
        .expect("invalid date")
        .and_hms_opt(0, 0, 0)
        .expect("invalid time")
        .and_local_timezone(Local)
        .single()
        .expect("ambiguous timezone")
}

/// Random spread applied to the price polling schedule.
fn price_jitter() -> Duration {
    Duration::seconds(rand::thread_rng().gen_range(0..180))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_month_start() {
        let now = Local.with_ymd_and_hms(2024, 6, 17, 14, 30, 5).unwrap();
        let start = month_start(now);

        assert_eq!(start.year(), 2024);
        assert_eq!(start.month(), 6);
        assert_eq!(start.day(), 1);
        assert_eq!(start.hour(), 0);
        assert_eq!(start.minute(), 0);
    }

    #[test]
    fn test_price_jitter_in_range() {
        for _ in 0..100 {
            let jitter = price_jitter();
            assert!(jitter >= Duration::zero());
            assert!(jitter < Duration::seconds(180));
        }
    }

    #[test]
    fn test_setting_lookup() {
        let settings = vec![
            Setting {
                key: "schedule.isEnabled".to_string(),
                value: "On".to_string(),
            },
            Setting {
                key: "maxCircuitPower".to_string(),
                value: "16".to_string(),
            },
        ];

        assert_eq!(setting(&settings, "schedule.isEnabled"), Some("On"));
        assert_eq!(setting_value(&settings, "maxCircuitPower"), Some(16.0));
        assert_eq!(setting(&settings, "missing"), None);
        assert_eq!(setting_value(&settings, "schedule.isEnabled"), None);
    }

    #[test]
    fn test_departure_time_attributes() {
        let settings = vec![
            Setting {
                key: "departureTimes.monday".to_string(),
                value: "07:30".to_string(),
            },
            Setting {
                key: "departureTimes.sunday".to_string(),
                value: "10:00".to_string(),
            },
        ];

        let attributes = departure_time_attributes(&settings);

        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes.get("monday_departure_time").unwrap(), "07:30");
        assert_eq!(attributes.get("sunday_departure_time").unwrap(), "10:00");
    }

    #[test]
    fn test_peak_attributes_empty() {
        let tracker = aggregate::PeakTracker::default();
        assert!(peak_attributes(&tracker).is_empty());
    }
}
