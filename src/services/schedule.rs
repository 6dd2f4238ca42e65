//! Update scheduling for the Tibber data categories.
//! Each category is re-fetched on its own data-dependent cadence; the
//! policies compute the next eligible run time from what the last fetch
//! observed.
use chrono::{DateTime, Duration, Local, NaiveDate, Timelike};
use std::collections::BTreeMap;
use strum_macros::Display;

/// A data category with its own polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum UpdateCategory {
    #[strum(serialize = "consumption")]
    Consumption,
    #[strum(serialize = "app-prices")]
    AppPrices,
    #[strum(serialize = "chargers")]
    Chargers,
    #[strum(serialize = "offline-evs")]
    OfflineEvs,
    #[strum(serialize = "production")]
    Production,
}

/// Next eligible run time per category, compared against wall-clock now.
#[derive(Debug, Clone)]
pub struct Scheduler {
    next_update: BTreeMap<UpdateCategory, DateTime<Local>>,
}

impl Scheduler {
    /// Creates a scheduler with every category due immediately.
    pub fn new(
        categories: impl IntoIterator<Item = UpdateCategory>,
        now: DateTime<Local>,
    ) -> Self {
        let due_now = now - Duration::minutes(1);
        Scheduler {
            next_update: categories
                .into_iter()
                .map(|category| (category, due_now))
                .collect(),
        }
    }

    /// The categories whose next update time has passed.
    pub fn due(&self, now: DateTime<Local>) -> Vec<UpdateCategory> {
        self.next_update
            .iter()
            .filter(|(_, next)| now >= **next)
            .map(|(category, _)| *category)
            .collect()
    }

    /// Record the policy-computed next run time of a category.
    pub fn set_next(&mut self, category: UpdateCategory, next: DateTime<Local>) {
        self.next_update.insert(category, next);
    }

    pub fn next_update(&self, category: UpdateCategory) -> Option<DateTime<Local>> {
        self.next_update.get(&category).copied()
    }

    /// Re-arm every category to run on the next tick.
    pub fn reset(&mut self, now: DateTime<Local>) {
        let due_now = now - Duration::minutes(1);
        for next in self.next_update.values_mut() {
            *next = due_now;
        }
    }
}

/// What the last consumption fetch observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumptionObservation {
    pub real_time: bool,
    pub prev_hour_available: bool,
    pub yesterday_available: bool,
    pub tomorrow_prices_available: bool,
}

/// Next update for the consumption category.
/// The base cadence follows how metered data appears (hourly for real-time
/// homes, daily otherwise) and is clamped by when tomorrow's spot prices are
/// expected (published around 13:00 local time).
pub fn next_consumption_update(
    now: DateTime<Local>,
    observation: ConsumptionObservation,
) -> DateTime<Local> {
    let base = if observation.real_time {
        if observation.prev_hour_available {
            next_hour_at_minute(now, 2)
        } else {
            now + Duration::minutes(2)
        }
    } else if observation.yesterday_available {
        day_at(now.date_naive() + Duration::days(1), 0, 0)
    } else {
        now + Duration::minutes(15)
    };

    let price_clamp = if observation.tomorrow_prices_available {
        day_at(now.date_naive() + Duration::days(1), 13, 0)
    } else if now.hour() >= 13 {
        now + Duration::minutes(2)
    } else {
        day_at(now.date_naive(), 13, 0)
    };

    base.min(price_clamp)
}

/// Next update for the app price category.
/// Tomorrow's prices are published around 13:00; the jitter spreads the
/// requests so clients do not poll in lockstep.
pub fn next_app_prices_update(
    now: DateTime<Local>,
    tomorrow_available: bool,
    jitter: Duration,
) -> DateTime<Local> {
    if now.hour() < 13 {
        return day_at(now.date_naive(), 13, 0) + jitter;
    }
    if !tomorrow_available {
        return now + jitter;
    }
    day_at(now.date_naive() + Duration::days(1), 13, 0) + jitter
}

/// Next update for the charger category.
pub fn next_chargers_update(now: DateTime<Local>, has_chargers: bool) -> DateTime<Local> {
    if has_chargers {
        now + Duration::minutes(15)
    } else {
        now + Duration::hours(2)
    }
}

/// Next update for the offline EV category.
pub fn next_offline_evs_update(now: DateTime<Local>, has_vehicles: bool) -> DateTime<Local> {
    if has_vehicles {
        now + Duration::minutes(30)
    } else {
        now + Duration::hours(2)
    }
}

/// What the last production fetch observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductionObservation {
    pub real_time: bool,
    pub prev_hour_available: bool,
    pub yesterday_available: bool,
}

/// Next update for the production category.
pub fn next_production_update(
    now: DateTime<Local>,
    observation: ProductionObservation,
) -> DateTime<Local> {
    if observation.real_time {
        if observation.prev_hour_available {
            next_hour_at_minute(now, 2)
        } else {
            now + Duration::minutes(2)
        }
    } else if observation.yesterday_available {
        day_at(now.date_naive() + Duration::days(1), 3, 0)
    } else {
        now + Duration::minutes(15)
    }
}

/// Flat backoff after a failed update.
pub fn next_after_error(now: DateTime<Local>) -> DateTime<Local> {
    now + Duration::minutes(2)
}

/// A local wall-clock time on a given day.
fn day_at(day: NaiveDate, hour: u32, minute: u32) -> DateTime<Local> {
    day.and_hms_opt(hour, minute, 0)
        .expect("invalid time")
        .and_local_timezone(Local)
        .single()
        .expect("ambiguous timezone")
}

/// The start of the next hour, at the given minute.
fn next_hour_at_minute(now: DateTime<Local>, minute: u32) -> DateTime<Local> {
    let next_hour = now + Duration::hours(1);
    next_hour
        .with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("invalid time")
}
