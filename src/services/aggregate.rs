//! Aggregation of raw Tibber time series into derived metrics.
//! All functions are synchronous and operate on the records of one home.
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, Timelike};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::integration::tibber::{
    ChargerConsumptionNode, ConsumptionNode, PriceEntry, ProductionNode,
};

/// One hour of metered consumption in local time.
/// Value fields stay absent until the utility has settled the hour.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionRecord {
    pub timestamp: DateTime<Local>,
    pub consumption: Option<f64>,
    pub price: Option<f64>,
    pub cost: Option<f64>,
}

impl ConsumptionRecord {
    /// The local calendar day of the record.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Ordering for peak selection: absent consumption sorts below any
    /// present value, equal absent values fall back to the timestamp.
    pub fn cmp_consumption(&self, other: &Self) -> Ordering {
        match (self.consumption, other.consumption) {
            (None, None) => self.timestamp.cmp(&other.timestamp),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(own), Some(other)) => own.total_cmp(&other),
        }
    }
}

impl From<&ConsumptionNode> for ConsumptionRecord {
    fn from(node: &ConsumptionNode) -> Self {
        ConsumptionRecord {
            timestamp: node.from.with_timezone(&Local),
            consumption: node.consumption,
            price: node.unit_price,
            cost: node.cost,
        }
    }
}

/// The consumption records of the current calendar month, deduplicated by
/// timestamp. The first insertion wins, so metered records must be inserted
/// before price-only records.
#[derive(Debug, Default, Clone)]
pub struct MonthRecords {
    records: BTreeMap<DateTime<Local>, ConsumptionRecord>,
}

impl MonthRecords {
    pub fn insert(&mut self, record: ConsumptionRecord) {
        self.records.entry(record.timestamp).or_insert(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConsumptionRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The unit price at a timestamp, truncated to the hour.
    pub fn price_at(&self, timestamp: DateTime<Local>) -> Option<f64> {
        self.records
            .get(&truncate_to_hour(timestamp))
            .and_then(|record| record.price)
    }
}

/// Tracks the highest hourly consumption of a month: at most 3 entries, at
/// most one per calendar day, a larger same-day value replaces the entry.
#[derive(Debug, Default, Clone)]
pub struct PeakTracker {
    peaks: Vec<ConsumptionRecord>,
}

impl PeakTracker {
    pub fn observe(&mut self, record: &ConsumptionRecord) {
        if record.consumption.is_none() {
            return;
        }
        let qualifies = self.peaks.len() < 3
            || self
                .peaks
                .last()
                .is_some_and(|last| record.cmp_consumption(last) == Ordering::Greater);
        if !qualifies {
            return;
        }
        let mut same_day = false;
        for existing in self.peaks.iter_mut() {
            if existing.day() == record.day() {
                if record.cmp_consumption(existing) == Ordering::Greater {
                    *existing = record.clone();
                }
                same_day = true;
                break;
            }
        }
        if !same_day {
            self.peaks.push(record.clone());
        }
        self.peaks.sort_by(|a, b| b.cmp_consumption(a));
        self.peaks.truncate(3);
    }

    /// The retained peak records, highest first.
    pub fn records(&self) -> &[ConsumptionRecord] {
        &self.peaks
    }

    /// The mean of the retained peak values, if any.
    pub fn average(&self) -> Option<f64> {
        if self.peaks.is_empty() {
            return None;
        }
        let sum: f64 = self.peaks.iter().filter_map(|peak| peak.consumption).sum();
        Some(sum / self.peaks.len() as f64)
    }
}

/// Result of one sweep over the hourly consumption history.
#[derive(Debug, Default)]
pub struct ConsumptionAggregate {
    pub records: MonthRecords,
    pub peaks: PeakTracker,
    pub yesterday_available: bool,
    pub prev_hour_available: bool,
}

/// Sweep the hourly consumption history: collect the current month's records,
/// track peaks, and report which recent hours have been settled.
pub fn aggregate_consumption(
    nodes: &[ConsumptionNode],
    now: DateTime<Local>,
) -> ConsumptionAggregate {
    let yesterday = now.date_naive() - Duration::days(1);
    let prev_hour = truncate_to_hour(now) - Duration::hours(1);
    let mut aggregate = ConsumptionAggregate::default();

    for node in nodes {
        let record = ConsumptionRecord::from(node);
        if !in_month(record.timestamp, now) {
            continue;
        }
        if record.consumption.is_some() {
            if record.day() == yesterday {
                aggregate.yesterday_available = true;
            }
            if record.timestamp == prev_hour {
                aggregate.prev_hour_available = true;
            }
        }
        aggregate.peaks.observe(&record);
        aggregate.records.insert(record);
    }
    aggregate
}

/// Merge published spot prices into the month records as price-only entries.
/// Returns `true` if prices for tomorrow are available.
pub fn merge_price_entries(
    records: &mut MonthRecords,
    entries: &[PriceEntry],
    now: DateTime<Local>,
) -> bool {
    let tomorrow = now.date_naive() + Duration::days(1);
    let mut tomorrow_available = false;
    for entry in entries {
        let timestamp = entry.starts_at.with_timezone(&Local);
        if timestamp.date_naive() == tomorrow {
            tomorrow_available = true;
        }
        if !in_month(timestamp, now) {
            continue;
        }
        records.insert(ConsumptionRecord {
            timestamp,
            consumption: None,
            price: Some(entry.total),
            cost: None,
        });
    }
    tomorrow_available
}

/// Price statistics over the current month's records.
#[derive(Debug, Default, PartialEq)]
pub struct MonthStats {
    pub monthly_avg_price: Option<f64>,
    pub customer_avg_price: Option<f64>,
    pub daily_cost_with_subsidy: f64,
    pub monthly_cost_with_subsidy: f64,
}

/// Compute the price statistics from the month records.
/// Averages only consider records carrying both cost and consumption.
pub fn month_stats(records: &MonthRecords, now: DateTime<Local>) -> MonthStats {
    let today = now.date_naive();
    let mut total_price = 0.0;
    let mut n_price = 0u32;
    let mut total_cost = 0.0;
    let mut total_cons = 0.0;
    let mut cost_day_subsidy = 0.0;
    let mut cost_month_subsidy = 0.0;

    for record in records.iter() {
        let (Some(cost), Some(consumption)) = (record.cost, record.consumption) else {
            continue;
        };
        if let Some(price) = record.price {
            total_price += price;
            n_price += 1;
        }
        total_cost += cost;
        total_cons += consumption;
        let with_subsidy = cost - subsidy(record.price.unwrap_or(0.0)) * consumption;
        cost_month_subsidy += with_subsidy;
        if record.day() == today {
            cost_day_subsidy += with_subsidy;
        }
    }

    MonthStats {
        monthly_avg_price: (n_price > 0).then(|| total_price / n_price as f64),
        customer_avg_price: (total_cons > 0.0).then(|| total_cost / total_cons),
        daily_cost_with_subsidy: cost_day_subsidy,
        monthly_cost_with_subsidy: cost_month_subsidy,
    }
}

/// Cost and consumption summed over the current calendar year.
#[derive(Debug, Default, PartialEq)]
pub struct YearStats {
    pub yearly_cost: f64,
    pub yearly_cons: f64,
}

pub fn year_stats(nodes: &[ConsumptionNode], now: DateTime<Local>) -> YearStats {
    let mut stats = YearStats::default();
    for node in nodes {
        let timestamp = node.from.with_timezone(&Local);
        if timestamp.year() != now.year() {
            continue;
        }
        if let Some(consumption) = node.consumption {
            stats.yearly_cons += consumption;
        }
        if let Some(cost) = node.cost {
            stats.yearly_cost += cost;
        }
    }
    stats
}

/// Current month consumption compared to the same hours one year earlier.
#[derive(Debug, Default, PartialEq)]
pub struct MonthComparison {
    pub month_cons: f64,
    pub prev_year_month_cons: f64,
    pub compare_cons: f64,
}

pub fn month_comparison(nodes: &[ConsumptionNode], now: DateTime<Local>) -> MonthComparison {
    let mut month_cons = 0.0;
    let mut month_hours = BTreeSet::new();
    for node in nodes {
        let timestamp = node.from.with_timezone(&Local);
        if !in_month(timestamp, now) {
            continue;
        }
        if let Some(consumption) = node.consumption {
            month_cons += consumption;
            month_hours.insert(timestamp);
        }
    }

    let mut prev_year_month_cons = 0.0;
    for node in nodes {
        let Some(consumption) = node.consumption else {
            continue;
        };
        let timestamp = node.from.with_timezone(&Local) + Duration::days(365);
        if month_hours.contains(&timestamp) {
            prev_year_month_cons += consumption;
        }
    }

    MonthComparison {
        month_cons,
        prev_year_month_cons,
        compare_cons: month_cons - prev_year_month_cons,
    }
}

/// Day and month sums of an EV charger's daily consumption records.
#[derive(Debug, Default, PartialEq)]
pub struct ChargerStats {
    pub cost_day: f64,
    pub cost_month: f64,
    pub consumption_day: f64,
    pub consumption_month: f64,
}

pub fn charger_stats(nodes: &[ChargerConsumptionNode], now: DateTime<Local>) -> ChargerStats {
    let today = now.date_naive();
    let mut stats = ChargerStats::default();
    for node in nodes {
        let timestamp = node.from.with_timezone(&Local);
        if !in_month(timestamp, now) {
            continue;
        }
        if let Some(cost) = node.energy_cost {
            stats.cost_month += cost;
            if timestamp.date_naive() == today {
                stats.cost_day += cost;
            }
        }
        if let Some(consumption) = node.consumption {
            stats.consumption_month += consumption;
            if timestamp.date_naive() == today {
                stats.consumption_day += consumption;
            }
        }
    }
    stats
}

/// Day and month production profit, with flags for the scheduling heuristics.
#[derive(Debug, Default, PartialEq)]
pub struct ProductionStats {
    pub profit_day: f64,
    pub profit_month: f64,
    pub yesterday_available: bool,
    pub prev_hour_available: bool,
}

pub fn production_stats(nodes: &[ProductionNode], now: DateTime<Local>) -> ProductionStats {
    let yesterday = now.date_naive() - Duration::days(1);
    let prev_hour = truncate_to_hour(now) - Duration::hours(1);
    let mut stats = ProductionStats::default();
    for node in nodes {
        let timestamp = node.from.with_timezone(&Local);
        if !in_month(timestamp, now) {
            continue;
        }
        let Some(profit) = node.profit else {
            continue;
        };
        if timestamp.date_naive() == yesterday {
            stats.yesterday_available = true;
        }
        if timestamp == prev_hour {
            stats.prev_hour_available = true;
        }
        stats.profit_month += profit;
        if timestamp.date_naive() == now.date_naive() {
            stats.profit_day += profit;
        }
    }
    stats
}

/// Government price support: 90% of the spot price above a threshold of
/// 0.73 NOK/kWh plus VAT.
pub fn subsidy(price: f64) -> f64 {
    let vat_factor = 1.25;
    (0.9 * (price - 0.73 * vat_factor)).max(0.0)
}

/// Truncate a timestamp to the start of its hour.
pub fn truncate_to_hour(timestamp: DateTime<Local>) -> DateTime<Local> {
    timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("invalid time")
}

/// Whether a timestamp falls in the same calendar month and year as `now`.
fn in_month(timestamp: DateTime<Local>, now: DateTime<Local>) -> bool {
    timestamp.month() == now.month() && timestamp.year() == now.year()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, mo, d, h, 0, 0)
            .single()
            .expect("invalid test time")
    }

    fn record(timestamp: DateTime<Local>, consumption: Option<f64>) -> ConsumptionRecord {
        ConsumptionRecord {
            timestamp,
            consumption,
            price: Some(1.0),
            cost: consumption,
        }
    }

    fn node(
        timestamp: DateTime<Local>,
        consumption: Option<f64>,
        price: Option<f64>,
        cost: Option<f64>,
    ) -> ConsumptionNode {
        ConsumptionNode {
            from: timestamp.fixed_offset(),
            consumption,
            cost,
            unit_price: price,
        }
    }

    #[test]
    fn test_cmp_consumption_none_sorts_lowest() {
        let with_value = record(local(2023, 1, 5, 10), Some(0.1));
        let without_value = record(local(2023, 1, 5, 11), None);

        assert_eq!(
            without_value.cmp_consumption(&with_value),
            Ordering::Less
        );
        assert_eq!(
            with_value.cmp_consumption(&without_value),
            Ordering::Greater
        );
    }

    #[test]
    fn test_cmp_consumption_both_none_falls_back_to_timestamp() {
        let earlier = record(local(2023, 1, 5, 10), None);
        let later = record(local(2023, 1, 5, 11), None);

        assert_eq!(earlier.cmp_consumption(&later), Ordering::Less);
    }

    #[test]
    fn test_month_records_first_insert_wins() {
        let mut records = MonthRecords::default();
        let timestamp = local(2023, 1, 5, 10);
        records.insert(record(timestamp, Some(2.0)));
        records.insert(ConsumptionRecord {
            timestamp,
            consumption: None,
            price: Some(0.5),
            cost: None,
        });

        assert_eq!(records.len(), 1);
        let kept = records.iter().next().unwrap();
        assert_eq!(kept.consumption, Some(2.0));
    }

    #[test]
    fn test_month_records_price_at_truncates_to_hour() {
        let mut records = MonthRecords::default();
        records.insert(ConsumptionRecord {
            timestamp: local(2023, 1, 5, 10),
            consumption: None,
            price: Some(0.92),
            cost: None,
        });

        let lookup = local(2023, 1, 5, 10) + Duration::minutes(42);
        assert_eq!(records.price_at(lookup), Some(0.92));
        assert_eq!(records.price_at(local(2023, 1, 5, 11)), None);
    }

    #[test]
    fn test_peak_tracker_keeps_three_highest() {
        let mut tracker = PeakTracker::default();
        for (day, value) in [(1, 1.0), (2, 5.0), (3, 3.0), (4, 4.0), (5, 2.0)] {
            tracker.observe(&record(local(2023, 1, day, 8), Some(value)));
        }

        let values: Vec<f64> = tracker
            .records()
            .iter()
            .filter_map(|peak| peak.consumption)
            .collect();
        assert_eq!(values, vec![5.0, 4.0, 3.0]);
        assert_eq!(tracker.average(), Some(4.0));
    }

    #[test]
    fn test_peak_tracker_one_entry_per_day() {
        let mut tracker = PeakTracker::default();
        tracker.observe(&record(local(2023, 1, 5, 8), Some(2.0)));
        tracker.observe(&record(local(2023, 1, 5, 18), Some(6.0)));
        tracker.observe(&record(local(2023, 1, 5, 20), Some(4.0)));

        assert_eq!(tracker.records().len(), 1);
        assert_eq!(tracker.records()[0].consumption, Some(6.0));
        assert_eq!(tracker.records()[0].timestamp, local(2023, 1, 5, 18));
    }

    #[test]
    fn test_peak_tracker_ignores_records_without_value() {
        let mut tracker = PeakTracker::default();
        tracker.observe(&record(local(2023, 1, 5, 8), None));

        assert!(tracker.records().is_empty());
        assert_eq!(tracker.average(), None);
    }

    #[test]
    fn test_aggregate_consumption_scopes_to_month() {
        let now = local(2023, 1, 5, 12);
        let nodes = vec![
            node(local(2022, 12, 31, 10), Some(1.0), Some(1.0), Some(1.0)),
            node(local(2023, 1, 4, 10), Some(2.0), Some(1.0), Some(2.0)),
            node(local(2023, 1, 5, 11), Some(3.0), Some(1.0), Some(3.0)),
        ];

        let aggregate = aggregate_consumption(&nodes, now);

        assert_eq!(aggregate.records.len(), 2);
        assert!(aggregate.yesterday_available);
        assert!(aggregate.prev_hour_available);
    }

    #[test]
    fn test_aggregate_consumption_no_recent_data() {
        let now = local(2023, 1, 5, 12);
        let nodes = vec![node(local(2023, 1, 2, 10), Some(2.0), Some(1.0), Some(2.0))];

        let aggregate = aggregate_consumption(&nodes, now);

        assert!(!aggregate.yesterday_available);
        assert!(!aggregate.prev_hour_available);
    }

    #[test]
    fn test_merge_price_entries_reports_tomorrow() {
        let now = local(2023, 1, 5, 14);
        let mut records = MonthRecords::default();
        let entries = vec![
            PriceEntry {
                starts_at: local(2023, 1, 5, 10).fixed_offset(),
                total: 0.92,
            },
            PriceEntry {
                starts_at: local(2023, 1, 6, 10).fixed_offset(),
                total: 1.02,
            },
        ];

        let tomorrow_available = merge_price_entries(&mut records, &entries, now);

        assert!(tomorrow_available);
        assert_eq!(records.len(), 2);
        assert_eq!(records.price_at(local(2023, 1, 5, 10)), Some(0.92));
    }

    #[test]
    fn test_merge_price_entries_without_tomorrow() {
        let now = local(2023, 1, 5, 10);
        let mut records = MonthRecords::default();
        let entries = vec![PriceEntry {
            starts_at: local(2023, 1, 5, 10).fixed_offset(),
            total: 0.92,
        }];

        assert!(!merge_price_entries(&mut records, &entries, now));
    }

    #[test]
    fn test_month_stats() {
        let now = local(2023, 1, 5, 12);
        let mut records = MonthRecords::default();
        records.insert(ConsumptionRecord {
            timestamp: local(2023, 1, 4, 10),
            consumption: Some(2.0),
            price: Some(1.0),
            cost: Some(2.0),
        });
        records.insert(ConsumptionRecord {
            timestamp: local(2023, 1, 5, 10),
            consumption: Some(4.0),
            price: Some(2.0),
            cost: Some(8.0),
        });
        // Price-only entry must not contribute to the averages.
        records.insert(ConsumptionRecord {
            timestamp: local(2023, 1, 5, 11),
            consumption: None,
            price: Some(3.0),
            cost: None,
        });

        let stats = month_stats(&records, now);

        assert_eq!(stats.monthly_avg_price, Some(1.5));
        assert_eq!(stats.customer_avg_price, Some(10.0 / 6.0));
        // subsidy(1.0) = 0.9 * (1.0 - 0.9125) = 0.07875
        // subsidy(2.0) = 0.9 * (2.0 - 0.9125) = 0.97875
        let expected_day = 8.0 - 0.97875 * 4.0;
        let expected_month = (2.0 - 0.07875 * 2.0) + expected_day;
        assert!((stats.daily_cost_with_subsidy - expected_day).abs() < 1e-9);
        assert!((stats.monthly_cost_with_subsidy - expected_month).abs() < 1e-9);
    }

    #[test]
    fn test_month_stats_empty() {
        let now = local(2023, 1, 5, 12);
        let stats = month_stats(&MonthRecords::default(), now);

        assert_eq!(stats.monthly_avg_price, None);
        assert_eq!(stats.customer_avg_price, None);
        assert_eq!(stats.daily_cost_with_subsidy, 0.0);
        assert_eq!(stats.monthly_cost_with_subsidy, 0.0);
    }

    #[test]
    fn test_year_stats() {
        let now = local(2023, 6, 5, 12);
        let nodes = vec![
            node(local(2022, 12, 31, 10), Some(1.0), None, Some(1.5)),
            node(local(2023, 1, 4, 10), Some(2.0), None, Some(3.0)),
            node(local(2023, 6, 4, 10), Some(4.0), None, None),
        ];

        let stats = year_stats(&nodes, now);

        assert_eq!(stats.yearly_cons, 6.0);
        assert_eq!(stats.yearly_cost, 3.0);
    }

    #[test]
    fn test_month_comparison() {
        let now = local(2023, 1, 5, 12);
        let nodes = vec![
            // Same hours one year apart (365 days).
            node(local(2022, 1, 5, 10), Some(3.0), None, None),
            node(local(2023, 1, 5, 10), Some(2.0), None, None),
            // Current month hour without a counterpart last year.
            node(local(2023, 1, 4, 10), Some(1.0), None, None),
        ];

        let comparison = month_comparison(&nodes, now);

        assert_eq!(comparison.month_cons, 3.0);
        assert_eq!(comparison.prev_year_month_cons, 3.0);
        assert_eq!(comparison.compare_cons, 0.0);
    }

    #[test]
    fn test_charger_stats() {
        let now = local(2023, 1, 5, 12);
        let nodes = vec![
            ChargerConsumptionNode {
                from: local(2022, 12, 31, 0).fixed_offset(),
                consumption: Some(10.0),
                energy_cost: Some(12.0),
            },
            ChargerConsumptionNode {
                from: local(2023, 1, 4, 0).fixed_offset(),
                consumption: Some(8.0),
                energy_cost: Some(9.0),
            },
            ChargerConsumptionNode {
                from: local(2023, 1, 5, 0).fixed_offset(),
                consumption: Some(4.0),
                energy_cost: None,
            },
        ];

        let stats = charger_stats(&nodes, now);

        assert_eq!(stats.consumption_month, 12.0);
        assert_eq!(stats.consumption_day, 4.0);
        assert_eq!(stats.cost_month, 9.0);
        assert_eq!(stats.cost_day, 0.0);
    }

    #[test]
    fn test_production_stats() {
        let now = local(2023, 1, 5, 12);
        let nodes = vec![
            ProductionNode {
                from: local(2023, 1, 4, 10).fixed_offset(),
                profit: Some(2.0),
            },
            ProductionNode {
                from: local(2023, 1, 5, 11).fixed_offset(),
                profit: Some(3.0),
            },
            ProductionNode {
                from: local(2023, 1, 5, 12).fixed_offset(),
                profit: None,
            },
        ];

        let stats = production_stats(&nodes, now);

        assert_eq!(stats.profit_month, 5.0);
        assert_eq!(stats.profit_day, 3.0);
        assert!(stats.yesterday_available);
        assert!(stats.prev_hour_available);
    }

    #[test]
    fn test_subsidy() {
        assert_eq!(subsidy(0.5), 0.0);
        let expected = 0.9 * (2.0 - 0.73 * 1.25);
        assert!((subsidy(2.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_truncate_to_hour() {
        let timestamp = local(2023, 1, 5, 10) + Duration::minutes(42) + Duration::seconds(7);
        assert_eq!(truncate_to_hour(timestamp), local(2023, 1, 5, 10));
    }
}
