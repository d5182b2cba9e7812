use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;

use crate::models::Row;

/// Label used when a row has no merchant.
pub const UNKNOWN_MERCHANT: &str = "N/A";

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

fn float_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("valid float regex")
    })
}

/// Leading-prefix float parse: `"10.5"` and `"10.5 CLP"` give 10.5, `"abc"`
/// gives `None`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let m = float_prefix().find(raw.trim_start())?;
    m.as_str().parse::<f64>().ok().filter(|v| v.is_finite())
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub label: String,
    pub count: usize,
}

impl CategoryCount {
    /// Fraction of `total` in 0.0..=1.0.
    pub fn share(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.count as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantStat {
    pub merchant: String,
    pub count: usize,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimePoint {
    pub date: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub rows: usize,
    pub total_amount: f64,
    /// Sale types in first-seen order.
    pub category_counts: Vec<CategoryCount>,
    /// Merchants in first-seen order.
    pub merchants: Vec<MerchantStat>,
    /// Ascending by date; ties keep file order.
    pub time_series: Vec<TimePoint>,
    pub unparsed_amounts: usize,
    pub unparsed_dates: usize,
}

impl Aggregates {
    /// Each aggregate is an independent linear scan over `rows`. Never fails;
    /// an empty slice gives zeroed values.
    pub fn compute(rows: &[Row]) -> Self {
        let (total_amount, unparsed_amounts) = total_amount(rows);
        let (time_series, unparsed_dates) = time_series(rows);
        Self {
            rows: rows.len(),
            total_amount,
            category_counts: category_counts(rows),
            merchants: merchant_stats(rows),
            time_series,
            unparsed_amounts,
            unparsed_dates,
        }
    }

    pub fn sale_type_count(&self, label: &str) -> usize {
        self.category_counts
            .iter()
            .find(|c| c.label == label)
            .map_or(0, |c| c.count)
    }

    /// Rows that carried a sale type.
    pub fn categorized(&self) -> usize {
        self.category_counts.iter().map(|c| c.count).sum()
    }
}

/// Sum of parsable amounts, plus how many rows were skipped.
pub fn total_amount(rows: &[Row]) -> (f64, usize) {
    let mut total = 0.0;
    let mut skipped = 0;
    for row in rows {
        match row.amount().and_then(parse_amount) {
            Some(v) => total += v,
            None => skipped += 1,
        }
    }
    (total, skipped)
}

/// Tally of the sale type column. Rows with an empty value are not counted.
pub fn category_counts(rows: &[Row]) -> Vec<CategoryCount> {
    let mut counts: Vec<CategoryCount> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();
    for label in rows.iter().filter_map(Row::sale_type).filter(|l| !l.is_empty()) {
        let slot = *slots.entry(label).or_insert_with(|| {
            counts.push(CategoryCount {
                label: label.to_string(),
                count: 0,
            });
            counts.len() - 1
        });
        counts[slot].count += 1;
    }
    counts
}

/// Per-merchant row count and amount sum. Every row counts; only parsable
/// amounts are summed.
pub fn merchant_stats(rows: &[Row]) -> Vec<MerchantStat> {
    let mut stats: Vec<MerchantStat> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        let merchant = row.merchant().filter(|m| !m.is_empty()).unwrap_or(UNKNOWN_MERCHANT);
        let slot = *slots.entry(merchant).or_insert_with(|| {
            stats.push(MerchantStat {
                merchant: merchant.to_string(),
                count: 0,
                amount: 0.0,
            });
            stats.len() - 1
        });
        stats[slot].count += 1;
        if let Some(v) = row.amount().and_then(parse_amount) {
            stats[slot].amount += v;
        }
    }
    stats
}

/// `(date, amount)` points sorted by date. Rows missing either are dropped and
/// counted.
pub fn time_series(rows: &[Row]) -> (Vec<TimePoint>, usize) {
    let mut points: Vec<(NaiveDateTime, TimePoint)> = Vec::with_capacity(rows.len());
    let mut dropped = 0;
    for row in rows {
        let raw_date = row.date().unwrap_or_default();
        match (parse_date(raw_date), row.amount().and_then(parse_amount)) {
            (Some(at), Some(amount)) => points.push((
                at,
                TimePoint {
                    date: raw_date.to_string(),
                    amount,
                },
            )),
            _ => dropped += 1,
        }
    }
    // sort_by_key is stable
    points.sort_by_key(|(at, _)| *at);
    (points.into_iter().map(|(_, p)| p).collect(), dropped)
}
