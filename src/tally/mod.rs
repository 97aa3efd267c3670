//! Counting plays per calendar day. The basic idea is:
//!  - [archive] counts exported history files for a year.
//!  - [live] walks the recently played endpoint back through a lookback window.
//!  - [estimate] synthesizes approximate counts from ranked top tracks.
//!  - [report] merges observed and estimated series and summarizes them.
//!
//! Every path produces a [DailySeries].

pub mod archive;
pub mod estimate;
pub mod live;
pub mod report;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::utils::time::{date_key, trailing_days};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    #[serde(rename = "song_count")]
    pub count: u32,
}

/// Dated counts sorted by date with at most one entry per day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailySeries(Vec<DailyCount>);

impl DailySeries {
    /// Only days present in `counts` are materialized.
    pub fn from_counts(counts: BTreeMap<NaiveDate, u32>) -> Self {
        Self(
            counts
                .into_iter()
                .map(|(date, count)| DailyCount { date, count })
                .collect(),
        )
    }

    /// Exactly `days` entries ending with `end`, zero where `counts` has nothing.
    pub fn zero_filled(counts: &BTreeMap<NaiveDate, u32>, end: NaiveDate, days: u32) -> Self {
        Self(
            trailing_days(end, days)
                .map(|date| DailyCount {
                    date,
                    count: counts.get(&date).copied().unwrap_or(0),
                })
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DailyCount> {
        self.0.iter()
    }

    pub fn get(&self, date: NaiveDate) -> Option<u32> {
        self.0
            .binary_search_by_key(&date, |v| v.date)
            .ok()
            .map(|index| self.0[index].count)
    }

    /// Shape of the archive JSON output: `{"YYYY-MM-DD": count}` in date order.
    pub fn to_date_map(&self) -> BTreeMap<String, u32> {
        self.0.iter().map(|v| (date_key(v.date), v.count)).collect()
    }
}

impl<'a> IntoIterator for &'a DailySeries {
    type Item = &'a DailyCount;
    type IntoIter = std::slice::Iter<'a, DailyCount>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Adds `amount` plays to `date`.
pub(crate) fn bump(counts: &mut BTreeMap<NaiveDate, u32>, date: NaiveDate, amount: u32) {
    *counts.entry(date).or_insert(0) += amount;
}
