use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::{DailyCount, DailySeries};

/// Combines observed and estimated counts. Observed counts win whenever they are positive, other
/// days fall back to the estimate. A missing side counts as zero.
pub fn merge(observed: &DailySeries, estimated: &DailySeries) -> DailySeries {
    if observed.is_empty() {
        return estimated.clone();
    }
    if estimated.is_empty() {
        return observed.clone();
    }

    let mut joined = BTreeMap::<NaiveDate, (u32, u32)>::new();
    for v in observed {
        joined.entry(v.date).or_default().0 = v.count;
    }
    for v in estimated {
        joined.entry(v.date).or_default().1 = v.count;
    }

    DailySeries::from_counts(
        joined
            .into_iter()
            .map(|(date, (observed, estimated))| {
                (date, if observed > 0 { observed } else { estimated })
            })
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    /// Days with at least one play.
    pub active_days: usize,
    pub total_days: usize,
    pub total: u64,
    pub mean: f64,
    /// Earliest day holding the maximum. `None` when nothing was played.
    pub max: Option<DailyCount>,
}

impl SeriesSummary {
    pub fn of(series: &DailySeries) -> Self {
        let total_days = series.len();
        let total = series.iter().map(|v| u64::from(v.count)).sum::<u64>();
        let mean = if total_days == 0 {
            0.
        } else {
            total as f64 / total_days as f64
        };
        let max = series
            .iter()
            .filter(|v| v.count > 0)
            .fold(None::<DailyCount>, |best, v| match best {
                Some(best) if best.count >= v.count => Some(best),
                _ => Some(*v),
            });

        Self {
            active_days: series.iter().filter(|v| v.count > 0).count(),
            total_days,
            total,
            mean,
            max,
        }
    }
}
