//! Approximate daily counts from a ranked top tracks list.
//!
//! The service doesn't expose full play history, so when recently played data is missing this
//! spreads a made up number of plays over the last [ESTIMATE_WINDOW_DAYS] days. Higher ranked
//! tracks and more recent days get more plays. The result is a heuristic without any error
//! bounds and must be presented as an estimate, never as a measurement.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate, TimeZone};
use tracing::{info, instrument};

use crate::{
    api::{ApiError, StreamingApi, TimeRange},
    utils::{clock::Clock, time::day_in},
};

use super::{bump, DailySeries};

/// Estimated series always cover this many days.
pub const ESTIMATE_WINDOW_DAYS: u32 = 30;

const PLAYS_SCALE: f64 = 2.;

/// Estimated plays of the track at `rank` (0 based, out of `total`) on the day `day_offset` days
/// before today. Ties round to even, so 0.5 becomes 0 and 2.5 becomes 2. Ranks outside the list
/// and days outside the estimate window get no plays.
pub(crate) fn play_estimate(rank: usize, total: usize, day_offset: u32) -> u32 {
    if rank >= total || day_offset >= ESTIMATE_WINDOW_DAYS {
        return 0;
    }
    let rank_weight = (total - rank) as f64 / total as f64;
    let day_weight = f64::from(ESTIMATE_WINDOW_DAYS - day_offset) / f64::from(ESTIMATE_WINDOW_DAYS);
    (rank_weight * day_weight * PLAYS_SCALE).round_ties_even() as u32
}

/// Spreads `total_tracks` ranked tracks over the days before `today`. Always returns
/// [ESTIMATE_WINDOW_DAYS] zero-filled entries ending with `today`.
pub fn estimate_daily_counts(
    total_tracks: usize,
    time_range: TimeRange,
    today: NaiveDate,
) -> DailySeries {
    let mut counts = BTreeMap::new();
    let spread = time_range.period_days().min(ESTIMATE_WINDOW_DAYS);

    for rank in 0..total_tracks {
        for day_offset in 0..spread {
            let estimate = play_estimate(rank, total_tracks, day_offset);
            if estimate == 0 {
                continue;
            }
            if let Some(date) = today.checked_sub_days(Days::new(day_offset.into())) {
                bump(&mut counts, date, estimate);
            }
        }
    }

    DailySeries::zero_filled(&counts, today, ESTIMATE_WINDOW_DAYS)
}

/// Fetches top tracks for `time_range` and estimates daily counts from them. Returns an empty
/// series when the service has no top tracks.
#[instrument(skip(api, clock, tz))]
pub async fn get_top_tracks_estimate<Tz: TimeZone>(
    api: &dyn StreamingApi,
    clock: &dyn Clock,
    tz: &Tz,
    time_range: TimeRange,
    limit: u32,
) -> Result<DailySeries, ApiError> {
    println!("Fetching your top tracks for {time_range}...");
    let tracks = api.top_tracks(time_range, limit).await?;

    if tracks.is_empty() {
        println!("No top tracks found for this time period.");
        return Ok(DailySeries::default());
    }
    println!("Found {} top tracks.", tracks.len());
    info!("Estimating from {} top tracks", tracks.len());

    Ok(estimate_daily_counts(
        tracks.len(),
        time_range,
        day_in(clock.time(), tz),
    ))
}
