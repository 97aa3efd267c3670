use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    api::{ApiError, PaginationCursor, PlayEvent, StreamingApi},
    utils::{
        clock::Clock,
        time::{date_key, day_in},
    },
};

use super::{bump, DailySeries};

/// Limits of a walk through recently played history.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Length of the lookback window, today included.
    pub days: u32,
    pub page_size: u32,
    /// Hard cap on requests, failed ones included. The service can't be asked for everything
    /// since a date, so this bounds the walk when history is sparse.
    pub max_pages: u32,
    pub page_delay: Duration,
    pub error_delay: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            days: 30,
            page_size: 50,
            max_pages: 10,
            page_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(5),
        }
    }
}

/// Counts track plays of a page that happened at or after `cutoff`. Returns whether any event of
/// the page was inside the window.
fn tally_page<Tz: TimeZone>(
    counts: &mut BTreeMap<NaiveDate, u32>,
    page: &[PlayEvent],
    cutoff: DateTime<Utc>,
    tz: &Tz,
) -> bool {
    let mut found_in_range = false;
    for event in page.iter().filter(|v| v.played_at >= cutoff) {
        found_in_range = true;
        if event.is_track() {
            bump(counts, day_in(event.played_at, tz), 1);
        }
    }
    found_in_range
}

/// Songs played per day during the last `config.days` days, as seen in `tz`.
///
/// The history is paged backwards from now until a page falls entirely before the window, the
/// service runs out of history or `max_pages` requests were made. Retryable request errors are
/// logged, backed off from and count as a request. Fatal ones abort the walk.
///
/// Returns exactly `config.days` zero-filled entries ending today, or an empty series if nothing
/// was counted.
#[instrument(skip(api, clock, tz))]
pub async fn get_daily_song_counts<Tz: TimeZone>(
    api: &dyn StreamingApi,
    clock: &dyn Clock,
    tz: &Tz,
    config: &LiveConfig,
) -> Result<DailySeries, ApiError> {
    let now = clock.time();
    // Windows reaching past the representable range start at the earliest instant
    let cutoff = now
        .checked_sub_signed(TimeDelta::days(config.days.into()))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut counts = BTreeMap::new();
    let mut cursor: Option<PaginationCursor> = None;
    let mut page = 0;

    println!("Collecting song count data for the past {} days...", config.days);

    while page < config.max_pages {
        let events = match api.recently_played(config.page_size, cursor).await {
            Ok(events) => events,
            Err(e) if e.is_retryable() => {
                println!("Error fetching data: {e}");
                warn!("Request for page after {cursor:?} failed {e:?}");
                let delay = e
                    .retry_after()
                    .map_or(config.error_delay, |v| v.max(config.error_delay));
                clock.sleep(delay).await;
                page += 1;
                continue;
            }
            Err(e) => {
                error!("Request for page after {cursor:?} failed permanently {e:?}");
                return Err(e);
            }
        };

        let Some(earliest) = events.iter().map(|v| v.played_at).min() else {
            println!("No more tracks available.");
            break;
        };

        let found_in_range = tally_page(&mut counts, &events, cutoff, tz);

        let next = PaginationCursor::before(earliest);
        cursor = Some(next);
        page += 1;
        debug!("Page {page} had {} events, next cursor {next:?}", events.len());
        println!(
            "Page {page}: Collected data up to {}...",
            date_key(day_in(next.instant(), tz))
        );

        if !found_in_range {
            println!("No more tracks in the specified date range.");
            break;
        }

        if page < config.max_pages {
            clock.sleep(config.page_delay).await;
        }
    }

    if counts.is_empty() {
        info!("No plays found in the last {} days", config.days);
        return Ok(DailySeries::default());
    }

    info!("Found plays on {} days", counts.len());
    Ok(DailySeries::zero_filled(&counts, day_in(now, tz), config.days))
}
