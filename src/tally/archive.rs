use std::{
    collections::BTreeMap,
    future,
    path::{Path, PathBuf},
};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use futures::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::api::{PlayEvent, TrackRef};

use super::{bump, DailySeries};

/// Format of `ts` in exported streaming history.
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to read archive {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive {path:?} is not a list of play records")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("record {index} in {path:?} has malformed timestamp {ts:?}")]
    Timestamp {
        path: PathBuf,
        index: usize,
        ts: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// One entry of an exported streaming history file. Only the fields needed for counting are
/// read, everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct ArchiveRecord {
    pub ts: String,
    // Has to be present in the file even when null.
    #[serde(deserialize_with = "Option::deserialize")]
    pub master_metadata_track_name: Option<String>,
}

impl ArchiveRecord {
    pub fn into_play_event(self) -> Result<PlayEvent, chrono::ParseError> {
        let played_at = NaiveDateTime::parse_from_str(&self.ts, ARCHIVE_TIMESTAMP_FORMAT)?.and_utc();
        Ok(PlayEvent {
            played_at,
            track: self.master_metadata_track_name.map(TrackRef::named),
        })
    }
}

/// Reads a whole history file. Any malformed record fails the file.
#[instrument]
pub async fn load_archive(path: &Path) -> Result<Vec<PlayEvent>, ArchiveError> {
    let content = tokio::fs::read(path).await.map_err(|source| ArchiveError::Read {
        path: path.to_owned(),
        source,
    })?;

    let records: Vec<ArchiveRecord> =
        serde_json::from_slice(&content).map_err(|source| ArchiveError::Decode {
            path: path.to_owned(),
            source,
        })?;
    debug!("Parsed {} records", records.len());

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let ts = record.ts.clone();
            record
                .into_play_event()
                .map_err(|source| ArchiveError::Timestamp {
                    path: path.to_owned(),
                    index,
                    ts,
                    source,
                })
        })
        .collect()
}

/// Counts track plays from `events` that happened during `year` (UTC).
pub fn tally_year(
    counts: &mut BTreeMap<NaiveDate, u32>,
    events: impl IntoIterator<Item = PlayEvent>,
    year: i32,
) {
    for event in events {
        if event.played_at.year() != year || !event.is_track() {
            continue;
        }
        bump(counts, event.played_at.date_naive(), 1);
    }
}

/// Counts plays per day across all `paths` for `year`. Files are processed one after another and
/// the first failure aborts the whole run.
pub async fn count_archives(paths: &[PathBuf], year: i32) -> Result<DailySeries, ArchiveError> {
    let counts = stream::iter(paths)
        .then(|path| load_archive(path))
        .try_fold(BTreeMap::new(), |mut counts, events| {
            tally_year(&mut counts, events, year);
            future::ready(Ok(counts))
        })
        .await?;

    info!(
        "Counted {} days with plays in {year} from {} files",
        counts.len(),
        paths.len()
    );
    Ok(DailySeries::from_counts(counts))
}
