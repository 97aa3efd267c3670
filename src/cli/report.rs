use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::tally::{report::SeriesSummary, DailySeries};

/// Writes `{"YYYY-MM-DD": count}` pretty printed with 2 space indentation.
pub async fn write_json(path: &Path, series: &DailySeries) -> Result<()> {
    let content = serde_json::to_vec_pretty(&series.to_date_map())?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {path:?}"))?;
    info!("Wrote {} days to {path:?}", series.len());
    Ok(())
}

pub fn to_csv(series: &DailySeries) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(vec![]);
    for row in series {
        writer.serialize(row)?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

/// Writes a `date,song_count` CSV.
pub async fn write_csv(path: &Path, series: &DailySeries) -> Result<()> {
    tokio::fs::write(path, to_csv(series)?)
        .await
        .with_context(|| format!("Failed to write {path:?}"))?;
    info!("Wrote {} days to {path:?}", series.len());
    Ok(())
}

pub fn print_summary(summary: &SeriesSummary) {
    println!("\nSummary of your listening history:");
    println!(
        "Total days with data: {} out of {}",
        summary.active_days, summary.total_days
    );
    println!("Total songs: {}", summary.total);
    println!("Average songs per day: {:.2}", summary.mean);
    if let Some(max) = summary.max {
        println!("Maximum songs in a day: {} (on {})", max.count, max.date);
    }
}
