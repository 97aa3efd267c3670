use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use clap::Parser;

use crate::tally::{archive::count_archives, report::SeriesSummary};

use super::report::{print_summary, write_json};

#[derive(Debug, Parser)]
pub struct ArchiveCommand {
    #[arg(
        required = true,
        help = "Exported streaming history files, for example Streaming_History_Audio_2023-2024_7.json"
    )]
    files: Vec<PathBuf>,
    #[arg(long, short, help = "Year to count. Defaults to the current year")]
    year: Option<i32>,
    #[arg(
        long,
        short,
        help = "Output file. Defaults to daily_song_counts_<year>.json"
    )]
    output: Option<PathBuf>,
}

/// Counts plays per day of a year from exported history and saves them as JSON.
pub async fn process_archive_command(
    ArchiveCommand {
        files,
        year,
        output,
    }: ArchiveCommand,
) -> Result<()> {
    let year = year.unwrap_or_else(|| Local::now().year());
    let output = output.unwrap_or_else(|| PathBuf::from(format!("daily_song_counts_{year}.json")));

    let series = count_archives(&files, year)
        .await
        .context("Failed to count archived plays")?;

    if series.is_empty() {
        println!("No songs played in {year} were found in the given files.");
        return Ok(());
    }

    write_json(&output, &series).await?;
    println!("Saved daily song counts to {}", output.display());
    print_summary(&SeriesSummary::of(&series));
    Ok(())
}
