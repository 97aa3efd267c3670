use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{info, warn};

use crate::{
    api::{
        auth::{Credentials, Scope, DEFAULT_TOKEN_CACHE},
        spotify::SpotifyClient,
        StreamingApi, TimeRange,
    },
    tally::{
        estimate::get_top_tracks_estimate,
        live::{get_daily_song_counts, LiveConfig},
        report::{merge, SeriesSummary},
        DailySeries,
    },
    utils::clock::{Clock, DefaultClock},
};

use super::report::{print_summary, write_csv};

#[derive(Debug, Parser)]
pub struct LiveCommand {
    #[arg(
        long,
        short,
        default_value_t = 30,
        value_parser = clap::value_parser!(u32).range(1..=36500),
        help = "Number of days to look back, today included"
    )]
    days: u32,
    #[arg(
        long,
        default_value_t = 10,
        help = "Maximum number of history requests, failed ones included"
    )]
    max_pages: u32,
    #[arg(
        long,
        default_value_t = TimeRange::ShortTerm,
        help = "Top tracks period used for estimating days without history"
    )]
    time_range: TimeRange,
    #[arg(
        long,
        default_value_t = 50,
        value_parser = clap::value_parser!(u32).range(1..=50),
        help = "Number of top tracks used for estimating, at most 50"
    )]
    limit: u32,
    #[arg(long, help = "Only report observed plays, never estimate")]
    no_estimate: bool,
    #[arg(long, short, default_value = "daily_song_counts.csv", help = "Output CSV file")]
    output: PathBuf,
    #[arg(
        long,
        default_value = DEFAULT_TOKEN_CACHE,
        help = "Token cache file. Credentials are read from SPOTIPY_CLIENT_ID, SPOTIPY_CLIENT_SECRET and SPOTIPY_REDIRECT_URI"
    )]
    token_cache: PathBuf,
}

/// Collects recent plays, fills the gaps with top tracks estimates and saves them as CSV.
pub async fn process_live_command(command: LiveCommand) -> Result<()> {
    let mut scope = Scope::default().with(Scope::RECENTLY_PLAYED);
    if !command.no_estimate {
        scope = scope.with(Scope::TOP_READ);
    }

    let credentials = Credentials::from_env()?;
    let client = SpotifyClient::connect(credentials, scope, command.token_cache.clone())
        .await
        .context("Failed to set up the streaming service client")?;

    run_live(&client, &DefaultClock, &command).await
}

async fn run_live(api: &dyn StreamingApi, clock: &dyn Clock, command: &LiveCommand) -> Result<()> {
    println!("Fetching song counts for the past {} days...", command.days);

    let config = LiveConfig {
        days: command.days,
        max_pages: command.max_pages,
        ..Default::default()
    };
    let observed = get_daily_song_counts(api, clock, &Local, &config)
        .await
        .context("Failed to collect recently played tracks")?;

    let estimated = if command.no_estimate {
        DailySeries::default()
    } else {
        match get_top_tracks_estimate(api, clock, &Local, command.time_range, command.limit).await {
            Ok(estimated) => estimated,
            Err(e) if e.is_retryable() => {
                println!("Error fetching top tracks: {e}");
                warn!("Continuing without estimates {e:?}");
                DailySeries::default()
            }
            Err(e) => return Err(e).context("Failed to fetch top tracks"),
        }
    };

    let merged = merge(&observed, &estimated);
    if merged.is_empty() {
        println!("No listening history retrieved. Check your API credentials and permissions.");
        return Ok(());
    }

    write_csv(&command.output, &merged).await?;
    println!("Saved daily song counts to {}", command.output.display());
    print_summary(&SeriesSummary::of(&merged));

    if !estimated.is_empty() {
        info!("Report includes estimated counts");
        println!(
            "\nNote: the service doesn't expose full history, days without observed plays are \
             estimated from your top tracks."
        );
    }
    Ok(())
}
