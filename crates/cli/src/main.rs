//! Order Sync CLI
//!
//! A command-line tool for triggering syncs, inspecting status and
//! statistics, and managing the schedule of the order sync daemon.

mod client;
mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use commands::{maintenance, schedule, sync};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Order Sync CLI
#[derive(Parser)]
#[command(name = "ordersync")]
#[command(author, version, about = "CLI for the Order Sync daemon", long_about = None)]
pub struct Cli {
    /// Daemon API URL (can also be set via ORDERSYNC_API_URL env var)
    #[arg(long, env = "ORDERSYNC_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, value_enum)]
    pub format: Option<output::OutputFormat>,

    /// Request timeout in seconds; a sync request waits for the run to finish
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a sync now and wait for it to finish
    Sync {
        /// Ignore the last successful sync and walk every page
        #[arg(long)]
        full: bool,

        /// Only orders with this status
        #[arg(long)]
        status: Option<String>,

        /// Only orders dated on or after this date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_date)]
        date_from: Option<DateTime<Utc>>,

        /// Only orders dated on or before this date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_date)]
        date_to: Option<DateTime<Utc>>,

        /// Only orders updated after this instant (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_date)]
        updated_after: Option<DateTime<Utc>>,
    },

    /// Show sync status and the schedule
    Status,

    /// Show detailed statistics and error breakdown
    Stats,

    /// Manage the recurring sync
    #[command(subcommand)]
    Schedule(ScheduleCommands),

    /// Delete old records from the store
    Cleanup {
        /// Days of records to keep (defaults to the daemon's setting)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Check that the daemon can reach the source API and the store
    TestConnections,
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Start or restart the recurring sync
    Start {
        /// Interval in minutes (defaults to the daemon's setting)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Stop the recurring sync; a running sync is not interrupted
    Stop,
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp
fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = config::Config::load().context("Failed to load CLI config")?;
    let api_url = file_config.resolve_api_url(cli.api_url);
    let format = file_config.resolve_format(cli.format);
    let timeout = cli
        .timeout
        .or(file_config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    // Initialize client
    let client = client::ApiClient::new(&api_url, Duration::from_secs(timeout))?;

    // Execute command
    match cli.command {
        Commands::Sync {
            full,
            status,
            date_from,
            date_to,
            updated_after,
        } => {
            let request = client::SyncRequest {
                full_sync: full,
                filters: client::SyncFilters {
                    date_from,
                    date_to,
                    updated_after,
                    status,
                },
            };
            sync::trigger_sync(&client, request, format).await?;
        }
        Commands::Status => sync::show_status(&client, format).await?,
        Commands::Stats => sync::show_stats(&client, format).await?,
        Commands::Schedule(schedule_cmd) => match schedule_cmd {
            ScheduleCommands::Start { interval } => {
                schedule::start(&client, interval, format).await?;
            }
            ScheduleCommands::Stop => schedule::stop(&client, format).await?,
        },
        Commands::Cleanup { days } => maintenance::cleanup(&client, days, format).await?,
        Commands::TestConnections => maintenance::test_connections(&client, format).await?,
    }

    Ok(())
}
