//! Sync-related CLI commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, DetailedStats, SyncRequest, SyncRun, SyncStats, SyncStatus};
use crate::output::{
    color_status, format_duration_ms, format_timestamp, print_error, print_json,
    print_success, print_table, print_warning, OutputFormat,
};

/// Row for the recent runs table
#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Run")]
    id: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Fetched")]
    fetched: u64,
    #[tabled(rename = "Written")]
    written: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
    #[tabled(rename = "Duration")]
    duration: String,
}

impl From<&SyncRun> for RunRow {
    fn from(run: &SyncRun) -> Self {
        Self {
            id: short_id(&run.id),
            mode: run.mode.clone(),
            status: color_status(&run.status),
            started: format_timestamp(Some(run.started_at)),
            fetched: run.records_fetched,
            written: run.records_written,
            failed: run.records_failed,
            duration: run
                .duration_ms()
                .map(|ms| format_duration_ms(ms.max(0) as u64))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Row for error counts by kind
#[derive(Tabled)]
struct ErrorCountRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Last 24h")]
    count: usize,
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Trigger a sync and wait for it to finish
pub async fn trigger_sync(client: &ApiClient, request: SyncRequest, format: OutputFormat) -> Result<()> {
    let run = client.trigger_sync(&request).await?;

    match format {
        OutputFormat::Json => print_json(&run)?,
        OutputFormat::Table => {
            print_run(&run);
            if run.status == "succeeded" {
                print_success(&format!(
                    "Sync {} finished: {} written, {} failed",
                    short_id(&run.id),
                    run.records_written,
                    run.records_failed
                ));
            } else {
                print_error(&format!(
                    "Sync {} failed: {}",
                    short_id(&run.id),
                    run.last_error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }

    Ok(())
}

fn print_run(run: &SyncRun) {
    println!("{}", "Sync Run".bold());
    println!("{}", "=".repeat(50));
    println!("ID:                     {}", run.id.cyan());
    println!("Mode:                   {}", run.mode);
    println!("Status:                 {}", color_status(&run.status));
    println!("Started:                {}", format_timestamp(Some(run.started_at)));
    println!("Finished:               {}", format_timestamp(run.finished_at));
    println!();
    println!("Pages fetched:          {}", run.pages_fetched);
    println!("Records fetched:        {}", run.records_fetched);
    println!("Records written:        {}", run.records_written.to_string().green());
    println!("Records failed:         {}", run.records_failed);
    if run.failed_pages > 0 {
        print_warning(&format!("{} page(s) skipped after retries", run.failed_pages));
    }

    if !run.rejections.is_empty() {
        println!();
        println!("{}", "Rejected records".bold());
        println!("{}", "-".repeat(50));
        for rejection in &run.rejections {
            println!(
                "  {} {}",
                rejection.record_id.as_deref().unwrap_or("(no id)").yellow(),
                rejection.reason
            );
        }
    }
    println!();
}

fn print_stats(stats: &SyncStats) {
    println!("{}", "Statistics".bold());
    println!("{}", "-".repeat(50));
    println!("Total syncs:            {}", stats.total_syncs);
    println!("Successful:             {}", stats.successful_syncs.to_string().green());
    println!("Failed:                 {}", stats.failed_syncs.to_string().red());
    println!("Records processed:      {}", stats.total_records_processed);
    println!(
        "Last duration:          {}",
        format_duration_ms(stats.last_sync_duration_ms)
    );
    println!(
        "Average duration:       {}",
        format_duration_ms(stats.average_sync_duration_ms)
    );
}

/// Show the daemon's sync status
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: SyncStatus = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Sync Status".bold());
            println!("{}", "=".repeat(50));
            let state = if status.is_running { "running" } else { "idle" };
            println!("State:                  {}", color_status(state));
            println!(
                "Last successful sync:   {}",
                format_timestamp(status.last_sync_time)
            );
            match status.schedule.cadence() {
                Some(cadence) => println!(
                    "Schedule:               {} {} (next {})",
                    color_status("active"),
                    cadence,
                    format_timestamp(status.schedule.next_run_at)
                ),
                None => println!("Schedule:               {}", color_status("inactive")),
            }
            println!();

            if let Some(run) = &status.current_run {
                println!("{}", "Current run".bold());
                println!(
                    "  {} {} pages, {} written so far",
                    short_id(&run.id).cyan(),
                    run.pages_fetched,
                    run.records_written
                );
                println!();
            }

            if let Some(run) = &status.last_run {
                println!("{}", "Last run".bold());
                print_table(&[RunRow::from(run)], "No runs yet");
                if let Some(err) = &run.last_error {
                    print_error(err);
                }
                println!();
            }

            print_stats(&status.sync_stats);
        }
    }

    Ok(())
}

/// Show detailed statistics, error breakdown and recent runs
pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats: DetailedStats = client.stats().await?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => {
            print_stats(&stats.sync_stats);
            println!();

            println!("{}", "Errors".bold());
            println!("{}", "-".repeat(50));
            println!(
                "Retained: {}   Last hour: {}   Last 24h: {}",
                stats.error_statistics.total_errors,
                stats.error_statistics.last_hour,
                stats.error_statistics.last_24_hours
            );
            let rows: Vec<ErrorCountRow> = stats
                .error_statistics
                .by_type
                .iter()
                .map(|(kind, count)| ErrorCountRow {
                    kind: kind.clone(),
                    count: *count,
                })
                .collect();
            print_table(&rows, "No errors in the last 24 hours");
            println!();

            if !stats.recommendations.is_empty() {
                println!("{}", "Recommendations".bold());
                println!("{}", "-".repeat(50));
                for rec in &stats.recommendations {
                    println!("[{}] {}", color_status(&rec.priority), rec.message);
                    println!("    {}", rec.action.dimmed());
                }
                println!();
            }

            println!("{}", "Recent runs".bold());
            let rows: Vec<RunRow> = stats.recent_runs.iter().map(RunRow::from).collect();
            print_table(&rows, "No runs yet");
        }
    }

    Ok(())
}
