//! Schedule control commands

use anyhow::Result;

use crate::client::{ApiClient, ScheduleStatus};
use crate::output::{format_timestamp, print_info, print_json, print_success, OutputFormat};

fn report(status: &ScheduleStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(status)?,
        OutputFormat::Table => match status.cadence() {
            Some(cadence) => {
                print_success(&format!("Scheduled sync {}", cadence));
                if status.next_run_at.is_some() {
                    print_info(&format!("Next run at {}", format_timestamp(status.next_run_at)));
                }
            }
            None => print_info("Scheduled sync is stopped"),
        },
    }
    Ok(())
}

/// Start (or restart) the recurring sync
pub async fn start(client: &ApiClient, interval_minutes: Option<u64>, format: OutputFormat) -> Result<()> {
    let status = client.start_schedule(interval_minutes).await?;
    report(&status, format)
}

pub async fn stop(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.stop_schedule().await?;
    report(&status, format)
}
