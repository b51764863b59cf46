//! Cleanup and connectivity commands

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, ConnectionCheck};
use crate::output::{color_status, format_timestamp, print_error, print_json, print_success, OutputFormat};

/// Delete records older than the retention window
pub async fn cleanup(client: &ApiClient, days: Option<u32>, format: OutputFormat) -> Result<()> {
    let report = client.cleanup(days).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_success(&format!(
            "Deleted {} record(s) older than {} day(s) (before {})",
            report.deleted_count,
            report.days_to_keep,
            format_timestamp(Some(report.cutoff))
        )),
    }

    Ok(())
}

fn print_check(name: &str, check: &ConnectionCheck) {
    let state = if check.ok { "ok" } else { "failed" };
    println!(
        "{:<8} {:<8} {}",
        name.bold(),
        color_status(state),
        format!("{}ms", check.latency_ms).dimmed()
    );
    if let Some(err) = &check.error {
        println!("         {} ({}): {}", err.kind, err.category, err.message);
    }
}

/// Probe the source API and the store through the daemon
pub async fn test_connections(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.test_connections().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_check("source", &report.source);
            print_check("store", &report.store);
            println!();
            if report.source.ok && report.store.ok {
                print_success("All connections healthy");
            } else {
                print_error("One or more connections failed");
            }
        }
    }

    if !(report.source.ok && report.store.ok) {
        anyhow::bail!("connection test failed");
    }
    Ok(())
}
