//! Loop lifecycle and configuration commands

use anyhow::{bail, Result};
use colored::Colorize;
use serde_json::json;

use crate::client::{ApiClient, ConfigUpdate, LoopStatus, ScalerConfig};
use crate::output::{
    color_status, print_info, print_json, print_success, print_warning, OutputFormat,
};

fn print_status(status: &LoopStatus) {
    let running = if status.running { "running" } else { "stopped" };
    println!("{:<12} {}", "Loop:".bold(), color_status(running));
    println!("{:<12} {}", "Enabled:".bold(), status.enabled);
    println!("{:<12} {}s", "Interval:".bold(), status.interval_secs);
    let mode = if status.dry_run {
        "dry run".yellow().to_string()
    } else {
        "live".green().to_string()
    };
    println!("{:<12} {}", "Mode:".bold(), mode);
}

/// Show whether the loop is running and how it is configured
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: LoopStatus = client.get("/autoscale/status").await?;
    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_status(&status),
    }
    Ok(())
}

pub async fn start(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: LoopStatus = client.post("/autoscale/start", &json!({})).await?;
    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_success("Autoscaling started");
            if status.dry_run {
                print_info("Dry run is on; decisions are recorded but not applied");
            }
        }
    }
    Ok(())
}

pub async fn stop(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: LoopStatus = client.post("/autoscale/stop", &json!({})).await?;
    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_success("Autoscaling stopped"),
    }
    Ok(())
}

fn print_config(config: &ScalerConfig) {
    let rows = [
        ("enabled", config.enabled.to_string()),
        ("dry_run", config.dry_run.to_string()),
        ("interval_secs", config.interval_secs.to_string()),
        ("scale_factor", format!("{:.2}", config.scale_factor)),
        ("cooldown_minutes", format!("{:.1}", config.cooldown_minutes)),
        (
            "cpu_cores",
            format!("{} .. {}", config.min_cpu_cores, config.max_cpu_cores),
        ),
        (
            "memory_mb",
            format!("{} .. {}", config.min_memory_mb, config.max_memory_mb),
        ),
        ("namespaces", config.namespaces.join(", ")),
        ("excluded_names", config.excluded_names.join(", ")),
        (
            "excluded_labels",
            config
                .excluded_labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", "),
        ),
    ];
    for (key, value) in rows {
        println!("{:<18} {}", format!("{}:", key).bold(), value);
    }
}

pub async fn get_config(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let config: ScalerConfig = client.get("/config").await?;
    match format {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Table => print_config(&config),
    }
    Ok(())
}

pub async fn set_config(
    client: &ApiClient,
    update: ConfigUpdate,
    format: OutputFormat,
) -> Result<()> {
    if update.is_empty() {
        print_warning("Nothing to change");
        bail!("pass at least one of --dry-run, --interval, --cooldown, --scale-factor, --enabled");
    }

    let config: ScalerConfig = client.post("/config", &update).await?;
    match format {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Table => {
            print_success("Configuration updated");
            print_config(&config);
        }
    }
    Ok(())
}
