//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn parse_setting(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value, true).ok()
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a rounded table, or a warning when there are no rows
pub fn print_table<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format cores as millicores below one core
pub fn format_cpu(cores: f64) -> String {
    if cores >= 1.0 {
        format!("{:.2}", cores)
    } else {
        format!("{:.0}m", cores * 1000.0)
    }
}

/// Format MiB, switching to GiB at 1024
pub fn format_memory(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2}Gi", mb / 1024.0)
    } else {
        format!("{:.0}Mi", mb)
    }
}

/// Format a signed percentage change
pub fn format_change(percent: f64) -> String {
    if percent.abs() < 0.05 {
        "0%".to_string()
    } else {
        format!("{:+.1}%", percent)
    }
}

/// Format confidence as percentage
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// Shorten an RFC 3339 timestamp to `YYYY-MM-DD HH:MM:SS`
pub fn format_timestamp(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "applied" | "healthy" | "running" | "success" => status.green().to_string(),
        "dry_run" | "cooldown" | "degraded" | "skipped_in_flight" => status.yellow().to_string(),
        "no_action_needed" | "stopped" => status.dimmed().to_string(),
        "failed" | "failure" | "unhealthy" | "error" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color a scaling action
pub fn color_action(action: &str) -> String {
    match action {
        "INCREASE" => action.green().to_string(),
        "DECREASE" => action.blue().to_string(),
        _ => action.dimmed().to_string(),
    }
}

/// Color confidence based on value
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format_confidence(confidence);
    if confidence >= 0.8 {
        formatted.green().to_string()
    } else if confidence >= 0.6 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cpu() {
        assert_eq!(format_cpu(0.25), "250m");
        assert_eq!(format_cpu(1.5), "1.50");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512.0), "512Mi");
        assert_eq!(format_memory(2048.0), "2.00Gi");
    }

    #[test]
    fn test_format_change() {
        assert_eq!(format_change(20.0), "+20.0%");
        assert_eq!(format_change(-16.7), "-16.7%");
        assert_eq!(format_change(0.0), "0%");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(
            format_timestamp("2024-03-01T12:30:45.123Z"),
            "2024-03-01 12:30:45"
        );
        assert_eq!(format_timestamp("garbage"), "garbage");
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(OutputFormat::parse_setting("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse_setting("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::parse_setting("yaml"), None);
    }
}
