//! Decision audit commands

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, Decision, ScalingStats, WorkloadHistory};
use crate::output::{
    color_action, color_confidence, color_status, format_change, format_cpu, format_memory,
    format_timestamp, print_json, print_table, OutputFormat,
};

/// Row for decisions table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "CPU")]
    cpu_action: String,
    #[tabled(rename = "CPU Limit")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory_action: String,
    #[tabled(rename = "Mem Limit")]
    memory: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Eligible")]
    eligible: String,
}

impl From<&Decision> for DecisionRow {
    fn from(d: &Decision) -> Self {
        let cpu = &d.proposed_changes.cpu;
        let memory = &d.proposed_changes.memory;
        Self {
            time: format_timestamp(&d.timestamp),
            workload: d.workload.to_string(),
            cpu_action: color_action(&d.cpu_action),
            cpu: format!(
                "{} → {} ({})",
                format_cpu(cpu.current),
                format_cpu(cpu.proposed),
                format_change(cpu.change_percent)
            ),
            memory_action: color_action(&d.memory_action),
            memory: format!(
                "{} → {} ({})",
                format_memory(memory.current),
                format_memory(memory.proposed),
                format_change(memory.change_percent)
            ),
            confidence: color_confidence(d.confidence.cpu.min(d.confidence.memory)),
            eligible: if d.eligible_to_apply { "yes" } else { "no" }.to_string(),
        }
    }
}

/// Row for mutation results
#[derive(Tabled)]
struct MutationRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "States")]
    states: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Recent decisions across every workload
pub async fn list_decisions(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let decisions: Vec<Decision> = client.get(&format!("/decisions?limit={}", limit)).await?;
    match format {
        OutputFormat::Json => print_json(&decisions)?,
        OutputFormat::Table => {
            print_table(
                decisions.iter().map(DecisionRow::from).collect(),
                "No decisions recorded yet",
            );
        }
    }
    Ok(())
}

/// Samples, decisions and mutations kept for one workload
pub async fn show_history(client: &ApiClient, workload: &str, format: OutputFormat) -> Result<()> {
    let (namespace, name) = super::scale::split_workload(workload)?;
    let history: WorkloadHistory = client
        .get(&format!("/workloads/{}/{}/history", namespace, name))
        .await
        .with_context(|| format!("Failed to fetch history for {}/{}", namespace, name))?;

    if format == OutputFormat::Json {
        return print_json(&history);
    }

    println!("{} {}\n", "History for".bold(), history.workload.to_string().cyan());

    println!("{}", "Samples".bold());
    for s in &history.samples {
        println!(
            "  {}  cpu {} / {}  memory {} / {}",
            format_timestamp(&s.timestamp),
            format_cpu(s.cpu_cores),
            format_cpu(s.cpu_limit_cores),
            format_memory(s.memory_mb),
            format_memory(s.memory_limit_mb),
        );
    }

    println!("\n{}", "Decisions".bold());
    print_table(
        history.decisions.iter().map(DecisionRow::from).collect(),
        "No decisions recorded",
    );
    if let Some(latest) = history.decisions.last() {
        println!("Latest reasoning: {}", latest.reasoning);
    }

    println!("\n{}", "Mutations".bold());
    let rows: Vec<MutationRow> = history
        .mutations
        .iter()
        .map(|m| MutationRow {
            time: format_timestamp(&m.timestamp),
            method: m.method.clone(),
            result: color_status(if m.success { "success" } else { "failed" }),
            states: m.details.states.join(" → "),
            message: match &m.details.warning {
                Some(w) => format!("{} ({})", m.message, w),
                None => m.message.clone(),
            },
        })
        .collect();
    print_table(rows, "No mutations attempted");

    Ok(())
}

pub fn print_stats(stats: &ScalingStats) {
    println!("{:<22} {}", "Workloads tracked:".bold(), stats.workloads_tracked);
    println!("{:<22} {}", "Decisions:".bold(), stats.total_decisions);
    println!(
        "{:<22} {}",
        "Mutations succeeded:".bold(),
        stats.mutations_succeeded.to_string().green()
    );
    println!("{:<22} {}", "Mutations failed:".bold(), stats.mutations_failed.to_string().red());

    if !stats.outcomes.is_empty() {
        println!("\n{}", "Outcomes".bold());
        for (status, count) in &stats.outcomes {
            println!("  {:<20} {}", color_status(status), count);
        }
    }
    if !stats.mutations_by_method.is_empty() {
        println!("\n{}", "Mutations by method".bold());
        for (method, count) in &stats.mutations_by_method {
            println!("  {:<20} {}", method, count);
        }
    }
}

pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats: ScalingStats = client.get("/statistics").await?;
    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => print_stats(&stats),
    }
    Ok(())
}
