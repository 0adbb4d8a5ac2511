//! On-demand scaling commands

use anyhow::{bail, Result};
use colored::Colorize;
use serde_json::json;
use tabled::Tabled;

use crate::client::{ApiClient, ScaleAllResponse, ScalingOutcome};
use crate::output::{
    color_action, color_status, print_error, print_info, print_json, print_table, OutputFormat,
};

/// Split `namespace/name`; a bare name means the `default` namespace
pub fn split_workload(workload: &str) -> Result<(&str, &str)> {
    match workload.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns, name))
        }
        None if !workload.is_empty() => Ok(("default", workload)),
        _ => bail!("Invalid workload '{}', expected <namespace>/<name>", workload),
    }
}

/// Row for outcomes table
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "CPU")]
    cpu_action: String,
    #[tabled(rename = "Memory")]
    memory_action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&ScalingOutcome> for OutcomeRow {
    fn from(o: &ScalingOutcome) -> Self {
        Self {
            workload: o.workload.to_string(),
            cpu_action: color_action(&o.decision.cpu_action),
            memory_action: color_action(&o.decision.memory_action),
            status: color_status(&o.status),
            method: o
                .mutation
                .as_ref()
                .map(|m| m.method.clone())
                .unwrap_or_else(|| "-".to_string()),
            message: o.message.clone(),
        }
    }
}

/// Evaluate one workload now
pub async fn scale_one(client: &ApiClient, workload: &str, format: OutputFormat) -> Result<()> {
    let (namespace, name) = split_workload(workload)?;
    let outcome: ScalingOutcome = client
        .post(&format!("/scale/{}/{}", namespace, name), &json!({}))
        .await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => {
            print_table(vec![OutcomeRow::from(&outcome)], "No outcome");
            println!("{} {}", "Reasoning:".bold(), outcome.decision.reasoning);
            let warning = outcome
                .mutation
                .as_ref()
                .and_then(|m| m.details.warning.as_ref());
            if let Some(warning) = warning {
                print_info(warning);
            }
        }
    }
    Ok(())
}

/// Run one full cycle now
pub async fn scale_all(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: ScaleAllResponse = client.post("/scale/all", &json!({})).await?;
    if format == OutputFormat::Json {
        return print_json(&response);
    }

    let report = &response.report;
    print_table(
        report.outcomes.iter().map(OutcomeRow::from).collect(),
        "No workloads evaluated",
    );
    for failure in &report.failures {
        print_error(&format!("{}: {} ({})", failure.workload, failure.message, failure.kind));
    }
    println!(
        "\n{} workloads, {} without metrics, {} failed, {} ms",
        report.workloads,
        report.skipped,
        report.failures.len(),
        report.elapsed_ms
    );
    println!();
    super::decisions::print_stats(&response.statistics);
    Ok(())
}
