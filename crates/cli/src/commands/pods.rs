//! Live pod inspection, manual resize and model information

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use super::scale::split_workload;
use crate::client::{
    ApiClient, ApiError, ContainerResources, MutationResult, PolicyInfo, ResizeRequest,
    WorkloadDetail,
};
use crate::output::{
    color_status, format_cpu, format_memory, print_error, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// Row for the containers table
#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "CPU Req")]
    cpu_request: String,
    #[tabled(rename = "CPU Limit")]
    cpu_limit: String,
    #[tabled(rename = "Mem Req")]
    memory_request: String,
    #[tabled(rename = "Mem Limit")]
    memory_limit: String,
}

impl From<&ContainerResources> for ContainerRow {
    fn from(c: &ContainerResources) -> Self {
        let or_dash =
            |v: Option<f64>, f: fn(f64) -> String| v.map(f).unwrap_or_else(|| "-".into());
        Self {
            name: c.name.clone(),
            ready: if c.ready { "yes" } else { "no" }.to_string(),
            cpu_request: or_dash(c.cpu_request_cores, format_cpu),
            cpu_limit: or_dash(c.cpu_limit_cores, format_cpu),
            memory_request: or_dash(c.memory_request_mb, format_memory),
            memory_limit: or_dash(c.memory_limit_mb, format_memory),
        }
    }
}

/// Current usage and resources of one pod
pub async fn show_pod(client: &ApiClient, workload: &str, format: OutputFormat) -> Result<()> {
    let (namespace, name) = split_workload(workload)?;
    let detail: WorkloadDetail = client.get(&format!("/pods/{}/{}", namespace, name)).await?;
    if format == OutputFormat::Json {
        return print_json(&detail);
    }

    println!(
        "{} {} ({})",
        "Pod:".bold(),
        detail.workload,
        color_status(&detail.spec.phase)
    );
    match &detail.usage {
        Some(u) => println!(
            "{} cpu {} of {}, memory {} of {}",
            "Usage:".bold(),
            format_cpu(u.cpu_cores),
            format_cpu(u.cpu_limit_cores),
            format_memory(u.memory_mb),
            format_memory(u.memory_limit_mb)
        ),
        None => print_warning("No usage metrics yet"),
    }
    if detail.spec.resize_status != "none" {
        println!("{} {}", "Resize:".bold(), detail.spec.resize_status);
    }
    print_table(
        detail.spec.containers.iter().map(ContainerRow::from).collect(),
        "No containers",
    );
    Ok(())
}

/// Apply explicit limits to a pod
pub async fn resize(
    client: &ApiClient,
    workload: &str,
    request: ResizeRequest,
    format: OutputFormat,
) -> Result<()> {
    let (namespace, name) = split_workload(workload)?;
    let path = format!("/api/namespaces/{}/pods/{}/resize", namespace, name);
    let result = match client.post::<MutationResult, _>(&path, &request).await {
        Ok(result) => result,
        // A failed resize still carries its mutation record
        Err(e) => match failed_mutation(&e) {
            Some(result) => result,
            None => return Err(e),
        },
    };

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table if result.success => {
            print_success(&format!("{} ({})", result.message, result.method));
        }
        OutputFormat::Table => {
            print_error(&format!("{} ({})", result.message, result.method));
            if !result.details.states.is_empty() {
                println!("{} {}", "States:".bold(), result.details.states.join(" → "));
            }
        }
    }
    Ok(())
}

fn failed_mutation(err: &anyhow::Error) -> Option<MutationResult> {
    let api = err.downcast_ref::<ApiError>()?;
    if api.status != 422 {
        return None;
    }
    serde_json::from_str(&api.message).ok()
}

/// Describe the policy making decisions
pub async fn show_model(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let info: PolicyInfo = client.get("/model/info").await?;
    if format == OutputFormat::Json {
        return print_json(&info);
    }

    println!("{} {}", "Policy:".bold(), info.name);
    if let Some(source) = &info.source {
        println!("{} {}", "Source:".bold(), source);
    }
    if let Some(sha256) = &info.sha256 {
        println!("{} {}", "SHA-256:".bold(), sha256);
    }
    println!("{} {:?}", "Input:".bold(), info.input_shape);
    if !info.output_shape.is_empty() {
        println!("{} {:?}", "Output:".bold(), info.output_shape);
    }
    println!("{} {}", "Actions:".bold(), info.actions.join(", "));
    println!("{} {}", "Features:".bold(), info.features.join(", "));
    Ok(())
}
