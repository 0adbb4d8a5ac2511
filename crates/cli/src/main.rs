//! Resource Scaler CLI
//!
//! A command-line tool for controlling the autoscaling loop, tuning its
//! configuration and auditing the decisions it made.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::{ConfigUpdate, ResizeRequest};
use commands::{control, decisions, pods, scale};
use output::OutputFormat;

/// Resource Scaler CLI
#[derive(Parser)]
#[command(name = "scalerctl")]
#[command(author, version, about = "CLI for the Resource Scaler", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via SCALER_API_URL env var)
    #[arg(long, env = "SCALER_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show whether the autoscaling loop is running
    Status,

    /// Enable autoscaling and start the loop
    Start,

    /// Disable autoscaling and stop the loop
    Stop,

    /// View or change the scaling configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Show recent scaling decisions across workloads
    Decisions {
        /// Maximum number of decisions to show
        #[arg(long, short, default_value_t = 50)]
        limit: usize,
    },

    /// Show samples, decisions and mutations for one workload
    History {
        /// Workload (format: namespace/name or just name)
        workload: String,
    },

    /// Show aggregate scaling statistics
    Stats,

    /// Show current usage and resources of a pod
    Pod {
        /// Workload (format: namespace/name or just name)
        workload: String,
    },

    /// Set explicit limits on a pod, bypassing the policy
    Resize {
        /// Workload (format: namespace/name or just name)
        workload: String,

        /// CPU limit (e.g. 500m or 1.5)
        #[arg(long, required_unless_present = "memory")]
        cpu: Option<String>,

        /// Memory limit (e.g. 512Mi or 2Gi)
        #[arg(long)]
        memory: Option<String>,
    },

    /// Describe the scaling policy in use
    Model,

    /// Evaluate a workload now, or every workload with --all
    Scale {
        /// Workload (format: namespace/name or just name)
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        workload: Option<String>,

        /// Run one full cycle over every watched workload
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current configuration
    Get,

    /// Change configuration fields
    Set {
        /// Record decisions without applying them
        #[arg(long)]
        dry_run: Option<bool>,

        /// Seconds between cycles
        #[arg(long)]
        interval: Option<u64>,

        /// Minutes between two applied changes to one workload
        #[arg(long)]
        cooldown: Option<f64>,

        /// Fractional step per INCREASE or DECREASE (e.g. 0.2)
        #[arg(long)]
        scale_factor: Option<f64>,

        /// Whether the loop evaluates workloads
        #[arg(long)]
        enabled: Option<bool>,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config::Config::load()?;
    let format = cli
        .format
        .or_else(|| {
            settings
                .default_format
                .as_deref()
                .and_then(OutputFormat::parse_setting)
        })
        .unwrap_or_default();

    // Initialize client
    let client = client::ApiClient::new(&settings.resolve_api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Status => control::show_status(&client, format).await?,
        Commands::Start => control::start(&client, format).await?,
        Commands::Stop => control::stop(&client, format).await?,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Get => control::get_config(&client, format).await?,
            ConfigCommands::Set {
                dry_run,
                interval,
                cooldown,
                scale_factor,
                enabled,
            } => {
                let update = ConfigUpdate {
                    enabled,
                    interval_secs: interval,
                    dry_run,
                    scale_factor,
                    cooldown_minutes: cooldown,
                };
                control::set_config(&client, update, format).await?;
            }
        },
        Commands::Decisions { limit } => {
            decisions::list_decisions(&client, limit, format).await?
        }
        Commands::History { workload } => {
            decisions::show_history(&client, &workload, format).await?
        }
        Commands::Stats => decisions::show_stats(&client, format).await?,
        Commands::Pod { workload } => pods::show_pod(&client, &workload, format).await?,
        Commands::Resize {
            workload,
            cpu,
            memory,
        } => {
            let request = ResizeRequest { cpu, memory };
            pods::resize(&client, &workload, request, format).await?;
        }
        Commands::Model => pods::show_model(&client, format).await?,
        Commands::Scale { workload, all } => match workload {
            Some(workload) if !all => scale::scale_one(&client, &workload, format).await?,
            _ => scale::scale_all(&client, format).await?,
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
