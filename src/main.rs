use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dotenv::dotenv;
use tracing::{error, info};

use provision_panel::cli::{self, confirm_terminate, run_dashboard};
use provision_panel::core::error::Visibility;
use provision_panel::monitoring::{init_telemetry, LogLevel, TelemetryConfig};
use provision_panel::track_performance;
use provision_panel::{CreateForm, Panel, PanelConfig};

#[derive(Parser)]
#[command(author, version, about = "Operator console for an environment provisioning API", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "PANEL_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the provisioning API
    #[arg(long, global = true, env = "PANEL_API_BASE")]
    api_base: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "PANEL_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show free CPU and memory on the host
    Resources,
    /// List all environments
    List,
    /// Show the status of one environment
    Status {
        /// Namespace of the environment
        namespace: String,
    },
    /// Create a new environment
    Create {
        /// Namespace of the environment
        namespace: String,
        /// CPU cores to request
        #[arg(long)]
        cpu: Option<f64>,
        /// Memory to request, in MB
        #[arg(long)]
        memory: Option<u64>,
        /// IO weight
        #[arg(long)]
        io: Option<u32>,
        /// Command to run on creation; defaults to the demo script
        #[arg(long)]
        command: Option<String>,
    },
    /// Launch a command inside an environment
    Execute {
        /// Namespace of the environment
        namespace: String,
        /// Shell command to run
        command: String,
    },
    /// Print the captured output of an environment
    Output {
        /// Namespace of the environment
        namespace: String,
        /// Also write the output to <namespace>-output.log
        #[arg(long)]
        save: bool,
    },
    /// Terminate an environment
    Terminate {
        /// Namespace of the environment
        namespace: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Live dashboard driven by stdin control lines
    Dashboard {
        /// Namespace to watch from the start
        #[arg(long)]
        watch: Option<String>,
        /// Start with environment auto-refresh on
        #[arg(long)]
        auto_refresh: bool,
    },
    /// Write the effective configuration to the config path
    InitConfig,
}

fn load_config(cli: &Cli) -> Result<(PanelConfig, PathBuf)> {
    let path = cli.config.clone().unwrap_or_else(PanelConfig::default_path);
    let mut config = PanelConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    Ok((config, path))
}

async fn dispatch(command: Commands, config: PanelConfig, path: PathBuf) -> Result<bool> {
    let command = match command {
        Commands::InitConfig => {
            config.save(&path)?;
            println!("Configuration written to {}", style(path.display()).bold());
            return Ok(true);
        }
        other => other,
    };

    let panel = Panel::connect(config).context("Failed to set up the API client")?;
    let command = match command {
        Commands::Dashboard { watch, auto_refresh } => {
            run_dashboard(&panel, watch, auto_refresh).await?;
            return Ok(true);
        }
        other => other,
    };

    let mut rx = panel.subscribe();
    let ok = match command {
        Commands::Resources => {
            track_performance!("resources");
            panel.bind().await.is_ok()
        }
        Commands::List => {
            track_performance!("list_environments");
            panel.refresh_environments(Visibility::Surfaced).await.is_ok()
        }
        Commands::Status { namespace } => {
            track_performance!("status");
            panel.status(&namespace).await.is_ok()
        }
        Commands::Create {
            namespace,
            cpu,
            memory,
            io,
            command,
        } => {
            track_performance!("create_environment");
            // Bounds come from the host before the request is clamped.
            let _ = panel.bind().await;
            let form = CreateForm {
                namespace,
                cpu,
                memory,
                io,
                command: command.unwrap_or_else(|| Panel::demo_command().to_string()),
            };
            panel.create(form).await.is_ok()
        }
        Commands::Execute { namespace, command } => {
            track_performance!("execute");
            match panel.execute(&namespace, &command).await {
                Ok(unit) => {
                    println!("unit: {}", unit);
                    true
                }
                Err(_) => false,
            }
        }
        Commands::Output { namespace, save } => match panel.output(&namespace).await {
            Ok(text) => {
                println!("{}", text);
                if save {
                    let file = cli::output_file_name(&namespace);
                    std::fs::write(&file, &text)
                        .with_context(|| format!("Failed to write {}", file))?;
                    info!(file = %file, "output saved");
                }
                true
            }
            Err(_) => false,
        },
        Commands::Terminate { namespace, yes } => {
            if !yes && !confirm_terminate(&namespace)? {
                println!("Cancelled.");
                return Ok(true);
            }
            panel.terminate(&namespace).await.is_ok()
        }
        Commands::Dashboard { .. } | Commands::InitConfig => true,
    };

    cli::flush_events(&mut rx);
    Ok(ok)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let cli = Cli::parse();
    let (config, path) = load_config(&cli)?;

    let log_level: LogLevel = config.log_level.parse()?;
    init_telemetry(&TelemetryConfig {
        log_level,
        ..TelemetryConfig::default()
    })?;
    info!(api_base = %config.api_base, "provision panel starting");

    match dispatch(cli.command, config, path).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(error = %e, "command failed");
            Err(e)
        }
    }
}
