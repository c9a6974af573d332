mod config;
mod console;
mod deploy;
mod error;
mod generator;
mod ipam;
mod lab;
mod models;
mod orchestrator;
mod report;
mod status;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use console::TcpConnector;
use generator::ConfigGenerator;
use lab::{LabClient, Provisioner};
use models::LabPlan;
use orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the lab, configure every device and run reachability probes
    Run {
        /// Lab plan (JSON); the built-in reference lab when omitted
        #[arg(short, long)]
        plan: Option<PathBuf>,

        /// Print the run result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Print the generated command sequences without contacting the lab
    Render {
        #[arg(short, long)]
        plan: Option<PathBuf>,

        /// Only this device
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Check the lab server and list its templates
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vlan_lab=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let cfg = Config::load();

    match args.command {
        Command::Run { plan, json } => run(cfg, plan.as_deref(), json).await,
        Command::Render { plan, device } => render(plan.as_deref(), device.as_deref()),
        Command::Check => check(&cfg).await,
    }
}

fn load_plan(path: Option<&Path>) -> anyhow::Result<LabPlan> {
    match path {
        Some(path) => LabPlan::load(path),
        None => {
            let plan = LabPlan::reference_lab();
            plan.validate()?;
            Ok(plan)
        }
    }
}

async fn run(cfg: Config, plan: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let plan = load_plan(plan)?;
    tracing::info!("Lab server: {}", cfg.server_url);
    tracing::info!(
        "Plan '{}': {} nodes, {} links, {} VLANs",
        plan.topology.name,
        plan.topology.nodes.len(),
        plan.links.len(),
        plan.vlans.len()
    );

    let client = LabClient::new(&cfg.server_url, cfg.api_timeout)?;
    let orchestrator = Orchestrator::new(Arc::new(client), Arc::new(TcpConnector), cfg, plan);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::warn!("Interrupted, cancelling run");
            cancel.cancel();
        });
    }

    let result = orchestrator.run(&cancel).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", report::render_summary(&result));
    }

    if result.is_aborted() {
        anyhow::bail!("run {} aborted", result.run_id);
    }
    Ok(())
}

fn render(plan: Option<&Path>, device: Option<&str>) -> anyhow::Result<()> {
    let plan = load_plan(plan)?;
    if let Some(name) = device {
        if plan.topology.node(name).is_none() {
            anyhow::bail!("no device named '{}' in plan '{}'", name, plan.topology.name);
        }
    }

    let mut failed = 0;
    for (node, generated) in ConfigGenerator::new(&plan).generate_all() {
        if device.map_or(false, |name| name != node.name) {
            continue;
        }
        match generated {
            Ok(config) => {
                println!("! {} ({})", config.device(), config.role());
                for line in config.commands() {
                    println!("{}", line);
                }
                println!();
            }
            Err(e) => {
                failed += 1;
                eprintln!("! {}: {}", node.name, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} device(s) could not be rendered", failed);
    }
    Ok(())
}

async fn check(cfg: &Config) -> anyhow::Result<()> {
    let client = LabClient::new(&cfg.server_url, cfg.api_timeout)?;
    let provisioner = Provisioner::new(Arc::new(client), &cfg.server_host());

    let version = provisioner.server_version().await?;
    let scope = if version.local { "local" } else { "remote" };
    println!("Lab server {} version {} ({})", cfg.server_url, version.version, scope);

    let templates = provisioner.list_templates().await?;
    println!("{} templates:", templates.len());
    for t in templates {
        println!("  {:<32} {:<10} {}", t.name, t.template_type, t.template_id);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
