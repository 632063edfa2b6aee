//! HomeScout
//!
//! Runs the rental search workflow from the command line, or serves it
//! over HTTP with a reviewer inbox and an SSE event stream.

mod api;
mod cli;

use api::{AppState, SharedState};
use clap::{Parser, Subcommand};
use homescout_core::config::WorkflowConfig;
use homescout_core::state::{CheckpointStore, HomeScoutDb};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone)]
#[command(
    author,
    version,
    about = "HomeScout - rental search, location scoring and room redesign"
)]
struct Args {
    /// Config file (defaults to .homescout/config.json)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run the built-in Ojodu, Lagos search
    Demo,
    /// Run a search from a `{search_criteria, design_style}` payload
    Run {
        /// Inline JSON, or @path to a JSON file
        #[arg(short, long)]
        payload: String,
    },
    /// Continue a checkpointed run
    Resume {
        run_id: String,
    },
    /// List recent runs
    Runs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Check that every agent role has working provider credentials
    Doctor,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homescout=info,homescout_core=info".into()),
        )
        .init();
}

async fn serve(config: WorkflowConfig, port: u16) -> anyhow::Result<()> {
    let db = Arc::new(HomeScoutDb::open()?);

    match CheckpointStore::new(&db).list_suspended() {
        Ok(runs) if !runs.is_empty() => {
            tracing::info!(
                count = runs.len(),
                "Runs waiting on review; POST /api/v1/runs/:id/resume to continue them"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to list suspended runs: {}", e),
    }

    let state: SharedState = Arc::new(AppState::new(config, db));
    let app = api::router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("🏠 HomeScout Server running at http://{}", addr);
    println!("   Runs:    /api/v1/runs (POST to start), /api/v1/runs/:id");
    println!("   Inbox:   /api/v1/inbox, /api/v1/inbox/:id/reply");
    println!("   Events:  /api/v1/events (SSE)");
    println!("   OpenAPI: /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn list_runs(limit: usize) -> anyhow::Result<()> {
    let db = HomeScoutDb::open()?;
    let runs = CheckpointStore::new(&db).list_recent(limit)?;
    if runs.is_empty() {
        println!("No runs yet");
    }
    for run in runs {
        println!(
            "{}  {:<10} {:<15} {}",
            run.run_id,
            run.status.as_str(),
            run.stage.as_str(),
            run.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

fn doctor(config: &WorkflowConfig) -> anyhow::Result<()> {
    let mut missing = 0;
    for (role, result) in config.check_credentials() {
        let model = config.model_for(role);
        match result {
            Ok(()) => println!("✅ {:<20} {:?} {}", role.as_str(), model.provider, model.model),
            Err(e) => {
                missing += 1;
                println!("❌ {:<20} {}", role.as_str(), e);
            }
        }
    }
    if missing > 0 {
        anyhow::bail!("{} agent role(s) cannot reach their provider", missing);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_path(homescout_core::state::io::get_runtime_path().join(".env"));
    init_tracing();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(WorkflowConfig::default_path);
    let config = WorkflowConfig::load(&config_path).await;

    match args.command {
        None => serve(config, 8080).await,
        Some(CliCommand::Serve { port }) => serve(config, port).await,
        Some(CliCommand::Demo) => cli::run_local(config, Some(cli::demo_payload()), None).await,
        Some(CliCommand::Run { payload }) => {
            let payload = cli::load_payload(&payload).await?;
            cli::run_local(config, Some(payload), None).await
        }
        Some(CliCommand::Resume { run_id }) => cli::run_local(config, None, Some(run_id)).await,
        Some(CliCommand::Runs { limit }) => list_runs(limit),
        Some(CliCommand::Doctor) => doctor(&config),
    }
}
