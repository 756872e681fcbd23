mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use config::Config;
use trellis_core::store::Store;

#[derive(Parser)]
#[command(
    name = "trellis",
    about = "Event-sourced work tracking — actions, references, and derived status",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./trellis.yaml if present)
    #[arg(long, global = true, env = "TRELLIS_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides config)
    #[arg(long, global = true, env = "TRELLIS_DB")]
    db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Rebuild the snapshot tables by replaying the event log
    Rebuild,

    /// Show one action with its snapshots and event history
    Show { id: Uuid },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let db = cli.db.unwrap_or_else(|| config.db.clone());

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(trellis_server::serve(&db, port))
        }
        Commands::Rebuild => {
            let store = Store::open(&db)?;
            let report = store.rebuild_snapshots()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "rebuilt snapshots for {} action(s) from {} event(s)",
                    report.actions, report.events
                );
            }
            Ok(())
        }
        Commands::Show { id } => {
            let store = Store::open(&db)?;
            let action = store.get_action(id)?;
            let references = store.get_references(id)?;
            let node = store.get_workflow(id)?;
            let events = store.events_for_action(id)?;

            if cli.json {
                let out = serde_json::json!({
                    "action": action,
                    "references": references,
                    "status": node,
                    "events": events,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!(
                    "action {} ({} on {} {})",
                    action.id, action.kind, action.context_type, action.context_id
                );
                println!("status: {}", node.status);
                if let Some(reason) = &node.blocked_reason {
                    println!("blocked: {reason}");
                }
                println!("references: {}", references.len());
                for r in &references {
                    println!("  {} -> {}", r.source_record_id, r.target_field_key);
                }
                println!("events: {}", events.len());
                for e in &events {
                    println!("  [{}] {}", e.seq, e.body.kind());
                }
            }
            Ok(())
        }
    }
}
