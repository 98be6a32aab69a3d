use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use node_alerts::commands::{self, SubscribeOutcome};
use node_alerts::config::{Config, Settings};
use node_alerts::cycle::CycleOutcome;
use node_alerts::scheduler::{parse_schedule, Scheduler};
use node_alerts::{discord, App};

#[derive(Parser, Debug)]
#[command(name = "node_alerts")]
#[command(about = "Node health alerts over Discord DMs", long_about = None)]
struct Args {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (default: ~/.node-alerts/config.toml)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run cycles on the configured schedule until Ctrl-C (default)
    Run,
    /// Run a single cycle and print its outcome as JSON
    Once,
    /// Subscribe a Discord user to a node
    Subscribe { user_id: String, node_id: String },
    /// Remove a subscription
    Unsubscribe { user_id: String, node_id: String },
    /// Show subscriptions and their alert state, optionally for one user
    Info { user_id: Option<String> },
}

fn main() {
    let args = Args::parse();
    let verbosity = args.verbose.min(3);

    Config::ensure_base_directory().ok();
    node_alerts::init_tracing(verbosity, Some(Config::log_file_path()));

    if let Err(e) = run(args) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let command = args.command.unwrap_or(Command::Run);
    let config_path = args.config.unwrap_or_else(Config::config_file_path);
    let settings = Settings::load(&config_path)?;
    info!("node-alerts {} (config {:?})", Config::version(), config_path);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let app = App::new(settings)?;

    runtime.block_on(async move {
        match command {
            Command::Run => serve(&app).await,
            Command::Once => {
                let runner = app.runner(discord::notifier_from_env(), CancellationToken::new())?;
                let outcome = runner.run_cycle().await;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                if let CycleOutcome::Failed { error, .. } = outcome {
                    anyhow::bail!("cycle failed: {}", error);
                }
                Ok(())
            }
            Command::Subscribe { user_id, node_id } => {
                let outcome =
                    commands::subscribe(&app.store, app.prometheus.as_ref(), &user_id, &node_id)
                        .await?;
                match &outcome {
                    SubscribeOutcome::Created { node_type } => {
                        println!("Subscribed {} to {} ({})", user_id, node_id, node_type)
                    }
                    SubscribeOutcome::AlreadySubscribed => {
                        println!("{} is already subscribed to {}", user_id, node_id)
                    }
                    SubscribeOutcome::UnknownNode => {
                        anyhow::bail!("node {} is not reporting metrics", node_id)
                    }
                }
                Ok(())
            }
            Command::Unsubscribe { user_id, node_id } => {
                if commands::unsubscribe(&app.store, &user_id, &node_id).await? {
                    println!("Unsubscribed {} from {}", user_id, node_id);
                } else {
                    println!("{} was not subscribed to {}", user_id, node_id);
                }
                Ok(())
            }
            Command::Info { user_id } => {
                let rows = commands::info(&app.store, user_id.as_deref()).await?;
                println!("{}", serde_json::to_string_pretty(&rows)?);
                Ok(())
            }
        }
    })
}

async fn serve(app: &App) -> Result<()> {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(130);
        }
        warn!("Shutdown requested, finishing in-flight work (Ctrl-C again to force)");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let schedule = parse_schedule(&app.settings.schedule)?;
    let runner = Arc::new(app.runner(discord::notifier_from_env(), cancel.clone())?);
    Scheduler::new(schedule, runner, cancel).run().await;
    Ok(())
}
