//! Vigil - local content filtering driven by plain-language family rules.
//!
//! `vigil serve` runs the interception server (enforcement side). The other
//! subcommands act as the controller: they edit rules and read events through
//! the same shared storage the server polls.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_app::{commands, AppConfig};
use vigil_core::inference::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use vigil_core::InferenceClient;
use vigil_proxy::{InterceptionServer, ProxyState, RuleWatcher, DEFAULT_PORT};

/// Vigil - local content filtering driven by plain-language family rules
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Args {
    /// Interception server port
    #[arg(long, global = true, env = "VIGIL_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Model used for classification
    #[arg(long, global = true, env = "VIGIL_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the inference endpoint
    #[arg(long, global = true, env = "VIGIL_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Shared storage directory (defaults to the platform data directory)
    #[arg(long, global = true, env = "VIGIL_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the interception server
    Serve {
        /// Skip the inference endpoint and enforce with local rules only
        #[arg(long)]
        rules_only: bool,
    },
    /// Manage filtering rules
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
    /// Show recent filter events
    Events {
        /// Maximum number of events to show
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Delete the event log instead of showing it
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List every rule
    List,
    /// Add a rule from a plain-language description
    Add {
        /// e.g. "no violent video games"
        text: String,
    },
    /// Flip a rule between active and inactive
    Toggle {
        /// Rule id
        id: String,
    },
    /// Delete a rule
    Remove {
        /// Rule id
        id: String,
    },
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "vigil", "vigil").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging with file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vigil={},warn", log_level)));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("vigil")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::debug!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

async fn serve(config: &AppConfig, rules_only: bool) -> anyhow::Result<()> {
    let storage = config
        .open_storage()
        .context("Failed to open shared storage")?;

    let inference = if rules_only {
        tracing::info!("Running rules-only, inference disabled");
        None
    } else {
        let client = InferenceClient::new(config.inference.clone())?;
        if !client.is_available().await {
            tracing::warn!(
                endpoint = %config.inference.endpoint,
                "Inference endpoint unreachable, classification will fail until it is up"
            );
        }
        Some(client)
    };

    let state = ProxyState::new(config.proxy_config(), storage, inference)?;

    let watcher = Arc::new(RuleWatcher::for_state(&state));
    watcher.load_initial();
    tokio::spawn(watcher.start_polling());

    let server = InterceptionServer::bind(state).context("Failed to start interception server")?;
    tracing::info!(
        addr = %server.local_addr()?,
        active_rules = server.state().active_rules().len(),
        "Vigil is filtering"
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AppConfig::new(
        args.port,
        args.endpoint.as_str(),
        args.model.as_str(),
        args.storage_dir.clone(),
    )
    .context("Invalid configuration")?;

    if let Command::Serve { rules_only } = args.command {
        return serve(&config, rules_only).await;
    }

    let storage = config
        .open_storage()
        .context("Failed to open shared storage")?;
    let mut out = io::stdout().lock();

    match args.command {
        Command::Serve { .. } => Ok(()),
        Command::Rules { action } => match action {
            RulesCommand::List => commands::list_rules(&storage, &mut out),
            RulesCommand::Add { text } => {
                let client = InferenceClient::new(config.inference.clone())?;
                commands::add_rule(&storage, &client, &text, &mut out).await
            }
            RulesCommand::Toggle { id } => commands::toggle_rule(&storage, &id, &mut out),
            RulesCommand::Remove { id } => commands::remove_rule(&storage, &id, &mut out),
        },
        Command::Events { clear: true, .. } => commands::clear_events(&storage, &mut out),
        Command::Events { limit, .. } => commands::show_events(&storage, limit, &mut out),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive for the duration of the program
    let _log_guard = init_logging(&args);

    tracing::debug!("Args: {:?}", args);
    run(args).await
}
