use anyhow::Context;
use clap::{Parser, Subcommand};
use liquidity_orchestrator::adapters::{EvmChainClient, FileIntentStore, RpcLedgerClient};
use liquidity_orchestrator::clients::ChainClients;
use liquidity_orchestrator::config::{AppConfig, LoggingConfig};
use liquidity_orchestrator::runtime::{Collaborators, Orchestrator, RuntimeSettings};
use liquidity_orchestrator::signing::Wallet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchestrator", version, about = "Strategy runtime orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator and run until SIGINT/SIGTERM
    Run {
        /// Directory holding default.toml and per-environment overrides
        #[arg(long, default_value = "config", env = "ORCH_CONFIG_DIR")]
        config: PathBuf,
    },
    /// Load and validate configuration, then exit
    CheckConfig {
        #[arg(long, default_value = "config", env = "ORCH_CONFIG_DIR")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            println!(
                "Configuration OK: {} chain(s), {} executor(s), intents at {}",
                config.chains.len(),
                config.executor.workers,
                config.intents.path.display()
            );
        }
        Commands::Run { config } => {
            let config = load_config(&config)?;
            init_logging(&config.logging);
            run(config).await?;
        }
    }

    Ok(())
}

fn load_config(dir: &Path) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_from(dir)
        .with_context(|| format!("failed to load configuration from {}", dir.display()))?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config error: {}", e);
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }
    Ok(config)
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let wallet = Arc::new(Wallet::from_env()?);
    info!(wallet = %wallet.address(), "Loaded signing wallet");

    let ledger = Arc::new(RpcLedgerClient::connect(
        &config.ledger.rpc_url,
        config.ledger.system_account,
        config.ledger.registry_address,
    )?);

    let mut chains = ChainClients::new();
    for chain in &config.chains {
        match EvmChainClient::connect(chain.chain_id, &chain.rpc_url).await {
            Ok(client) => chains.insert(Arc::new(client)),
            Err(e) => error!(chain_id = chain.chain_id, error = %e, "Chain unavailable, continuing without it"),
        }
    }

    let intents = Arc::new(FileIntentStore::load(&config.intents.path)?);
    let owners: Vec<_> = intents
        .intents()
        .into_iter()
        .map(|intent| (intent.owner_address, intent.strategy_address))
        .collect();

    let orchestrator = Orchestrator::new(
        RuntimeSettings::from(&config),
        Collaborators::new(ledger, chains, wallet, intents),
    );
    for (owner, strategy) in owners {
        orchestrator.register_strategy_owner(owner, strategy);
    }

    orchestrator.start().await?;
    if orchestrator.run_until_shutdown().await {
        info!("Orchestrator stopped cleanly");
    } else {
        warn!("Orchestrator stopped with undrained work");
    }
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let log_dir = std::env::var("ORCH_LOG_DIR").unwrap_or_else(|_| "/var/log/orchestrator".to_string());

    // `rolling::daily` panics if it cannot create the first file, so check
    // the directory is writable before building the layer.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".orch_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&test_path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "orchestrator.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // The process runs until shutdown; the guard must outlive it.
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    } else {
        eprintln!("Warning: Could not create log directory {}, file logging disabled", log_dir);
        None
    };

    let (console_text, console_json) = if logging.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        eprintln!("Logging to: {}/orchestrator.log", log_dir);
    }
}
