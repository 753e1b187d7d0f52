use std::sync::Arc;

use bridge_relay::api;
use bridge_relay::checkpoint;
use bridge_relay::chain::EvmConnector;
use bridge_relay::clock::TokioSleeper;
use bridge_relay::config::{Config, ContractInfo};
use bridge_relay::relay::Relayer;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // Initialize logging
    init_logging();

    tracing::info!("Starting Bridge Relay");

    // Load configuration
    let config = Config::load()?;
    let info = ContractInfo::load(&config.contract_info_path)?;
    let setup = config.relay_setup(&info)?;
    tracing::info!(
        source_chain_id = setup.source.chain_id,
        destination_chain_id = setup.destination.chain_id,
        source_contract = %setup.source.contract,
        destination_contract = %setup.destination.contract,
        checkpoint_path = %config.checkpoint_path.display(),
        dry_run = setup.relay.dry_run,
        "Configuration loaded"
    );

    let connector = EvmConnector::new(config.rpc_timeout());
    let store = checkpoint::open_store(config.checkpoint_path.clone(), setup.relay.dry_run).await?;
    let mut relayer = Relayer::start(connector, setup, store, Arc::new(TokioSleeper)).await?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Setup signal handler
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    // Start metrics/API server
    if config.api_bind_address.is_empty() {
        tracing::info!("API server disabled");
    } else {
        let bind_address = config.api_bind_address.clone();
        let stats = relayer.stats();
        let metrics = relayer.metrics();
        tokio::spawn(async move {
            if let Err(e) = api::start_api_server(&bind_address, stats, metrics).await {
                tracing::error!(error = %e, "API server error");
            }
        });
    }

    let stats = relayer.run(shutdown_rx).await?;

    tracing::info!(
        cycles = stats.cycles,
        relayed = stats.relayed,
        failed = stats.failed,
        source_checkpoint = stats.source_checkpoint,
        destination_checkpoint = stats.destination_checkpoint,
        "Bridge Relay stopped"
    );
    Ok(())
}

/// Initialize tracing/logging with structured output
///
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_relay=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
