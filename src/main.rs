use datamarket_agent::agent::{preflight, AgentState, LoopSettings, PollLoop, PreflightSettings};
use datamarket_agent::chain::RpcChainClient;
use datamarket_agent::config::{private_key_from_env, Config, ResponderMode};
use datamarket_agent::onchain::EventRegistry;
use datamarket_agent::responder::{FixedResponder, HttpResponder, ResponseDispatcher};
use datamarket_agent::store::StateStore;
use datamarket_agent::submitter::{AgentSigner, TransactionSubmitter, TxPolicy};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config_path = std::env::var("AGENT_CONFIG").unwrap_or_else(|_| "agent.toml".to_string());
    let from_file = Path::new(&config_path).exists();
    let config = if from_file {
        Config::load(Path::new(&config_path))?
    } else {
        Config::from_env()?
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("datamarket-agent v{} starting", env!("CARGO_PKG_VERSION"));
    if from_file {
        info!(path = %config_path, "loaded config file");
    } else {
        info!(path = %config_path, "no config file found, using env-only config");
    }

    // --- Signer ---
    let signer = AgentSigner::from_hex(&private_key_from_env()?)?;
    info!(address = %signer.address(), "agent signer loaded");

    // --- Chain ---
    let chain = Arc::new(RpcChainClient::connect_http(
        &config.chain.rpc_url,
        config.agent.receipt_poll_interval(),
    )?);
    let registry = EventRegistry::data_marketplace()?;
    let node = preflight(
        chain.as_ref(),
        &registry,
        &PreflightSettings::from_config(&config, signer.address())?,
    )
    .await?;
    info!(rpc = %config.chain.rpc_url, chain_id = node.chain_id, head = node.height, "node ready");

    // --- Response collaborator ---
    let dispatcher: Arc<dyn ResponseDispatcher> = match config.responder.mode {
        ResponderMode::Http => {
            info!(url = %config.responder.url, "using HTTP responder");
            Arc::new(HttpResponder::new(
                config.responder.url.clone(),
                Duration::from_secs(config.responder.timeout_secs),
            )?)
        }
        ResponderMode::Fixed => {
            warn!(is_valid = config.responder.fixed_is_valid, "using fixed responder");
            Arc::new(FixedResponder::new(config.responder.fixed_is_valid))
        }
    };

    // --- State ---
    let store = StateStore::new(&config.agent.state_path);
    let persisted = store.load()?;
    let height = node.height;
    let submitter = TransactionSubmitter::new(
        TxPolicy {
            chain_id: config.chain.chain_id,
            gas_price_ceiling_wei: config.agent.gas_price_ceiling_wei,
            gas_limit: config.agent.gas_limit,
            max_send_attempts: config.agent.max_send_attempts,
            receipt_timeout: config.agent.receipt_timeout(),
        },
        signer,
    );
    let state = AgentState::restore(persisted, height, config.agent.lookback_blocks, submitter);
    info!(
        head = height,
        watermark = state.tracker.last_scanned_block(),
        dispatched = state.dispatched.len(),
        "agent state ready"
    );

    let mut poll = PollLoop::new(
        chain,
        dispatcher,
        registry,
        LoopSettings::from_config(&config)?,
        state,
    )?
    .with_store(store);

    poll.run(shutdown_signal()).await;
    info!("datamarket-agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
