//! deposit_relay - Relay service entry point
//!
//! ```text
//! config/<env>.yaml + env ──▶ EvmClient (source) ──▶ EventScanner ─┐
//!                             EvmClient (dest)   ──▶ Relayer ──────┼─▶ Processor
//!                             HealthMonitor x2 ─────────────────────┘
//! ```
//!
//! Usage: `deposit_relay [--env <name> | --env=<name>]` (default `dev`).
//! Ctrl-C stops the loop after the relay attempt in progress.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use deposit_relay::config::AppConfig;
use deposit_relay::relay::{
    EventScanner, EvmClient, HealthMonitor, IdempotencyLedger, LedgerClient, LogAlertSink,
    Processor, RelayConfig, Relayer, StateStore,
};

const DEFAULT_ENV: &str = "dev";

/// Config environment named on the command line (program name excluded)
fn env_from_args(args: impl IntoIterator<Item = String>) -> String {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if let Some(env) = arg.strip_prefix("--env=") {
            return env.to_string();
        }
        if (arg == "--env" || arg == "-e")
            && let Some(env) = args.next()
        {
            return env;
        }
    }
    DEFAULT_ENV.to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    let env = env_from_args(std::env::args().skip(1));
    let app_config = match AppConfig::load(&env).and_then(|c| c.relay.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not up yet
            eprintln!("Invalid configuration for env {:?}: {}", env, e);
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = deposit_relay::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        "Starting deposit relay"
    );

    match run(app_config.relay).await {
        Ok(()) => {
            tracing::info!("Deposit relay stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = ?e, "Deposit relay failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let source = Arc::new(EvmClient::new(
        "source",
        &config.source_rpc_url,
        config.source_contract()?,
    )?);
    let dest = Arc::new(EvmClient::new(
        "destination",
        &config.dest_rpc_url,
        config.dest_contract()?,
    )?);

    for client in [&source, &dest] {
        let height = client
            .current_block_height()
            .await
            .with_context(|| format!("cannot reach {} endpoint {}", client.name(), client.url()))?;
        tracing::info!(
            endpoint = client.name(),
            url = client.url(),
            contract = %client.contract(),
            height,
            "Connected"
        );
    }

    let ledger = match &config.ledger_file {
        Some(path) => IdempotencyLedger::open(path)
            .with_context(|| format!("cannot open ledger journal {}", path.display()))?,
        None => {
            tracing::warn!("No ledger_file configured, relay outcomes are kept in memory only");
            IdempotencyLedger::in_memory()
        }
    };

    let scanner = EventScanner::resume(
        source.clone(),
        StateStore::new(&config.state_file),
        config.scanner_config(),
    )
    .await?;
    let relayer = Relayer::new(dest.clone(), config.relayer_config()?);
    let relayer_address = relayer.signer().address();
    let pending_nonce = dest
        .pending_nonce(relayer_address)
        .await
        .with_context(|| format!("cannot read nonce of relayer {}", relayer_address))?;
    tracing::info!(relayer = %relayer_address, pending_nonce, "Relayer account ready");

    let mut source_health = health_monitor("source", source, &config);
    let mut dest_health = health_monitor("destination", dest, &config);
    source_health.start();
    dest_health.start();

    let mut processor = Processor::new(
        scanner,
        relayer,
        ledger,
        source_health.reader(),
        dest_health.reader(),
        Arc::new(LogAlertSink),
        config.processor_config(),
    );

    let shutdown = CancellationToken::new();
    let loop_token = shutdown.clone();
    let handle = tokio::spawn(async move {
        processor.run(loop_token).await;
        processor
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();

    match handle.await {
        Ok(processor) => tracing::info!(
            relayed = processor.ledger().relayed_count(),
            failed = processor.ledger().failed_count(),
            tracked = processor.scanner().tracked_count(),
            cursor = processor.scanner().cursor(),
            "Processor joined"
        ),
        Err(e) => tracing::error!(error = %e, "Processor task ended abnormally"),
    }

    source_health.stop().await;
    dest_health.stop().await;
    Ok(())
}

/// Periodic `eth_blockNumber` probe
fn health_monitor(
    name: &str,
    client: Arc<EvmClient>,
    config: &RelayConfig,
) -> HealthMonitor<EvmClient> {
    HealthMonitor::new(name, client, config.health_config(), |client| async move {
        client.current_block_height().await?;
        Ok::<_, anyhow::Error>(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_env_from_args() {
        assert_eq!(env_from_args(args(&[])), "dev");
        assert_eq!(env_from_args(args(&["--env", "prod"])), "prod");
        assert_eq!(env_from_args(args(&["-e", "staging"])), "staging");
        assert_eq!(env_from_args(args(&["--env=prod"])), "prod");
        // Dangling flag falls back to the default
        assert_eq!(env_from_args(args(&["--env"])), "dev");
    }
}
