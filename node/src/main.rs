// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # dstream Settlement Node
//!
//! Entry point for the `dstream-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the wallet RPC, session codec
//! and escrow store, and serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     start the API and metrics listeners
//! - `secret`  print a fresh session secret
//! - `probe`   one-shot wallet capability probe
//! - `version` print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::RngCore;
use tokio::signal;

use dstream_escrow::{EscrowCoordinator, EscrowStore};
use dstream_protocol::clock::{SharedClock, SystemClock};
use dstream_protocol::wallet::{
    all_profile_methods, evaluate_profiles, HttpTransport, HttpTransportConfig, MemoryWallet,
    ProbeMode, RpcTransport, WalletRpcClient,
};
use dstream_protocol::{Authenticator, SessionCodec};

use cli::{Commands, DstreamNodeCli, WalletArgs};
use logging::LogFormat;
use metrics::{MeteredTransport, NodeMetrics};

/// Origin value selecting the in-process dev wallet.
const MEMORY_WALLET_ORIGIN: &str = "memory:";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DstreamNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Secret => {
            print_secret();
            Ok(())
        }
        Commands::Probe(args) => probe_wallet(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the settlement service: API server plus metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        account_index = args.wallet.account_index,
        confirmations_required = args.wallet.confirmations_required,
        "starting dstream-node"
    );

    let clock: SharedClock = Arc::new(SystemClock);

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Session codec ---
    let codec = match args.session_secret.as_deref().map(str::trim) {
        Some(secret) if !secret.is_empty() => {
            SessionCodec::from_secret(secret).context("invalid session secret")?
        }
        _ if args.production => {
            bail!("DSTREAM_XMR_SESSION_SECRET is required in production");
        }
        _ => {
            tracing::warn!(
                "no session secret configured; using a random one, tokens will not survive a restart"
            );
            SessionCodec::from_secret(&random_secret()).context("failed to derive session key")?
        }
    };
    tracing::info!(public_key = %codec.public_key_hex(), "session signing key ready");

    // --- Wallet RPC ---
    let wallet = build_wallet(&args.wallet, clock.clone(), Some(Arc::clone(&node_metrics)))?;

    // --- Escrow ---
    let escrow_store = Arc::new(
        EscrowStore::new(clock.clone(), Duration::from_secs(args.escrow_session_ttl_sec))
            .observe_size({
                let metrics = Arc::clone(&node_metrics);
                move |count| metrics.set_escrow_sessions(count)
            }),
    );
    tracing::info!(ttl_secs = escrow_store.ttl().as_secs(), "escrow store ready");
    let escrow = EscrowCoordinator::new(escrow_store, wallet.clone());

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        settings: Arc::new(api::XmrSettings {
            account_index: args.wallet.account_index,
            confirmations_required: args.wallet.confirmations_required,
            slash_min_age_secs: args.slash_min_age_sec,
            refund: args.refund.to_policy(),
            public_origin: args.public_origin.clone(),
        }),
        authenticator: Authenticator::new(clock.clone()),
        codec: Arc::new(codec),
        wallet,
        clock,
        escrow,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.bind, args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("dstream-node stopped");
    Ok(())
}

/// Builds the wallet client from CLI settings. `None` when no origin is
/// configured.
fn build_wallet(
    args: &WalletArgs,
    clock: SharedClock,
    metrics: Option<Arc<NodeMetrics>>,
) -> Result<Option<WalletRpcClient>> {
    let Some(origin) = args
        .wallet_rpc_origin
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty())
    else {
        tracing::warn!("no wallet rpc origin configured; xmr endpoints will answer 404");
        return Ok(None);
    };

    let transport: Arc<dyn RpcTransport> = if origin.eq_ignore_ascii_case(MEMORY_WALLET_ORIGIN) {
        tracing::warn!("using the in-memory dev wallet; nothing here is real money");
        Arc::new(MemoryWallet::new(clock))
    } else {
        let config = HttpTransportConfig {
            origin: origin.to_string(),
            username: args.wallet_rpc_user.clone(),
            password: args.wallet_rpc_pass.clone(),
            timeout: Duration::from_millis(args.wallet_rpc_timeout_ms.max(1)),
        };
        tracing::info!(?config, "wallet rpc configured");
        Arc::new(HttpTransport::new(config).context("failed to build wallet rpc transport")?)
    };

    let transport = match metrics {
        Some(metrics) => Arc::new(MeteredTransport::new(transport, metrics)) as Arc<dyn RpcTransport>,
        None => transport,
    };
    Ok(Some(WalletRpcClient::new(transport)))
}

/// One-shot capability probe, printed as JSON on stdout.
async fn probe_wallet(args: cli::ProbeArgs) -> Result<()> {
    logging::init_logging("dstream_node=warn,dstream_protocol=warn", LogFormat::Pretty);

    let wallet = build_wallet(&args.wallet, Arc::new(SystemClock), None)?
        .context("no wallet rpc origin configured (set DSTREAM_XMR_WALLET_RPC_ORIGIN)")?;
    let mode = ProbeMode::from_str_lossy(&args.mode);

    let version = wallet
        .get_version()
        .await
        .context("wallet rpc did not answer get_version")?;
    let probes = wallet.probe_methods(&all_profile_methods(), mode).await;
    let report = serde_json::json!({
        "probeMode": mode,
        "version": version,
        "profiles": evaluate_profiles(&probes),
        "methods": probes,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Prints a fresh 32-byte hex secret for `DSTREAM_XMR_SESSION_SECRET`.
fn print_secret() {
    println!("{}", random_secret());
}

/// Prints version information to stdout.
fn print_version() {
    println!("dstream-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed that branch never fires, so the other
/// one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
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
