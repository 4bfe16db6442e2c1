// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use relational_gateway::api::router;
use relational_gateway::backend::eth::EthBackend;
use relational_gateway::backend::BackendClient;
use relational_gateway::chain::eth::EthChainClient;
use relational_gateway::chain::ChainClient;
use relational_gateway::config::{Config, LogFormat};
use relational_gateway::dispatcher::RequestDispatcher;
use relational_gateway::state::AppState;
use relational_gateway::subscriptions::SubscriptionManager;
use relational_gateway::wallet::{LoggingCallbacks, WalletPool};
use relational_gateway::{auth, mailbox};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(config.log_format);

    // Cancelled on SIGINT; every background task hangs off this token.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let mailbox = mailbox::from_config(&config.mailbox)
        .await
        .expect("Failed to initialize mailbox store");
    tracing::info!(provider = config.mailbox.provider(), "mailbox store ready");

    let chain: Arc<dyn ChainClient> = Arc::new(
        EthChainClient::connect(&config.eth_rpc_url).expect("Failed to connect to the chain node"),
    );

    let wallets = WalletPool::start(
        &config.wallet_private_keys,
        Arc::clone(&chain),
        Arc::new(LoggingCallbacks),
        &shutdown,
    )
    .await
    .expect("Failed to start wallet owners");
    tracing::info!(wallets = wallets.len(), "wallet owners started");

    let backend: Arc<dyn BackendClient> = Arc::new(EthBackend::new(wallets, chain));

    let dispatcher = Arc::new(RequestDispatcher::new(
        Arc::clone(&mailbox),
        Arc::clone(&backend),
        shutdown.clone(),
    ));
    let subscriptions = Arc::new(SubscriptionManager::new(
        Arc::clone(&mailbox),
        backend,
        shutdown.clone(),
    ));
    let auth = auth::from_config(&config.auth);
    tracing::info!(plugin = auth.name(), "authentication configured");

    let state = AppState::new(
        dispatcher,
        subscriptions,
        auth,
        config.mailbox.provider(),
    );
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    tracing::info!(%addr, "gateway listening (docs at /docs)");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .expect("Server failed");
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
