//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use chatrelay::config::{self, Config};
use chatrelay::llm::ProviderRegistry;
use chatrelay::server::{self, AppState};
use chatrelay::session::{SessionManager, StreamSettings};
use chatrelay::store::file::{self as file_store, FileConversationStore, FileMessageStore};
use chatrelay::store::{ConversationStore, MessageStore};
use chatrelay::sync::KeyedLocks;
use chatrelay::title::EndpointTitleGenerator;

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
    data_dir_override: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load {config_path}"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(dir) = data_dir_override {
        config.storage.path = Some(dir.to_path_buf());
    }

    let config_path_ref = Path::new(config_path);
    let data_dir = config::resolve_path(
        config_path_ref,
        config
            .storage
            .path
            .as_deref()
            .unwrap_or(Path::new(config::DEFAULT_DATA_DIR)),
    );
    file_store::ensure_dir(&file_store::conversations_root(&data_dir))
        .await
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    info!(data_dir = %data_dir.display(), "Using data directory");

    // Per-conversation locks shared by both file stores
    let locks = KeyedLocks::with_sweeper("conversation_locks");
    let messages: Arc<dyn MessageStore> =
        Arc::new(FileMessageStore::new(&data_dir, locks.clone()));
    let conversations: Arc<dyn ConversationStore> =
        Arc::new(FileConversationStore::new(&data_dir, locks));

    let providers = ProviderRegistry::from_config(&config.providers);
    if providers.is_empty() {
        warn!("No provider endpoints configured; every ask request will be rejected");
    }
    info!(endpoints = ?providers.names(), "Loaded endpoints");

    let mut sessions = SessionManager::new(
        messages.clone(),
        conversations.clone(),
        StreamSettings::from(&config.streaming),
    );
    if config.title.enabled {
        sessions = sessions.with_titles(Arc::new(EndpointTitleGenerator::new(
            providers.clone(),
            &config.title,
        )));
    }

    let state = AppState {
        sessions: sessions.clone(),
        providers,
        conversations,
        messages,
        keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
        max_connections: config.server.max_connections,
    };
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cancel live generations (their partial answers are kept) and wait for
    // relay and title tasks
    sessions.shutdown().await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
