//! Room Controller
//!
//! Signaling coordination core for ephemeral WebRTC sessions.
//!
//! # Servers
//!
//! The Room Controller runs one HTTP server for operational endpoints
//! (default: 0.0.0.0:9091): `/health`, `/ready`, and Prometheus
//! `/metrics`. Client transports are not part of this binary: a
//! deployment embeds [`room_controller::SessionCoordinator`] behind its
//! own WebSocket/WebTransport adapter and its own credential and
//! persistence stores.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the backplane (Redis, or in-process for single instances)
//! 4. Start the presence fanout and assemble the coordination core
//! 5. Start the health HTTP server (liveness, readiness, metrics)
//! 6. Mark ready and wait for shutdown signal
//! 7. On shutdown: flip readiness off, cancel tasks, drain room actors

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use common::secret::ExposeSecret;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::backplane::{Backplane, MemoryBackplane, RedisBackplane};
use room_controller::config::{BackplaneMode, Config};
use room_controller::coordinator::SessionCoordinator;
use room_controller::fanout::PresenceFanout;
use room_controller::observability::{health_router, CoordinatorMetrics, HealthState};
use room_controller::registry::ConnectionRegistry;
use room_controller::rooms::RoomDirectory;
use room_controller::stores::{
    BanRecord, CredentialStore, PersistenceStore, StoreError, StoredMessage, Verification,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        backplane_mode = ?config.backplane_mode,
        health_bind_address = %config.health_bind_address,
        max_connections = config.max_connections,
        room_mailbox_capacity = config.room_mailbox_capacity,
        auth_grace_seconds = config.auth_grace_seconds,
        shutdown_timeout_seconds = config.shutdown_timeout_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    let health_state = Arc::new(HealthState::new());
    let metrics = CoordinatorMetrics::new();

    // Connect the backplane
    let backplane: Arc<dyn Backplane> = match config.backplane_mode {
        BackplaneMode::Redis => {
            info!("Connecting to Redis backplane...");
            let redis_url = config
                .redis_url
                .as_ref()
                .context("REDIS_URL is required for the redis backplane")?;
            let backplane = RedisBackplane::connect(redis_url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect Redis backplane");
                    e
                })?;
            info!("Redis backplane connected");
            Arc::new(backplane)
        }
        BackplaneMode::Memory => {
            warn!("In-process backplane selected: events will not reach sibling instances");
            Arc::new(MemoryBackplane::new())
        }
    };

    // Root cancellation token; everything spawned below holds a child
    let shutdown_token = CancellationToken::new();

    // Start the fanout: readiness depends on its backplane subscriptions
    let fanout = PresenceFanout::new(
        config.instance_id.clone(),
        backplane,
        Arc::clone(&metrics),
    );
    fanout.start(shutdown_token.child_token()).await.map_err(|e| {
        error!(error = %e, "Failed to establish backplane subscriptions");
        e
    })?;

    // Assemble the coordination core. This binary runs no client
    // transport; the coordinator is exercised by embedding deployments,
    // assembled here so startup fails fast on wiring errors.
    let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
    let directory = RoomDirectory::new(
        Arc::clone(&fanout),
        Arc::clone(&metrics),
        config.room_mailbox_capacity,
        shutdown_token.child_token(),
    );
    let _coordinator = SessionCoordinator::new(
        registry,
        Arc::clone(&directory),
        fanout,
        Arc::new(OpenCredentialStore),
        Arc::new(LogOnlyPersistenceStore),
        Arc::clone(&metrics),
    );
    warn!("Development stores active: all proofs accepted, nothing persisted");
    info!("Coordination core assembled");

    // Start health HTTP server (must succeed; fail startup if it doesn't)
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address: {}", config.health_bind_address))?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Backplane subscriptions are up and the health server is bound
    health_state.set_ready();

    info!("Room Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop taking traffic immediately, then drain
    health_state.set_not_ready();
    shutdown_token.cancel();

    directory
        .shutdown(Duration::from_secs(config.shutdown_timeout_seconds))
        .await;

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Credential store for development runs: accepts every proof and
/// grants no admin capability. Deployments embed the library with a
/// real store.
struct OpenCredentialStore;

#[async_trait::async_trait]
impl CredentialStore for OpenCredentialStore {
    async fn verify(&self, identity: &str, _proof: &str) -> Result<Verification, StoreError> {
        info!(target: "rc.stores", identity, "Open credential store accepted proof");
        Ok(Verification::Verified { admin: false })
    }

    async fn is_banned(&self, _identity: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

/// Persistence store for development runs: logs writes and keeps nothing.
struct LogOnlyPersistenceStore;

#[async_trait::async_trait]
impl PersistenceStore for LogOnlyPersistenceStore {
    async fn append_message(&self, message: StoredMessage) -> Result<(), StoreError> {
        info!(
            target: "rc.stores",
            message_id = %message.id,
            from = %message.from,
            "Discarding message (log-only store)"
        );
        Ok(())
    }

    async fn mark_read(&self, _id: Uuid) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn record_ban(&self, ban: BanRecord) -> Result<(), StoreError> {
        info!(
            target: "rc.stores",
            identity = %ban.identity,
            "Discarding ban record (log-only store)"
        );
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
