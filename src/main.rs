//! Manga Sync Server
//!
//! A self-hosted server that keeps a manga library, chapter read-state and
//! categories in sync across the devices of an account.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manga_sync_server::config::Config;
use manga_sync_server::db::{self, AccountRepository};
use manga_sync_server::notify::Notifier;
use manga_sync_server::routes;
use manga_sync_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manga_sync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Manga Sync Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Sync strategy: {:?}", config.sync.strategy);

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    // Seed API keys
    let mut conn = db_pool.acquire().await?;
    for seed in &config.api_keys {
        AccountRepository::new(&mut conn)
            .store(&seed.name, &seed.key)
            .await
            .with_context(|| format!("Failed to seed API key for {}", seed.name))?;
    }
    drop(conn);
    if config.api_keys.is_empty() {
        tracing::warn!("No API keys configured, set SYNC_API_KEYS to allow syncing");
    } else {
        tracing::info!("Seeded {} API key(s)", config.api_keys.len());
    }

    // Notifications
    let notifier = Arc::new(Notifier::from_config(&config.notifications));
    tracing::info!("{} notification sender(s) configured", notifier.sender_count());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(notifier.clone()));

    // Create application state and router
    let app_state = AppState::new(config, db_pool, notifier);
    let app = routes::router(app_state);

    // Start server with graceful shutdown
    tracing::info!("Manga Sync Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Rebuild notification senders from the environment on SIGHUP
#[cfg(unix)]
async fn reload_on_hangup(notifier: Arc<Notifier>) {
    let mut sighup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(sighup) => sighup,
        Err(e) => {
            tracing::error!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };

    while sighup.recv().await.is_some() {
        dotenvy::dotenv_override().ok();

        match Config::from_env() {
            Ok(config) => {
                notifier.reload(&config.notifications);
                tracing::info!(
                    "Reloaded notifications, {} sender(s) configured",
                    notifier.sender_count()
                );
            }
            Err(e) => tracing::warn!("Keeping current notification senders: {}", e),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
