//! kura-api server binary.

use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kura_api::config::{LogFormat, ServerConfig};
use kura_api::{router, AppState};
use kura_db::{Database, PoolConfig};

/// Initialize tracing with configurable output.
///
/// The returned guard flushes the file writer and must outlive the server.
fn init_tracing(config: &ServerConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kura_api=debug,kura_db=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = config.log_file {
        // Daily rotation next to the configured path
        let file_dir = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("kura-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        match config.log_format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init(),
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(config.log_ansi.unwrap_or(false)),
                )
                .init(),
        }
        Some(guard)
    } else {
        match config.log_format {
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .init(),
            LogFormat::Text => {
                let mut layer = tracing_subscriber::fmt::layer();
                if let Some(ansi) = config.log_ansi {
                    layer = layer.with_ansi(ansi);
                }
                registry.with(layer).init();
            }
        }
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env();
    let _file_guard = init_tracing(&config);

    info!(
        log_format = config.log_format.as_str(),
        log_file = config.log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env())
        .await?
        .with_hierarchy_attempts(config.hierarchy_max_attempts);
    info!("Database connected");

    if config.run_migrations {
        info!("Running database migrations...");
        db.migrate().await?;
        info!("Database migrations complete");
    } else {
        info!("Skipping migrations (RUN_MIGRATIONS=false)");
    }
    kura_db::log_pool_metrics(db.pool());

    let app = router(AppState::from_database(&db));

    let addr: SocketAddr = config.bind_address().parse()?;
    info!(
        hierarchy_max_attempts = config.hierarchy_max_attempts,
        "Starting server on {}", addr
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
