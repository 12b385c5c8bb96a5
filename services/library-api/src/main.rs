use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use library_api::{Config, Lifecycle, RecordStore, StoreBackend, http, telemetry};
use library_storage::{QueryExecutor, RepositoryConnection};
use library_storage_memory::MemoryPool;
use library_storage_postgres::PgPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init(config.log_format);

    match config.store {
        StoreBackend::Postgres => {
            let mut store = RecordStore::<PgPool>::connect(config.database_url.as_str())
                .await
                .context("connecting to postgres")?;
            if let Some(path) = &config.migrations {
                store = store.with_migrations(path);
            }
            serve(store, config.bind).await
        }
        StoreBackend::Memory => {
            let store = RecordStore::<MemoryPool>::connect("memory://").await?;
            serve(store, config.bind).await
        }
    }
}

async fn serve<P>(store: RecordStore<P>, bind: SocketAddr) -> anyhow::Result<()>
where
    P: QueryExecutor + Clone + 'static,
    RecordStore<P>: RepositoryConnection,
{
    store.initialize().await.context("initializing schema")?;

    let app = http::router(Lifecycle::new(store.clone()));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
