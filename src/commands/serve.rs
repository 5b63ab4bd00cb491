// ABOUTME: `serve` and `migrate` commands
// ABOUTME: Wires the four Postgres stores into the sync registry and runs the gRPC server

use std::sync::Arc;

use anyhow::{Context, Result};
use sync_engine::server::ServerHandle;
use sync_engine::{ChangePublisher, SessionConfig, SyncChannel, SyncRegistry};
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;

use crate::config::ServeConfig;
use crate::kinds::{ChatMessage, ChatThread, Connection, PgRecord, PgStore, SavedQuery};
use crate::utils::{load_token, strip_password_from_url};

/// Register one kind: a publisher shared by its store (the emitter) and its channel.
fn register_kind<R: PgRecord>(
    registry: &mut SyncRegistry,
    client: &Arc<Client>,
    capacity: usize,
    session: SessionConfig,
) {
    let publisher = ChangePublisher::<R>::new(R::KIND, capacity);
    let store = Arc::new(PgStore::<R>::new(Arc::clone(client), publisher.clone()));
    registry.register_emitter(Arc::new(SyncChannel::new(store, publisher, session)));
}

pub fn build_registry(client: Arc<Client>, config: &ServeConfig) -> SyncRegistry {
    let session = SessionConfig {
        buffer: config.session_buffer,
    };
    let mut registry = SyncRegistry::new();
    register_kind::<Connection>(&mut registry, &client, config.publisher_capacity, session);
    register_kind::<ChatThread>(&mut registry, &client, config.publisher_capacity, session);
    register_kind::<ChatMessage>(&mut registry, &client, config.publisher_capacity, session);
    register_kind::<SavedQuery>(&mut registry, &client, config.publisher_capacity, session);
    registry
}

pub async fn serve(config: ServeConfig, run_migrations: bool, shutdown: CancellationToken) -> Result<()> {
    let token = load_token(Some(&config.token_file))?;

    tracing::info!(
        listen = %config.listen,
        database = %strip_password_from_url(&config.database_url)?,
        token = %config.token_file.display(),
        publisher_capacity = config.publisher_capacity,
        session_buffer = config.session_buffer,
        "metadata-sync starting"
    );

    let client = crate::postgres::connect_with_retry(&config.database_url, config.connect_retries)
        .await
        .context("failed to connect to metadata database")?;
    if run_migrations {
        crate::postgres::migrate(&client).await?;
    }

    let registry = Arc::new(build_registry(Arc::new(client), &config));
    let handle = ServerHandle::spawn(config.listen, registry, token, shutdown.child_token()).await?;

    shutdown.cancelled().await;
    tracing::info!("stopping sync server");
    handle.shutdown();
    handle.wait().await?;
    tracing::info!("sync server stopped");
    Ok(())
}

pub async fn migrate(database_url: &str, connect_retries: u32) -> Result<()> {
    let client = crate::postgres::connect_with_retry(database_url, connect_retries)
        .await
        .context("failed to connect to metadata database")?;
    crate::postgres::migrate(&client).await?;
    println!("Schema is up to date.");
    Ok(())
}
