// ABOUTME: Opens tokio-postgres clients over native-tls
// ABOUTME: Drives the connection future on its own task and retries the initial connect

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::Client;

use crate::utils::{retry_with_backoff, strip_password_from_url, validate_connection_string};

static ALLOW_SELF_SIGNED: OnceLock<bool> = OnceLock::new();

/// Decide once per process whether invalid certificates are accepted.
/// Later calls are ignored.
pub fn init_tls_policy(allow_self_signed: bool) {
    if ALLOW_SELF_SIGNED.set(allow_self_signed).is_ok() && allow_self_signed {
        tracing::warn!("accepting self-signed TLS certificates for PostgreSQL");
    }
}

fn tls_connector() -> Result<MakeTlsConnector> {
    let allow_self_signed = ALLOW_SELF_SIGNED.get().copied().unwrap_or(false);
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed)
        .danger_accept_invalid_hostnames(allow_self_signed)
        .build()
        .context("failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}

/// Connect to PostgreSQL. The connection task runs until the client is dropped.
pub async fn connect(url: &str) -> Result<Client> {
    validate_connection_string(url)?;
    let display_url = strip_password_from_url(url)?;

    let (client, connection) = tokio_postgres::connect(url, tls_connector()?)
        .await
        .with_context(|| format!("failed to connect to {display_url}"))?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::error!(error = %err, database = %display_url, "postgres connection closed with error");
        }
    });

    Ok(client)
}

/// `connect` with exponential backoff, for process startup when the database
/// may still be coming up.
pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Client> {
    retry_with_backoff(|| connect(url), max_retries, Duration::from_millis(500)).await
}
