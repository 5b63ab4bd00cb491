// ABOUTME: Client commands that talk to a running sync server over gRPC
// ABOUTME: `watch` prints a session's frames, `put` and `remove` mutate one entity

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sync_engine::client::{connect, SyncClient};
use sync_engine::sync_proto::{
    DeleteRequest, HealthCheckRequest, KnownItem, SubscribeRequest, UpsertRequest,
};
use sync_engine::{ClientKnownItem, EntityKind, OwnerId};
use tokio_util::sync::CancellationToken;
use tonic::Request;
use url::Url;

use crate::utils::load_token;

/// Connection details shared by every client command.
pub struct ClientOptions {
    pub endpoint: String,
    pub token_file: Option<PathBuf>,
    pub owner: String,
}

impl ClientOptions {
    async fn connect(&self) -> Result<SyncClient> {
        let endpoint = validate_endpoint(&self.endpoint)?;
        if self.owner.trim().is_empty() {
            bail!("owner id cannot be empty");
        }
        let token = load_token(self.token_file.as_deref())?;
        connect(&endpoint, &token, &OwnerId::from(self.owner.trim())).await
    }
}

/// Accept only `http://` or `https://` endpoints with a host.
pub fn validate_endpoint(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint).with_context(|| format!("invalid endpoint '{endpoint}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("endpoint must use http:// or https://, got '{}'", url.scheme());
    }
    if url.host_str().is_none() {
        bail!("endpoint '{endpoint}' has no host");
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}

/// Load a client cache description: a JSON array of `{"id", "updatedAt"}`.
pub fn load_known(path: &Path) -> Result<Vec<ClientKnownItem>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read known items from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON array of {{id, updatedAt}}", path.display()))
}

fn known_to_proto(known: &[ClientKnownItem]) -> Vec<KnownItem> {
    known
        .iter()
        .map(|item| KnownItem {
            id: item.id.to_string(),
            updated_at: item.updated_at.to_rfc3339(),
        })
        .collect()
}

/// Open a session and print each frame as one JSON line until the stream ends
/// or `shutdown` fires.
pub async fn watch(
    opts: ClientOptions,
    kind: EntityKind,
    known_file: Option<PathBuf>,
    shutdown: CancellationToken,
) -> Result<()> {
    let known = match known_file {
        Some(path) => load_known(&path)?,
        None => Vec::new(),
    };
    let mut client = opts.connect().await?;

    client
        .health_check(Request::new(HealthCheckRequest {}))
        .await
        .context("sync server health check failed")?;

    let mut stream = client
        .subscribe(Request::new(SubscribeRequest {
            kind: kind.to_string(),
            known: known_to_proto(&known),
        }))
        .await
        .with_context(|| format!("failed to subscribe to {kind}"))?
        .into_inner();
    tracing::info!(%kind, known = known.len(), "subscribed");

    let mut frames = 0u64;
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = stream.message() => frame.context("sync stream failed")?,
        };
        let Some(frame) = frame else {
            tracing::info!("server closed the stream");
            break;
        };
        println!("{}", frame.json);
        frames += 1;
    }

    tracing::info!(frames, "watch finished");
    Ok(())
}

/// Create or update one entity. `payload` is inline JSON or `@path` to a file.
pub async fn put(opts: ClientOptions, kind: EntityKind, id: Option<String>, payload: &str) -> Result<()> {
    let payload_json = read_payload(payload)?;
    let mut client = opts.connect().await?;

    let resp = client
        .upsert(Request::new(UpsertRequest {
            kind: kind.to_string(),
            id: id.unwrap_or_default(),
            payload_json,
        }))
        .await
        .with_context(|| format!("failed to write {kind}"))?
        .into_inner();

    tracing::info!(%kind, created = resp.created, "entity stored");
    println!("{}", resp.json);
    Ok(())
}

pub async fn remove(opts: ClientOptions, kind: EntityKind, id: String) -> Result<()> {
    let mut client = opts.connect().await?;
    client
        .delete(Request::new(DeleteRequest {
            kind: kind.to_string(),
            id: id.clone(),
        }))
        .await
        .with_context(|| format!("failed to delete {kind} {id}"))?;
    println!("Deleted {kind} {id}");
    Ok(())
}

fn read_payload(payload: &str) -> Result<String> {
    let raw = match payload.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read payload file {path}"))?,
        None => payload.to_string(),
    };
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("payload is not valid JSON")?;
    if !value.is_object() {
        bail!("payload must be a JSON object");
    }
    Ok(value.to_string())
}
