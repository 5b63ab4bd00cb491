use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Interceptor;
use tonic::{transport::Server, Request, Response, Status};
use uuid::Uuid;

use crate::entity::{ClientKnownItem, EntityId, EntityKind, OwnerId};
use crate::error::SyncError;
use crate::frame::Frame;
use crate::registry::SyncRegistry;
use crate::sync_proto::entity_sync_server::{EntitySync, EntitySyncServer};
use crate::sync_proto::{
    DeleteRequest, DeleteResponse, HealthCheckRequest, HealthCheckResponse, KindStatus,
    KnownItem, SubscribeRequest, SyncFrame, UpsertRequest, UpsertResponse,
};

/// Metadata key carrying the authenticated user id set by the gateway.
pub const OWNER_HEADER: &str = "x-owner-id";

/// A running gRPC server. Dropping the handle stops it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl ServerHandle {
    /// Bind `addr` and serve every kind in `registry`. Cancelling `shutdown` closes
    /// open sessions and stops accepting connections.
    pub async fn spawn(
        addr: SocketAddr,
        registry: Arc<SyncRegistry>,
        token: String,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind tcp listener on {addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound listener address")?;

        let svc = SyncService::new(registry, shutdown.clone());
        let interceptor = IdentityInterceptor::new(token);
        let stop = shutdown.clone();
        let task = tokio::spawn(async move {
            Server::builder()
                .add_service(EntitySyncServer::with_interceptor(svc, interceptor))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    stop.cancelled().await;
                })
                .await
                .context("grpc server exited with error")
        });

        tracing::info!(%local_addr, "sync server listening");
        Ok(Self {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the server task to finish.
    pub async fn wait(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|err| anyhow!("grpc server task failed: {err}"))?,
            None => Ok(()),
        }
    }
}

struct SyncService {
    registry: Arc<SyncRegistry>,
    shutdown: CancellationToken,
}

impl SyncService {
    fn new(registry: Arc<SyncRegistry>, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }
}

type FrameStream = Pin<Box<dyn Stream<Item = Result<SyncFrame, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl EntitySync for SyncService {
    type SubscribeStream = FrameStream;

    async fn health_check(
        &self,
        _: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let kinds = self
            .registry
            .subscriber_counts()
            .into_iter()
            .map(|(kind, subscribers)| KindStatus {
                kind: kind.to_string(),
                subscribers: subscribers as u64,
            })
            .collect();
        Ok(Response::new(HealthCheckResponse {
            status: "ok".to_string(),
            kinds,
        }))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let owner = owner_of(&request)?;
        let payload = request.into_inner();
        let kind: EntityKind = payload.kind.parse()?;
        let known = parse_known(&payload.known)?;

        let opener = self.registry.opener(kind)?;
        let session = opener
            .open(owner, known, self.shutdown.child_token())
            .await?;

        let frames = session.map(|frame| frame_to_proto(&frame));
        Ok(Response::new(Box::pin(frames)))
    }

    async fn upsert(
        &self,
        request: Request<UpsertRequest>,
    ) -> Result<Response<UpsertResponse>, Status> {
        let owner = owner_of(&request)?;
        let payload = request.into_inner();
        let kind: EntityKind = payload.kind.parse()?;
        let id = if payload.id.trim().is_empty() {
            None
        } else {
            Some(parse_id(&payload.id)?)
        };
        let body: serde_json::Value = serde_json::from_str(&payload.payload_json)
            .map_err(|err| SyncError::InvalidInput(format!("payload_json: {err}")))?;

        let (entity, created) = self.registry.sink(kind)?.upsert(&owner, id, body).await?;
        let json = serde_json::to_string(&entity)
            .map_err(|err| Status::internal(format!("failed to encode entity: {err}")))?;
        tracing::debug!(%kind, %owner, created, "upsert applied");
        Ok(Response::new(UpsertResponse { json, created }))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let owner = owner_of(&request)?;
        let payload = request.into_inner();
        let kind: EntityKind = payload.kind.parse()?;
        let id = parse_id(&payload.id)?;

        if !self.registry.sink(kind)?.delete(&owner, id).await? {
            return Err(SyncError::NotFound(id).into());
        }
        tracing::debug!(%kind, %owner, %id, "delete applied");
        Ok(Response::new(DeleteResponse { deleted: true }))
    }
}

fn owner_of<T>(request: &Request<T>) -> Result<OwnerId, Status> {
    request
        .extensions()
        .get::<OwnerId>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated("missing caller identity"))
}

fn parse_id(raw: &str) -> Result<EntityId, SyncError> {
    Uuid::parse_str(raw.trim())
        .map_err(|err| SyncError::InvalidInput(format!("invalid entity id '{raw}': {err}")))
}

/// Decode the client's cache description. Timestamps are RFC 3339.
pub fn parse_known(items: &[KnownItem]) -> Result<Vec<ClientKnownItem>, SyncError> {
    items
        .iter()
        .map(|item| {
            let id = parse_id(&item.id)?;
            let updated_at = DateTime::parse_from_rfc3339(item.updated_at.trim())
                .map_err(|err| {
                    SyncError::InvalidInput(format!(
                        "invalid updated_at '{}' for {id}: {err}",
                        item.updated_at
                    ))
                })?
                .with_timezone(&Utc);
            Ok(ClientKnownItem::new(id, updated_at))
        })
        .collect()
}

pub fn frame_to_proto(frame: &Frame) -> Result<SyncFrame, Status> {
    let json = frame
        .to_json()
        .map_err(|err| Status::internal(format!("failed to encode frame: {err}")))?;
    Ok(SyncFrame {
        frame_type: frame.frame_type().to_string(),
        json,
    })
}

impl From<SyncError> for Status {
    fn from(err: SyncError) -> Self {
        match &err {
            SyncError::InvalidInput(_) | SyncError::UnknownKind(_) => {
                Status::invalid_argument(err.to_string())
            }
            SyncError::MutationsDisabled(_) => Status::unimplemented(err.to_string()),
            SyncError::StoreUnavailable(_) => {
                tracing::warn!(error = %err, "record store unavailable");
                Status::unavailable(err.to_string())
            }
            SyncError::NotFound(_) => Status::not_found(err.to_string()),
            SyncError::Encode(_) => Status::internal(err.to_string()),
            SyncError::Closed => Status::cancelled(err.to_string()),
        }
    }
}

/// Checks the gateway's shared secret and lifts `x-owner-id` into request extensions.
#[derive(Clone)]
pub struct IdentityInterceptor {
    token: Arc<String>,
}

impl IdentityInterceptor {
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(token),
        }
    }
}

impl Interceptor for IdentityInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let header = request
            .metadata()
            .get("authorization")
            .ok_or_else(|| Status::unauthenticated("missing authorization header"))?;
        let expected = format!("Bearer {}", self.token.as_ref());
        if !header
            .to_str()
            .map(|value| value == expected)
            .unwrap_or(false)
        {
            return Err(Status::unauthenticated("invalid authorization header"));
        }

        let owner = request
            .metadata()
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(OwnerId::from)
            .ok_or_else(|| Status::unauthenticated("missing x-owner-id header"))?;
        request.extensions_mut().insert(owner);
        Ok(request)
    }
}
