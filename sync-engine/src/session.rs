use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::adapter::EntityAdapter;
use crate::entity::{validate_known, ClientKnownItem, EntityKind, OwnerId};
use crate::error::SyncError;
use crate::frame::Frame;
use crate::publisher::{ChangeEvent, ChangePublisher, Subscription};
use crate::reconciler::{encode, Reconciler};

pub const DEFAULT_SESSION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Reconciling,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Cancelled,
    TransportClosed,
    PublisherClosed,
    EncodeFailed,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Cancelled => "cancelled",
            CloseReason::TransportClosed => "transport closed",
            CloseReason::PublisherClosed => "publisher closed",
            CloseReason::EncodeFailed => "encode failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Frames buffered between the session task and the transport.
    pub buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_SESSION_BUFFER,
        }
    }
}

/// Everything needed to serve sessions for one entity kind: the store adapter and
/// the publisher its emitters write to.
pub struct SyncChannel<A: EntityAdapter> {
    adapter: Arc<A>,
    publisher: ChangePublisher<A::Payload>,
    config: SessionConfig,
}

impl<A: EntityAdapter> SyncChannel<A> {
    pub fn new(adapter: Arc<A>, publisher: ChangePublisher<A::Payload>, config: SessionConfig) -> Self {
        Self {
            adapter,
            publisher,
            config,
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn publisher(&self) -> &ChangePublisher<A::Payload> {
        &self.publisher
    }

    /// Open a session: reconcile `known` against the store, emit the `sync` frame,
    /// then stream this owner's live changes until `cancel` fires or the returned
    /// stream is dropped. Dropping the stream never cancels `cancel` itself, so one
    /// token can be shared by many sessions.
    ///
    /// Fails before any frame exists if `known` is malformed or the store cannot be
    /// read. The subscription is taken before reconciling so a commit racing with the
    /// open is still delivered, after the `sync` frame.
    pub async fn open(
        &self,
        owner: OwnerId,
        known: Vec<ClientKnownItem>,
        cancel: CancellationToken,
    ) -> Result<SessionStream, SyncError> {
        // The stream's drop guard owns this token, so it must not be the caller's.
        let cancel = cancel.child_token();
        validate_known(&known)?;
        let kind = self.adapter.kind();
        let (state_tx, state_rx) = watch::channel(SessionState::Reconciling);

        let subscription = self.publisher.subscribe();
        let batch = Reconciler::new(self.adapter.as_ref())
            .reconcile(&owner, &known)
            .await?;
        let batch_len = batch.len();
        let sync_frame = batch.into_frame(self.adapter.as_ref())?;

        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        tx.send(sync_frame).await.map_err(|_| SyncError::Closed)?;

        tracing::info!(%kind, %owner, known = known.len(), changes = batch_len, "sync session opened");
        let _ = state_tx.send(SessionState::Streaming);

        let session = StreamingSession {
            kind,
            owner,
            adapter: Arc::clone(&self.adapter),
            subscription,
            tx,
            cancel: cancel.clone(),
            state: state_tx,
        };
        tokio::spawn(session.run());

        Ok(SessionStream {
            frames: ReceiverStream::new(rx),
            state: state_rx,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        })
    }
}

struct StreamingSession<A: EntityAdapter> {
    kind: EntityKind,
    owner: OwnerId,
    adapter: Arc<A>,
    subscription: Subscription<A::Payload>,
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl<A: EntityAdapter> StreamingSession<A> {
    async fn run(self) {
        let StreamingSession {
            kind,
            owner,
            adapter,
            mut subscription,
            tx,
            cancel,
            state,
        } = self;

        let mut forwarded = 0u64;
        let reason = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                _ = tx.closed() => break CloseReason::TransportClosed,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break CloseReason::PublisherClosed,
                },
            };

            if event.owner_id() != &owner {
                continue;
            }

            let frame = match live_frame(adapter.as_ref(), event) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!(%kind, %owner, error = %err, "dropping session after encode failure");
                    break CloseReason::EncodeFailed;
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                sent = tx.send(frame) => {
                    if sent.is_err() {
                        break CloseReason::TransportClosed;
                    }
                    forwarded += 1;
                }
            }
        };

        drop(subscription);
        tracing::info!(%kind, %owner, forwarded, reason = reason.as_str(), "sync session closed");
        let _ = state.send(SessionState::Closed);
    }
}

fn live_frame<A: EntityAdapter>(
    adapter: &A,
    event: ChangeEvent<A::Payload>,
) -> Result<Frame, SyncError> {
    Ok(match event {
        ChangeEvent::Insert(entity) => Frame::Insert(encode(adapter, &entity)?),
        ChangeEvent::Update(entity) => Frame::Update(encode(adapter, &entity)?),
        ChangeEvent::Delete { id, .. } => Frame::Delete(id),
    })
}

/// Frames of one session, in emission order. Dropping the stream cancels the session.
pub struct SessionStream {
    frames: ReceiverStream<Frame>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl SessionStream {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session task has released its subscription.
    pub async fn closed(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }
}

impl Stream for SessionStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

/// Kind-erased session entry point so one transport can serve every kind.
#[async_trait]
pub trait SessionOpener: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn subscriber_count(&self) -> usize;

    async fn open(
        &self,
        owner: OwnerId,
        known: Vec<ClientKnownItem>,
        cancel: CancellationToken,
    ) -> Result<SessionStream, SyncError>;
}

#[async_trait]
impl<A: EntityAdapter> SessionOpener for SyncChannel<A> {
    fn kind(&self) -> EntityKind {
        self.adapter.kind()
    }

    fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    async fn open(
        &self,
        owner: OwnerId,
        known: Vec<ClientKnownItem>,
        cancel: CancellationToken,
    ) -> Result<SessionStream, SyncError> {
        SyncChannel::open(self, owner, known, cancel).await
    }
}
