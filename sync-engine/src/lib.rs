pub mod adapter;
pub mod client;
pub mod entity;
pub mod error;
pub mod frame;
pub mod memory;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod session;

pub mod sync_proto {
    tonic::include_proto!("entitysync");
}

pub use adapter::{EntityAdapter, MutationEmitter};
pub use entity::{ClientKnownItem, Entity, EntityId, EntityKind, OwnerId};
pub use error::SyncError;
pub use frame::Frame;
pub use publisher::{ChangeEvent, ChangePublisher};
pub use registry::{MutationSink, SyncRegistry};
pub use session::{SessionConfig, SessionState, SessionStream, SyncChannel};
