use anyhow::{Context, Result};
use tonic::codegen::InterceptedService;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::entity::OwnerId;
use crate::server::OWNER_HEADER;
use crate::sync_proto::entity_sync_client::EntitySyncClient;

/// Stamps the shared token and caller identity onto every outgoing request, the way
/// a gateway in front of the server would.
#[derive(Clone)]
pub struct ClientIdentity {
    authorization: MetadataValue<Ascii>,
    owner: MetadataValue<Ascii>,
}

impl ClientIdentity {
    pub fn new(token: &str, owner: &OwnerId) -> Result<Self> {
        let authorization = MetadataValue::try_from(format!("Bearer {token}"))
            .context("token contains characters not allowed in metadata")?;
        let owner = MetadataValue::try_from(owner.as_str())
            .context("owner id contains characters not allowed in metadata")?;
        Ok(Self {
            authorization,
            owner,
        })
    }
}

impl Interceptor for ClientIdentity {
    fn call(&mut self, mut req: Request<()>) -> Result<Request<()>, Status> {
        let metadata = req.metadata_mut();
        metadata.insert("authorization", self.authorization.clone());
        metadata.insert(OWNER_HEADER, self.owner.clone());
        Ok(req)
    }
}

pub type SyncClient = EntitySyncClient<InterceptedService<Channel, ClientIdentity>>;

/// Connect to `endpoint` (e.g. `http://127.0.0.1:50061`) as `owner`.
pub async fn connect(endpoint: &str, token: &str, owner: &OwnerId) -> Result<SyncClient> {
    let identity = ClientIdentity::new(token, owner)?;
    let channel = Endpoint::from_shared(endpoint.to_string())
        .with_context(|| format!("invalid sync endpoint '{endpoint}'"))?
        .connect()
        .await
        .with_context(|| format!("failed to connect to sync server at {endpoint}"))?;
    Ok(EntitySyncClient::with_interceptor(channel, identity))
}
