//! Relayer-to-relayer networking: envelopes, topology lookups and peer clients.

use async_trait::async_trait;
use std::sync::Arc;

use crate::Result;

#[cfg(test)]
use mockall::automock;

pub mod client;
pub mod node;
pub mod pool;
pub mod request;
pub mod response;
pub mod static_manager;

pub use client::{HttpRelayerClient, HttpRelayerClientFactory};
pub use node::RelayerNodeInfo;
pub use pool::RelayerClientPool;
pub use request::{AmRequestPayload, RelayerRequest, RelayerRequestType};
pub use response::{HandshakeRespPayload, RelayerResponse, ResponsePayload};
pub use static_manager::StaticRelayerNetworkManager;

/// View of the relayer network: who owns which domain and which channels are
/// authorized.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelayerNetworkManager: Send + Sync {
    /// Node id of the relayer owning `domain`, if any.
    async fn find_remote_relayer(&self, domain: &str) -> Result<Option<String>>;

    async fn has_cross_chain_channel(&self, sender_domain: &str, receiver_domain: &str) -> Result<bool>;

    async fn get_relayer_node(&self, node_id: &str, force_refresh: bool) -> Result<Option<RelayerNodeInfo>>;

    /// Fills in the local certificate, algorithm and signature.
    fn sign_relayer_response(&self, response: &mut RelayerResponse) -> Result<()>;
}

/// Client side of a connection to one peer relayer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelayerClient: Send + Sync {
    async fn am_request(
        &self,
        sender_domain: &str,
        ucp_id: &str,
        auth_msg: &str,
        udag_resp: &str,
        raw_ledger_info: &str,
    ) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelayerClientFactory: Send + Sync {
    async fn create_client(&self, node: &RelayerNodeInfo) -> Result<Arc<dyn RelayerClient>>;
}
