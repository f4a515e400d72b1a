use async_trait::async_trait;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{RelayerNetworkManager, RelayerNodeInfo, RelayerResponse};
use crate::config::NetworkConfig;
use crate::verify::RelayerCredentialManager;
use crate::{Error, Result};

#[derive(Default)]
struct Topology {
    domain_routes: HashMap<String, String>,
    nodes: HashMap<String, RelayerNodeInfo>,
    channels: HashSet<(String, String)>,
}

/// Network manager backed by the `network` section of the config, updatable at
/// runtime.
pub struct StaticRelayerNetworkManager {
    topology: RwLock<Topology>,
    credential: Option<Arc<RelayerCredentialManager>>,
}

impl StaticRelayerNetworkManager {
    pub fn new(credential: Option<Arc<RelayerCredentialManager>>) -> Self {
        Self {
            topology: RwLock::new(Topology::default()),
            credential,
        }
    }

    pub fn from_config(config: &NetworkConfig, credential: Option<Arc<RelayerCredentialManager>>) -> Result<Self> {
        let mut topology = Topology::default();
        for node_config in &config.nodes {
            let node = RelayerNodeInfo::from_config(node_config)?;
            for domain in &node.domains {
                topology.domain_routes.insert(domain.clone(), node.node_id.clone());
            }
            topology.nodes.insert(node.node_id.clone(), node);
        }
        for channel in &config.channels {
            topology
                .channels
                .insert((channel.sender_domain.clone(), channel.receiver_domain.clone()));
        }
        info!(
            "Loaded relayer network: {} nodes, {} routes, {} channels",
            topology.nodes.len(),
            topology.domain_routes.len(),
            topology.channels.len()
        );

        Ok(Self {
            topology: RwLock::new(topology),
            credential,
        })
    }

    /// Adds or replaces a node and routes all of its domains to it.
    pub async fn upsert_node(&self, node: RelayerNodeInfo) {
        let mut topology = self.topology.write().await;
        for domain in &node.domains {
            if let Some(previous) = topology.domain_routes.insert(domain.clone(), node.node_id.clone()) {
                if previous != node.node_id {
                    warn!("Domain {} moved from relayer {} to {}", domain, previous, node.node_id);
                }
            }
        }
        topology.nodes.insert(node.node_id.clone(), node);
    }

    pub async fn add_channel(&self, sender_domain: &str, receiver_domain: &str) {
        self.topology
            .write()
            .await
            .channels
            .insert((sender_domain.to_string(), receiver_domain.to_string()));
    }
}

#[async_trait]
impl RelayerNetworkManager for StaticRelayerNetworkManager {
    async fn find_remote_relayer(&self, domain: &str) -> Result<Option<String>> {
        Ok(self.topology.read().await.domain_routes.get(domain).cloned())
    }

    async fn has_cross_chain_channel(&self, sender_domain: &str, receiver_domain: &str) -> Result<bool> {
        Ok(self
            .topology
            .read()
            .await
            .channels
            .contains(&(sender_domain.to_string(), receiver_domain.to_string())))
    }

    async fn get_relayer_node(&self, node_id: &str, _force_refresh: bool) -> Result<Option<RelayerNodeInfo>> {
        Ok(self.topology.read().await.nodes.get(node_id).cloned())
    }

    fn sign_relayer_response(&self, response: &mut RelayerResponse) -> Result<()> {
        match &self.credential {
            Some(credential) => credential.sign_relayer_response(response),
            None => Err(Error::Crypto("no local relayer credential to sign with".to_string())),
        }
    }
}
