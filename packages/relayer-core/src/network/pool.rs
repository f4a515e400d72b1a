use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};

use super::{RelayerClient, RelayerClientFactory, RelayerNodeInfo};
use crate::Result;

type ClientCell = Arc<OnceCell<Arc<dyn RelayerClient>>>;

struct DomainEntry {
    node_id: String,
    client: Arc<dyn RelayerClient>,
}

/// Shared cache of peer clients keyed by destination domain.
///
/// Clients are built once per peer node: concurrent callers asking for the same
/// node wait on the same construction instead of opening their own connection.
pub struct RelayerClientPool {
    factory: Arc<dyn RelayerClientFactory>,
    domain_clients: RwLock<HashMap<String, DomainEntry>>,
    node_clients: Mutex<HashMap<String, ClientCell>>,
}

impl RelayerClientPool {
    pub fn new(factory: Arc<dyn RelayerClientFactory>) -> Self {
        Self {
            factory,
            domain_clients: RwLock::new(HashMap::new()),
            node_clients: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_client_by_domain(&self, domain: &str) -> Option<Arc<dyn RelayerClient>> {
        self.domain_clients
            .read()
            .await
            .get(domain)
            .map(|entry| entry.client.clone())
    }

    /// Returns the client for `node`, creating it on first use, and remembers it
    /// as the client serving `domain`.
    pub async fn get_client(&self, node: &RelayerNodeInfo, domain: &str) -> Result<Arc<dyn RelayerClient>> {
        let cell = {
            let mut cells = self.node_clients.lock().await;
            cells
                .entry(node.node_id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let client = cell
            .get_or_try_init(|| async {
                debug!("Creating client for relayer {}", node.node_id);
                self.factory.create_client(node).await
            })
            .await?
            .clone();

        self.domain_clients.write().await.insert(
            domain.to_string(),
            DomainEntry {
                node_id: node.node_id.clone(),
                client: client.clone(),
            },
        );
        Ok(client)
    }

    /// Forgets the client cached for `domain`.
    pub async fn invalidate(&self, domain: &str) {
        self.domain_clients.write().await.remove(domain);
    }

    /// Drops the client of a peer node and every domain routed to it.
    pub async fn invalidate_node(&self, node_id: &str) {
        self.node_clients.lock().await.remove(node_id);
        self.domain_clients
            .write()
            .await
            .retain(|_, entry| entry.node_id != node_id);
        info!("Dropped pooled client of relayer {}", node_id);
    }
}
