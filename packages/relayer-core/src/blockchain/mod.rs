use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::{
    types::{BlockchainMeta, DomainCertWrapper},
    Result,
};

#[cfg(test)]
use mockall::automock;

/// Registry of the blockchains anchored on this relayer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockchainManager: Send + Sync {
    async fn get_domain_cert(&self, domain: &str) -> Result<Option<DomainCertWrapper>>;

    async fn get_blockchain_meta(&self, product: &str, blockchain_id: &str) -> Result<Option<BlockchainMeta>>;

    async fn get_blockchain_meta_by_domain(&self, domain: &str) -> Result<Option<BlockchainMeta>>;

    /// Whether `domain` claims to be a locally anchored chain.
    async fn has_blockchain(&self, domain: &str) -> Result<bool>;
}

/// Last time an AM was delivered to each local chain.
#[derive(Default)]
pub struct BlockchainIdleCache {
    last_am_process: RwLock<HashMap<(String, String), Instant>>,
}

impl BlockchainIdleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_last_am_process_time(&self, product: &str, blockchain_id: &str) {
        self.last_am_process
            .write()
            .await
            .insert((product.to_string(), blockchain_id.to_string()), Instant::now());
    }

    pub async fn last_am_process_time(&self, product: &str, blockchain_id: &str) -> Option<Instant> {
        self.last_am_process
            .read()
            .await
            .get(&(product.to_string(), blockchain_id.to_string()))
            .copied()
    }

    /// A chain that never received an AM counts as idle.
    pub async fn is_idle(&self, product: &str, blockchain_id: &str, threshold: Duration) -> bool {
        match self.last_am_process_time(product, blockchain_id).await {
            Some(last) => last.elapsed() >= threshold,
            None => true,
        }
    }
}
