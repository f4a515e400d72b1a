use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::verify::{calculate_node_id, CrossChainCertificate, SignAlgo};
use crate::{Error, Result};

/// A peer relayer as seen by the local network topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerNodeInfo {
    pub node_id: String,
    pub domains: Vec<String>,
    pub endpoints: Vec<String>,
    pub relayer_cert: Vec<u8>,
    pub sig_algo: String,
}

impl RelayerNodeInfo {
    pub fn new(relayer_cert: Vec<u8>, sig_algo: impl Into<String>, domains: Vec<String>, endpoints: Vec<String>) -> Self {
        Self {
            node_id: calculate_node_id(&relayer_cert),
            domains,
            endpoints,
            relayer_cert,
            sig_algo: sig_algo.into(),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        config.sig_algo.parse::<SignAlgo>()?;
        let cert = CrossChainCertificate::from_text(&config.cert)?;
        Ok(Self::new(
            cert.encode()?,
            config.sig_algo.clone(),
            config.domains.clone(),
            config.endpoints.clone(),
        ))
    }

    pub fn owns_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d == domain)
    }

    /// First HTTP(S) endpoint the node advertises.
    pub fn http_endpoint(&self) -> Result<&str> {
        self.endpoints
            .iter()
            .map(String::as_str)
            .find(|e| e.starts_with("http://") || e.starts_with("https://"))
            .ok_or_else(|| Error::Network(format!("relayer {} has no http endpoint", self.node_id)))
    }
}
