use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::verify::{CrossChainCertificate, SignAlgo};
use crate::Error;

const DEFAULT_CCMSG_FAIL_LIMIT: u32 = 10;
const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_WORKER_THREADS: usize = 8;

fn default_true() -> bool {
    true
}

fn default_ccmsg_fail_limit() -> u32 {
    DEFAULT_CCMSG_FAIL_LIMIT
}

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProcessConfig {
    /// Check governance ACL before delivering SDP messages locally.
    #[serde(default = "default_true")]
    pub sdp_acl_on: bool,
    /// A message goes `FAILED` once its send-failure count exceeds this.
    #[serde(default = "default_ccmsg_fail_limit")]
    pub ccmsg_fail_limit: u32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            sdp_acl_on: true,
            ccmsg_fail_limit: DEFAULT_CCMSG_FAIL_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    /// Relayer certificate, hex or base64.
    pub cert: String,
    pub sig_algo: String,
    pub domains: Vec<String>,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChannelConfig {
    pub sender_domain: String,
    pub receiver_domain: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            worker_threads: DEFAULT_WORKER_THREADS,
            nodes: vec![],
            channels: vec![],
        }
    }
}

impl NetworkConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CredentialConfig {
    pub cert_path: PathBuf,
    pub private_key_path: PathBuf,
    pub sig_algo: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub credential: Option<CredentialConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config = if path.extension().map_or(false, |ext| ext == "toml") {
            Self::from_toml_str(&config_str)?
        } else {
            Self::from_json_str(&config_str)?
        };

        config.validate()?;

        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.process.ccmsg_fail_limit == 0 {
            return Err(Error::Config("Cross-chain message fail limit must be greater than 0".to_string()));
        }

        let network = &self.network;
        if network.rpc_timeout_ms == 0 {
            return Err(Error::Config("Network rpc timeout must be greater than 0".to_string()));
        }
        if network.poll_interval_ms == 0 {
            return Err(Error::Config("Network poll interval must be greater than 0".to_string()));
        }
        if network.batch_size == 0 {
            return Err(Error::Config("Network batch size must be greater than 0".to_string()));
        }
        if network.worker_threads == 0 {
            return Err(Error::Config("Network worker threads must be greater than 0".to_string()));
        }

        let mut owned_domains = HashSet::new();
        for node in &network.nodes {
            node.sig_algo
                .parse::<SignAlgo>()
                .map_err(|e| Error::Config(format!("Invalid node sig algo: {}", e)))?;
            CrossChainCertificate::from_text(&node.cert)
                .map_err(|e| Error::Config(format!("Invalid node cert: {}", e)))?;
            if node.endpoints.is_empty() {
                return Err(Error::Config("Relayer node without endpoints".to_string()));
            }
            for domain in &node.domains {
                if domain.is_empty() {
                    return Err(Error::Config("Relayer node with empty domain".to_string()));
                }
                if !owned_domains.insert(domain.as_str()) {
                    return Err(Error::Config(format!("Domain {} owned by more than one relayer", domain)));
                }
            }
        }

        for channel in &network.channels {
            if channel.sender_domain.is_empty() || channel.receiver_domain.is_empty() {
                return Err(Error::Config("Cross-chain channel with empty domain".to_string()));
            }
        }

        if let Some(credential) = &self.credential {
            credential
                .sig_algo
                .parse::<SignAlgo>()
                .map_err(|e| Error::Config(format!("Invalid credential sig algo: {}", e)))?;
        }

        Ok(())
    }
}
