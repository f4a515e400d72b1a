pub mod config;
pub mod types;
pub mod codec;
pub mod verify;
pub mod network;
pub mod blockchain;
pub mod repository;
pub mod gov;
pub mod relayer;

pub use config::Config;
pub use types::{
    AuthMessage, AuthMsgProcessState, AuthMsgTrustLevel, AuthMsgWrapper, SdpMessage,
    SdpMsgProcessState, SdpMsgWrapper, UpperProtocol,
};
pub use network::{RelayerNodeInfo, RelayerRequest, RelayerResponse};
pub use relayer::{AuthMessageProcessor, Collaborators, Relayer};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Unsupported am upper protocol type: {0}")]
    UnsupportedProtocol(u32),

    #[error("relayer not exist for dest domain {domain}")]
    UnknownRelayer { domain: String },

    #[error("crosschain channel not exist (send: {sender_domain}, dest: {receiver_domain})")]
    CrossChainChannelNotFound {
        sender_domain: String,
        receiver_domain: String,
    },

    #[error("failed to send am {am_id} to remote relayer {relayer_node_id}: {source}")]
    SendAuthMessage {
        am_id: u64,
        relayer_node_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("process auth msg failed: (src_domain: {domain}, id: {am_id}, if_remote: {network_am}): {source}")]
    ProcessAuthMessage {
        domain: String,
        am_id: u64,
        network_am: bool,
        #[source]
        source: Box<Error>,
    },

    #[error("Timeout after {0} ms")]
    Timeout(u64),
}
