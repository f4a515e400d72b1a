use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Upper layer protocols carried inside an authenticated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpperProtocol {
    Sdp,
}

impl UpperProtocol {
    pub const SDP_CODE: u32 = 0;

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            Self::SDP_CODE => Ok(UpperProtocol::Sdp),
            other => Err(Error::UnsupportedProtocol(other)),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            UpperProtocol::Sdp => Self::SDP_CODE,
        }
    }
}

/// Message emitted by the AM contract of a source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMessage {
    pub version: u32,
    pub identity: Vec<u8>,
    pub upper_protocol: u32,
    pub payload: Vec<u8>,
}

impl AuthMessage {
    pub fn new(identity: Vec<u8>, upper_protocol: UpperProtocol, payload: Vec<u8>) -> Self {
        Self {
            version: 1,
            identity,
            upper_protocol: upper_protocol.code(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(self).map_err(|e| Error::Codec(format!("failed to encode auth message: {}", e)))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        bcs::from_bytes(raw).map_err(|e| Error::Codec(format!("failed to decode auth message: {}", e)))
    }

    pub fn upper_protocol(&self) -> Result<UpperProtocol> {
        UpperProtocol::from_code(self.upper_protocol)
    }
}

/// Smart Data Protocol message, the payload of an SDP-tagged AM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpMessage {
    pub version: u32,
    pub target_domain: String,
    pub target_identity: Vec<u8>,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

impl SdpMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(self).map_err(|e| Error::Codec(format!("failed to encode sdp message: {}", e)))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        bcs::from_bytes(raw).map_err(|e| Error::Codec(format!("failed to decode sdp message: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMsgProcessState {
    Pending,
    /// Proof attached to a `NegativeTrust` message, ready for processing.
    Proved,
    Processed,
    Rejected,
    Failed,
}

impl AuthMsgProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthMsgProcessState::Processed | AuthMsgProcessState::Rejected)
    }
}

impl fmt::Display for AuthMsgProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMsgProcessState::Pending => "PENDING",
            AuthMsgProcessState::Proved => "PROVED",
            AuthMsgProcessState::Processed => "PROCESSED",
            AuthMsgProcessState::Rejected => "REJECTED",
            AuthMsgProcessState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMsgTrustLevel {
    PositiveTrust,
    NegativeTrust,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SdpMsgProcessState {
    Pending,
    MsgIllegal,
    MsgRejected,
    RemotePending,
    Processed,
}

impl fmt::Display for SdpMsgProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpMsgProcessState::Pending => "PENDING",
            SdpMsgProcessState::MsgIllegal => "MSG_ILLEGAL",
            SdpMsgProcessState::MsgRejected => "MSG_REJECTED",
            SdpMsgProcessState::RemotePending => "REMOTE_PENDING",
            SdpMsgProcessState::Processed => "PROCESSED",
        };
        f.write_str(name)
    }
}

/// Processing record for one authenticated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthMsgWrapper {
    pub auth_msg_id: u64,
    pub domain: String,
    pub product: String,
    pub blockchain_id: String,
    /// Unique id of the cross-chain packet that carried this AM.
    pub ucp_id: String,
    pub am_client_contract_address: String,
    pub process_state: AuthMsgProcessState,
    pub trust_level: AuthMsgTrustLevel,
    pub fail_count: u32,
    pub last_fail_reason: Option<String>,
    pub network_am: bool,
    pub auth_message: AuthMessage,
    pub raw_ledger_info: Vec<u8>,
}

impl AuthMsgWrapper {
    pub fn new(
        auth_msg_id: u64,
        domain: impl Into<String>,
        ucp_id: impl Into<String>,
        auth_message: AuthMessage,
        raw_ledger_info: Vec<u8>,
        network_am: bool,
    ) -> Self {
        Self {
            auth_msg_id,
            domain: domain.into(),
            product: String::new(),
            blockchain_id: String::new(),
            ucp_id: ucp_id.into(),
            am_client_contract_address: String::new(),
            process_state: AuthMsgProcessState::Pending,
            trust_level: AuthMsgTrustLevel::PositiveTrust,
            fail_count: 0,
            last_fail_reason: None,
            network_am,
            auth_message,
            raw_ledger_info,
        }
    }

    pub fn with_trust_level(mut self, trust_level: AuthMsgTrustLevel) -> Self {
        self.trust_level = trust_level;
        self
    }

    pub fn with_process_state(mut self, state: AuthMsgProcessState) -> Self {
        self.process_state = state;
        self
    }
}

/// SDP view of an [`AuthMsgWrapper`], derived once the upper protocol is known.
///
/// Refers back to its AM by `auth_msg_id`; it is persisted on its own once
/// dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpMsgWrapper {
    pub auth_msg_id: u64,
    pub version: u32,
    pub sender_blockchain_domain: String,
    pub msg_sender: String,
    pub receiver_blockchain_domain: String,
    pub msg_receiver: String,
    pub msg_sequence: u32,
    pub receiver_blockchain_product: String,
    /// Non-empty iff the receiver chain is anchored on this relayer.
    pub receiver_blockchain_id: String,
    pub receiver_am_client_contract: String,
    pub process_state: SdpMsgProcessState,
    pub tx_fail_reason: Option<String>,
    pub sdp_message: SdpMessage,
}

impl SdpMsgWrapper {
    /// Decodes the SDP payload of `am`. Receiver chain fields stay empty.
    pub fn from_auth_msg(am: &AuthMsgWrapper) -> Result<Self> {
        let sdp_message = SdpMessage::decode(&am.auth_message.payload)?;
        Ok(Self {
            auth_msg_id: am.auth_msg_id,
            version: sdp_message.version,
            sender_blockchain_domain: am.domain.clone(),
            msg_sender: hex::encode(&am.auth_message.identity),
            receiver_blockchain_domain: sdp_message.target_domain.clone(),
            msg_receiver: hex::encode(&sdp_message.target_identity),
            msg_sequence: sdp_message.sequence,
            receiver_blockchain_product: String::new(),
            receiver_blockchain_id: String::new(),
            receiver_am_client_contract: String::new(),
            process_state: SdpMsgProcessState::Pending,
            tx_fail_reason: None,
            sdp_message,
        })
    }

    pub fn is_blockchain_self_call(&self) -> bool {
        self.sender_blockchain_domain == self.receiver_blockchain_domain
    }

    pub fn is_receiver_local(&self) -> bool {
        !self.receiver_blockchain_id.is_empty()
    }
}

impl fmt::Display for SdpMsgWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "( version: {}, from_blockchain: {}, sender: {}, receiver_blockchain: {}, receiver: {}, seq: {}, am_id: {} )",
            self.version,
            self.sender_blockchain_domain,
            self.msg_sender,
            self.receiver_blockchain_domain,
            self.msg_receiver,
            self.msg_sequence,
            self.auth_msg_id
        )
    }
}

/// Domain certificate binding as kept by the blockchain registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainCertWrapper {
    pub domain: String,
    pub blockchain_product: String,
    pub blockchain_id: String,
    pub domain_cert: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockchainMeta {
    pub product: String,
    pub blockchain_id: String,
    pub am_client_contract_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdp_am(target_domain: &str) -> AuthMsgWrapper {
        let sdp = SdpMessage {
            version: 2,
            target_domain: target_domain.to_string(),
            target_identity: vec![0xbb; 32],
            sequence: 7,
            payload: b"hello".to_vec(),
        };
        let am = AuthMessage::new(vec![0xaa; 32], UpperProtocol::Sdp, sdp.encode().unwrap());
        AuthMsgWrapper::new(1, "chaina.com", "ucp-1", am, vec![], false)
    }

    #[test]
    fn test_upper_protocol_codes() {
        assert_eq!(UpperProtocol::from_code(0).unwrap(), UpperProtocol::Sdp);
        assert!(matches!(UpperProtocol::from_code(3), Err(Error::UnsupportedProtocol(3))));
    }

    #[test]
    fn test_terminal_states() {
        assert!(AuthMsgProcessState::Processed.is_terminal());
        assert!(AuthMsgProcessState::Rejected.is_terminal());
        assert!(!AuthMsgProcessState::Failed.is_terminal());
        assert!(!AuthMsgProcessState::Proved.is_terminal());
    }

    #[test]
    fn test_sdp_wrapper_from_auth_msg() {
        let am = sdp_am("chainb.com");
        let sdp = SdpMsgWrapper::from_auth_msg(&am).unwrap();

        assert_eq!(sdp.sender_blockchain_domain, "chaina.com");
        assert_eq!(sdp.receiver_blockchain_domain, "chainb.com");
        assert_eq!(sdp.msg_sender, hex::encode([0xaa; 32]));
        assert_eq!(sdp.msg_receiver, hex::encode([0xbb; 32]));
        assert_eq!(sdp.msg_sequence, 7);
        assert!(!sdp.is_receiver_local());
        assert!(!sdp.is_blockchain_self_call());
    }

    #[test]
    fn test_sdp_wrapper_rejects_garbage_payload() {
        let mut am = sdp_am("chainb.com");
        am.auth_message.payload = vec![0xff; 3];
        assert!(matches!(SdpMsgWrapper::from_auth_msg(&am), Err(Error::Codec(_))));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SdpMsgProcessState::RemotePending.to_string(), "REMOTE_PENDING");
        assert_eq!(AuthMsgProcessState::Failed.to_string(), "FAILED");
    }
}
