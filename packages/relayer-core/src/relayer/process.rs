//! Authenticated message processing.
//!
//! Each AM is resolved against the local registry, its upper protocol decoded,
//! and the resulting SDP message either delivered to a local chain or forwarded
//! to the relayer owning the receiver domain.

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    blockchain::{BlockchainIdleCache, BlockchainManager},
    config::ProcessConfig,
    gov::GovernManager,
    network::{RelayerClient, RelayerClientPool, RelayerNetworkManager},
    repository::{CrossChainMessageRepository, ScheduleRepository},
    types::{
        AuthMsgProcessState, AuthMsgTrustLevel, AuthMsgWrapper, SdpMsgProcessState, SdpMsgWrapper,
        UpperProtocol,
    },
    Error, Result,
};

const REASON_EMPTY_RECEIVER_DOMAIN: &str = "Empty receiver domain";
const REASON_BLOCKCHAIN_MISSING: &str = "Blockchain supposed existed but not";
const REASON_ACL_REJECTED: &str = "msg rejected by ACL";

/// Services the processor depends on. All of them are shared between workers.
#[derive(Clone)]
pub struct Collaborators {
    pub message_repository: Arc<dyn CrossChainMessageRepository>,
    pub schedule_repository: Arc<dyn ScheduleRepository>,
    pub blockchain_manager: Arc<dyn BlockchainManager>,
    pub govern_manager: Arc<dyn GovernManager>,
    pub network_manager: Arc<dyn RelayerNetworkManager>,
    pub client_pool: Arc<RelayerClientPool>,
    pub idle_cache: Arc<BlockchainIdleCache>,
}

pub struct AuthMessageProcessor {
    deps: Collaborators,
    config: ProcessConfig,
    rpc_timeout: Duration,
}

impl AuthMessageProcessor {
    pub fn new(deps: Collaborators, config: ProcessConfig, rpc_timeout: Duration) -> Self {
        Self {
            deps,
            config,
            rpc_timeout,
        }
    }

    /// Processes one AM.
    ///
    /// `Ok(true)` means the message was handled, terminal failures included;
    /// `Ok(false)` means it should be retried later. The caller must not run two
    /// `process` calls for the same message at once.
    pub async fn process(&self, am: &mut AuthMsgWrapper) -> Result<bool> {
        info!(
            "process auth msg : (src_domain: {}, id: {}, if_remote: {})",
            am.domain, am.auth_msg_id, am.network_am
        );

        if am.process_state.is_terminal() {
            error!("auth msg repeat process : {}", am.auth_msg_id);
            return Ok(true);
        }
        if am.trust_level == AuthMsgTrustLevel::NegativeTrust
            && am.process_state != AuthMsgProcessState::Proved
        {
            error!(
                "auth msg with NEGATIVE_TRUST its state error : {}-{}",
                am.auth_msg_id, am.process_state
            );
            return Ok(false);
        }

        let state_before = am.process_state;
        match self.do_process(am).await {
            Ok(()) => self.deps.message_repository.update_auth_message(am).await,
            Err(e @ Error::SendAuthMessage { .. }) => {
                am.fail_count += 1;
                am.last_fail_reason = Some(e.to_string());
                if am.fail_count > self.config.ccmsg_fail_limit {
                    am.process_state = AuthMsgProcessState::Failed;
                    error!("am {} out of retry times: {}", am.auth_msg_id, e);
                } else {
                    am.process_state = state_before;
                    warn!(
                        "am {} with fail count {} process failed: {}",
                        am.auth_msg_id, am.fail_count, e
                    );
                }
                self.deps.message_repository.update_auth_message(am).await
            }
            Err(Error::CrossChainChannelNotFound {
                sender_domain,
                receiver_domain,
            }) => {
                error!(
                    "failed to process sdp (send: {}, dest: {}) because that crosschain channel not found",
                    sender_domain, receiver_domain
                );
                am.process_state = state_before;
                if let Err(e) = self
                    .deps
                    .schedule_repository
                    .mark_for_domain_router_query(&sender_domain, &receiver_domain)
                    .await
                {
                    return Err(Error::ProcessAuthMessage {
                        domain: am.domain.clone(),
                        am_id: am.auth_msg_id,
                        network_am: am.network_am,
                        source: Box::new(e),
                    });
                }
                Ok(true)
            }
            Err(e @ Error::UnknownRelayer { .. }) => Err(e),
            Err(e) => Err(Error::ProcessAuthMessage {
                domain: am.domain.clone(),
                am_id: am.auth_msg_id,
                network_am: am.network_am,
                source: Box::new(e),
            }),
        }
    }

    async fn do_process(&self, am: &mut AuthMsgWrapper) -> Result<()> {
        if am.network_am {
            self.process_remote_am(am);
        } else {
            self.process_local_am(am).await?;
        }

        if am.process_state == AuthMsgProcessState::Processed {
            let protocol = am.auth_message.upper_protocol()?;
            info!(
                "process high layer protocol {:?} of am message : (src_domain: {}, id: {}, if_remote: {})",
                protocol, am.domain, am.auth_msg_id, am.network_am
            );
            match protocol {
                UpperProtocol::Sdp => self.process_sdp_msg(am).await?,
            }
        }
        Ok(())
    }

    async fn process_local_am(&self, am: &mut AuthMsgWrapper) -> Result<()> {
        if am.product.is_empty() || am.blockchain_id.is_empty() {
            let domain_cert = self
                .deps
                .blockchain_manager
                .get_domain_cert(&am.domain)
                .await?
                .ok_or_else(|| Error::Registry(format!("domain cert not exist: {}", am.domain)))?;
            am.product = domain_cert.blockchain_product;
            am.blockchain_id = domain_cert.blockchain_id;
        }

        if am.am_client_contract_address.is_empty() {
            let meta = self
                .deps
                .blockchain_manager
                .get_blockchain_meta(&am.product, &am.blockchain_id)
                .await?
                .ok_or_else(|| {
                    Error::Registry(format!(
                        "blockchain meta not exist: {}-{}",
                        am.product, am.blockchain_id
                    ))
                })?;
            am.am_client_contract_address = meta.am_client_contract_address;
        }

        am.process_state = AuthMsgProcessState::Processed;
        Ok(())
    }

    /// AMs relayed by a peer are trusted on the strength of the peer's envelope
    /// signature.
    fn process_remote_am(&self, am: &mut AuthMsgWrapper) {
        // TODO: verify the TP-proof carried with the UCP once peers ship it.
        am.process_state = AuthMsgProcessState::Processed;
    }

    async fn process_sdp_msg(&self, am: &AuthMsgWrapper) -> Result<()> {
        let mut sdp = self.derive_sdp(am).await?;

        if sdp.is_receiver_local() || sdp.process_state == SdpMsgProcessState::MsgIllegal {
            return self.deliver_local(&mut sdp).await;
        }
        self.forward(&mut sdp, am).await
    }

    /// Decodes the SDP message of `am` and resolves its receiver against the
    /// local registry. Receiver chain fields stay empty when the receiver is
    /// not anchored here.
    pub async fn derive_sdp(&self, am: &AuthMsgWrapper) -> Result<SdpMsgWrapper> {
        let mut sdp = SdpMsgWrapper::from_auth_msg(am)?;

        if sdp.receiver_blockchain_domain.is_empty() {
            error!(
                "receiver domain is empty from am (src_domain: {}, id: {}, if_remote: {})",
                am.domain, am.auth_msg_id, am.network_am
            );
            sdp.process_state = SdpMsgProcessState::MsgIllegal;
            sdp.tx_fail_reason = Some(REASON_EMPTY_RECEIVER_DOMAIN.to_string());
            return Ok(sdp);
        }

        let blockchain_manager = &self.deps.blockchain_manager;
        if blockchain_manager.has_blockchain(&sdp.receiver_blockchain_domain).await? {
            let meta = match blockchain_manager
                .get_blockchain_meta_by_domain(&sdp.receiver_blockchain_domain)
                .await?
            {
                Some(meta) => meta,
                None => {
                    error!(
                        "receiver blockchain not exist for domain {} from am (src_domain: {}, id: {}, if_remote: {})",
                        sdp.receiver_blockchain_domain, am.domain, am.auth_msg_id, am.network_am
                    );
                    sdp.process_state = SdpMsgProcessState::MsgIllegal;
                    sdp.tx_fail_reason = Some(REASON_BLOCKCHAIN_MISSING.to_string());
                    return Ok(sdp);
                }
            };
            sdp.receiver_blockchain_id = meta.blockchain_id;
            sdp.receiver_blockchain_product = meta.product;
            sdp.receiver_am_client_contract = meta.am_client_contract_address;
            self.deps
                .idle_cache
                .set_last_am_process_time(&sdp.receiver_blockchain_product, &sdp.receiver_blockchain_id)
                .await;
        }

        sdp.process_state = SdpMsgProcessState::Pending;
        info!("parse auth msg to sdp msg : {}", sdp);
        Ok(sdp)
    }

    async fn deliver_local(&self, sdp: &mut SdpMsgWrapper) -> Result<()> {
        match sdp.process_state {
            SdpMsgProcessState::Pending => {
                self.check_acl(sdp).await?;
                if sdp.process_state == SdpMsgProcessState::MsgRejected {
                    warn!("sdp msg {} is rejected by ACL", sdp);
                }
            }
            SdpMsgProcessState::MsgIllegal => {
                error!("process illegal sdp msg {} on receiving locally", sdp);
            }
            _ => {}
        }

        self.deps.message_repository.put_sdp_message(sdp).await?;
        info!("successful to process sdp msg {} locally", sdp);
        Ok(())
    }

    /// Applies the governance ACL, marking the message rejected on a negative
    /// verdict.
    pub async fn check_acl(&self, sdp: &mut SdpMsgWrapper) -> Result<()> {
        if !self.config.sdp_acl_on || sdp.is_blockchain_self_call() {
            return Ok(());
        }

        let allowed = self
            .deps
            .govern_manager
            .verify_cross_chain_msg_acl(
                &sdp.sender_blockchain_domain,
                &sdp.msg_sender,
                &sdp.receiver_blockchain_domain,
                &sdp.msg_receiver,
            )
            .await?;
        if !allowed {
            sdp.process_state = SdpMsgProcessState::MsgRejected;
            sdp.tx_fail_reason = Some(REASON_ACL_REJECTED.to_string());
        }
        Ok(())
    }

    /// Sends `sdp` to the relayer owning its receiver domain.
    pub async fn forward(&self, sdp: &mut SdpMsgWrapper, am: &AuthMsgWrapper) -> Result<()> {
        let relayer_node_id = self
            .deps
            .network_manager
            .find_remote_relayer(&sdp.receiver_blockchain_domain)
            .await?
            .ok_or_else(|| Error::UnknownRelayer {
                domain: sdp.receiver_blockchain_domain.clone(),
            })?;

        if self
            .deps
            .blockchain_manager
            .has_blockchain(&sdp.sender_blockchain_domain)
            .await?
            && !self
                .deps
                .network_manager
                .has_cross_chain_channel(&sdp.sender_blockchain_domain, &sdp.receiver_blockchain_domain)
                .await?
        {
            return Err(Error::CrossChainChannelNotFound {
                sender_domain: sdp.sender_blockchain_domain.clone(),
                receiver_domain: sdp.receiver_blockchain_domain.clone(),
            });
        }

        if let Err(e) = self.send_to_remote(sdp, am, &relayer_node_id).await {
            self.deps.client_pool.invalidate_node(&relayer_node_id).await;
            error!(
                "failed to send message {} to remote relayer {}: {}",
                sdp, relayer_node_id, e
            );
            return Err(Error::SendAuthMessage {
                am_id: am.auth_msg_id,
                relayer_node_id,
                source: Box::new(e),
            });
        }

        sdp.process_state = SdpMsgProcessState::RemotePending;
        self.deps.message_repository.put_sdp_message(sdp).await?;
        info!(
            "successful to send message {} to remote relayer {}",
            sdp, relayer_node_id
        );
        Ok(())
    }

    async fn client_for(&self, receiver_domain: &str, relayer_node_id: &str) -> Result<Arc<dyn RelayerClient>> {
        if let Some(client) = self.deps.client_pool.get_client_by_domain(receiver_domain).await {
            return Ok(client);
        }
        let node = self
            .deps
            .network_manager
            .get_relayer_node(relayer_node_id, false)
            .await?
            .ok_or_else(|| Error::Network(format!("relayer node {} not found", relayer_node_id)))?;
        self.deps.client_pool.get_client(&node, receiver_domain).await
    }

    async fn send_to_remote(&self, sdp: &SdpMsgWrapper, am: &AuthMsgWrapper, relayer_node_id: &str) -> Result<()> {
        let client = self
            .client_for(&sdp.receiver_blockchain_domain, relayer_node_id)
            .await?;
        let auth_msg = STANDARD.encode(am.auth_message.encode()?);
        let ledger_info = String::from_utf8_lossy(&am.raw_ledger_info);

        let call = client.am_request(
            &sdp.sender_blockchain_domain,
            &am.ucp_id,
            &auth_msg,
            "",
            &ledger_info,
        );
        match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.rpc_timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blockchain::MockBlockchainManager;
    use crate::gov::MockGovernManager;
    use crate::network::{
        MockRelayerClient, MockRelayerClientFactory, MockRelayerNetworkManager, RelayerClientFactory,
        RelayerNodeInfo,
    };
    use crate::repository::{MockCrossChainMessageRepository, MockScheduleRepository};
    use crate::types::{AuthMessage, BlockchainMeta, DomainCertWrapper, SdpMessage};

    pub(crate) const CHAIN_A: &str = "chaina.com";
    pub(crate) const CHAIN_B: &str = "chainb.com";
    const NODE_R: &str = "node-r";

    pub(crate) struct Mocks {
        pub repo: MockCrossChainMessageRepository,
        pub schedule: MockScheduleRepository,
        pub blockchain: MockBlockchainManager,
        pub gov: MockGovernManager,
        pub network: MockRelayerNetworkManager,
        pub factory: Option<Arc<dyn RelayerClientFactory>>,
        pub idle_cache: Arc<BlockchainIdleCache>,
    }

    impl Mocks {
        pub(crate) fn new() -> Self {
            Self {
                repo: MockCrossChainMessageRepository::new(),
                schedule: MockScheduleRepository::new(),
                blockchain: MockBlockchainManager::new(),
                gov: MockGovernManager::new(),
                network: MockRelayerNetworkManager::new(),
                factory: None,
                idle_cache: Arc::new(BlockchainIdleCache::new()),
            }
        }

        pub(crate) fn processor(self, config: ProcessConfig) -> AuthMessageProcessor {
            self.processor_with_timeout(config, Duration::from_secs(5))
        }

        fn processor_with_timeout(self, config: ProcessConfig, rpc_timeout: Duration) -> AuthMessageProcessor {
            let factory = self
                .factory
                .unwrap_or_else(|| Arc::new(MockRelayerClientFactory::new()));
            let deps = Collaborators {
                message_repository: Arc::new(self.repo),
                schedule_repository: Arc::new(self.schedule),
                blockchain_manager: Arc::new(self.blockchain),
                govern_manager: Arc::new(self.gov),
                network_manager: Arc::new(self.network),
                client_pool: Arc::new(RelayerClientPool::new(factory)),
                idle_cache: self.idle_cache,
            };
            AuthMessageProcessor::new(deps, config, rpc_timeout)
        }

        /// Sender chain A is anchored locally with full metadata.
        pub(crate) fn with_local_sender(mut self) -> Self {
            self.blockchain.expect_get_domain_cert().returning(|domain| {
                Ok(Some(DomainCertWrapper {
                    domain: domain.to_string(),
                    blockchain_product: "mychain".to_string(),
                    blockchain_id: "chain-a".to_string(),
                    domain_cert: vec![],
                }))
            });
            self.blockchain.expect_get_blockchain_meta().returning(|product, id| {
                Ok(Some(BlockchainMeta {
                    product: product.to_string(),
                    blockchain_id: id.to_string(),
                    am_client_contract_address: "0xam-a".to_string(),
                }))
            });
            self
        }

        /// Which domains the registry knows, and whether their metadata exists.
        pub(crate) fn with_registry(mut self, local: &'static [&'static str], meta_present: bool) -> Self {
            self.blockchain
                .expect_has_blockchain()
                .returning(move |domain: &str| Ok(local.contains(&domain)));
            self.blockchain
                .expect_get_blockchain_meta_by_domain()
                .returning(move |domain: &str| {
                    Ok(meta_present.then(|| BlockchainMeta {
                        product: "mychain".to_string(),
                        blockchain_id: format!("id-{}", domain),
                        am_client_contract_address: format!("0xam-{}", domain),
                    }))
                });
            self
        }

        pub(crate) fn expect_am_update(mut self, times: usize) -> Self {
            self.repo.expect_update_auth_message().times(times).returning(|_| Ok(true));
            self
        }
    }

    pub(crate) fn sdp_am(id: u64, receiver_domain: &str, network_am: bool) -> AuthMsgWrapper {
        let sdp = SdpMessage {
            version: 2,
            target_domain: receiver_domain.to_string(),
            target_identity: vec![0xbb; 32],
            sequence: 1,
            payload: b"cross-chain".to_vec(),
        };
        let am = AuthMessage::new(vec![0xaa; 32], UpperProtocol::Sdp, sdp.encode().unwrap());
        AuthMsgWrapper::new(id, CHAIN_A, format!("ucp-{}", id), am, b"ledger-proof".to_vec(), network_am)
    }

    fn remote_node() -> RelayerNodeInfo {
        let mut node = RelayerNodeInfo::new(vec![1, 2, 3], "Ed25519", vec![CHAIN_B.to_string()], vec![]);
        node.node_id = NODE_R.to_string();
        node
    }

    /// Receiver B is owned by NODE_R and the channel A -> B exists.
    fn with_remote_route(mut mocks: Mocks) -> Mocks {
        mocks
            .network
            .expect_find_remote_relayer()
            .returning(|_| Ok(Some(NODE_R.to_string())));
        mocks
            .network
            .expect_has_cross_chain_channel()
            .returning(|_, _| Ok(true));
        mocks
            .network
            .expect_get_relayer_node()
            .returning(|_, _| Ok(Some(remote_node())));
        mocks
    }

    fn factory_with(client: MockRelayerClient, builds: usize) -> Arc<dyn RelayerClientFactory> {
        let client: Arc<dyn RelayerClient> = Arc::new(client);
        let mut factory = MockRelayerClientFactory::new();
        factory
            .expect_create_client()
            .times(builds)
            .returning(move |_| Ok(client.clone()));
        Arc::new(factory)
    }

    #[tokio::test]
    async fn test_terminal_states_are_not_reprocessed() {
        for state in [AuthMsgProcessState::Processed, AuthMsgProcessState::Rejected] {
            let processor = Mocks::new().processor(ProcessConfig::default());
            let mut am = sdp_am(1, CHAIN_B, false).with_process_state(state);
            let before = am.clone();

            assert!(processor.process(&mut am).await.unwrap());
            assert!(processor.process(&mut am).await.unwrap());
            assert_eq!(am, before);
        }
    }

    #[tokio::test]
    async fn test_negative_trust_waits_for_proof() {
        for state in [AuthMsgProcessState::Pending, AuthMsgProcessState::Failed] {
            let processor = Mocks::new().processor(ProcessConfig::default());
            let mut am = sdp_am(1, CHAIN_B, false)
                .with_trust_level(AuthMsgTrustLevel::NegativeTrust)
                .with_process_state(state);

            assert!(!processor.process(&mut am).await.unwrap());
            assert_eq!(am.process_state, state);
        }
    }

    #[tokio::test]
    async fn test_proved_negative_trust_is_processed() {
        let mut mocks = Mocks::new()
            .with_local_sender()
            .with_registry(&[CHAIN_A, CHAIN_B], true)
            .expect_am_update(1);
        mocks.gov.expect_verify_cross_chain_msg_acl().returning(|_, _, _, _| Ok(true));
        mocks.repo.expect_put_sdp_message().times(1).returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, false)
            .with_trust_level(AuthMsgTrustLevel::NegativeTrust)
            .with_process_state(AuthMsgProcessState::Proved);
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.process_state, AuthMsgProcessState::Processed);
    }

    #[tokio::test]
    async fn test_local_to_local_delivery() {
        let mut mocks = Mocks::new()
            .with_local_sender()
            .with_registry(&[CHAIN_A, CHAIN_B], true)
            .expect_am_update(1);
        let idle_cache = mocks.idle_cache.clone();
        mocks
            .gov
            .expect_verify_cross_chain_msg_acl()
            .withf(|sd: &str, _s: &str, rd: &str, r: &str| sd == CHAIN_A && rd == CHAIN_B && r == hex::encode([0xbb; 32]))
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        mocks
            .repo
            .expect_put_sdp_message()
            .withf(|sdp: &SdpMsgWrapper| {
                sdp.process_state == SdpMsgProcessState::Pending
                    && sdp.receiver_blockchain_id == format!("id-{}", CHAIN_B)
                    && sdp.receiver_blockchain_product == "mychain"
                    && sdp.receiver_am_client_contract == format!("0xam-{}", CHAIN_B)
            })
            .times(1)
            .returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, false);
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.process_state, AuthMsgProcessState::Processed);
        assert_eq!(am.product, "mychain");
        assert_eq!(am.blockchain_id, "chain-a");
        assert_eq!(am.am_client_contract_address, "0xam-a");
        assert!(idle_cache
            .last_am_process_time("mychain", &format!("id-{}", CHAIN_B))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_local_delivery_rejected_by_acl() {
        let mut mocks = Mocks::new()
            .with_local_sender()
            .with_registry(&[CHAIN_A, CHAIN_B], true)
            .expect_am_update(1);
        mocks.gov.expect_verify_cross_chain_msg_acl().returning(|_, _, _, _| Ok(false));
        mocks
            .repo
            .expect_put_sdp_message()
            .withf(|sdp: &SdpMsgWrapper| {
                sdp.process_state == SdpMsgProcessState::MsgRejected
                    && sdp.tx_fail_reason.as_deref() == Some(REASON_ACL_REJECTED)
            })
            .times(1)
            .returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, false);
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.process_state, AuthMsgProcessState::Processed);
    }

    #[tokio::test]
    async fn test_acl_bypassed_when_off_or_self_call() {
        let processor = Mocks::new().processor(ProcessConfig {
            sdp_acl_on: false,
            ..Default::default()
        });
        let mut sdp = SdpMsgWrapper::from_auth_msg(&sdp_am(1, CHAIN_B, false)).unwrap();
        processor.check_acl(&mut sdp).await.unwrap();
        assert_eq!(sdp.process_state, SdpMsgProcessState::Pending);

        let processor = Mocks::new().processor(ProcessConfig::default());
        let mut sdp = SdpMsgWrapper::from_auth_msg(&sdp_am(1, CHAIN_A, false)).unwrap();
        assert!(sdp.is_blockchain_self_call());
        processor.check_acl(&mut sdp).await.unwrap();
        assert_eq!(sdp.process_state, SdpMsgProcessState::Pending);
    }

    #[tokio::test]
    async fn test_derive_empty_receiver_is_illegal_without_lookups() {
        let processor = Mocks::new().processor(ProcessConfig::default());
        let sdp = processor.derive_sdp(&sdp_am(1, "", false)).await.unwrap();
        assert_eq!(sdp.process_state, SdpMsgProcessState::MsgIllegal);
        assert_eq!(sdp.tx_fail_reason.as_deref(), Some(REASON_EMPTY_RECEIVER_DOMAIN));
    }

    #[tokio::test]
    async fn test_derive_local_receiver_without_meta_is_illegal() {
        let processor = Mocks::new()
            .with_registry(&[CHAIN_B], false)
            .processor(ProcessConfig::default());
        let sdp = processor.derive_sdp(&sdp_am(1, CHAIN_B, false)).await.unwrap();
        assert_eq!(sdp.process_state, SdpMsgProcessState::MsgIllegal);
        assert_eq!(sdp.tx_fail_reason.as_deref(), Some(REASON_BLOCKCHAIN_MISSING));
        assert!(sdp.receiver_blockchain_id.is_empty());
    }

    #[tokio::test]
    async fn test_derive_unknown_receiver_left_for_forwarding() {
        let processor = Mocks::new()
            .with_registry(&[CHAIN_A], true)
            .processor(ProcessConfig::default());
        let sdp = processor.derive_sdp(&sdp_am(1, CHAIN_B, false)).await.unwrap();
        assert_eq!(sdp.process_state, SdpMsgProcessState::Pending);
        assert!(sdp.receiver_blockchain_id.is_empty());
        assert!(sdp.receiver_blockchain_product.is_empty());
        assert!(sdp.receiver_am_client_contract.is_empty());
    }

    #[tokio::test]
    async fn test_illegal_network_message_is_persisted() {
        let mut mocks = Mocks::new().expect_am_update(1);
        mocks
            .repo
            .expect_put_sdp_message()
            .withf(|sdp: &SdpMsgWrapper| sdp.process_state == SdpMsgProcessState::MsgIllegal)
            .times(1)
            .returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, "", true);
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.process_state, AuthMsgProcessState::Processed);
    }

    #[tokio::test]
    async fn test_remote_forwarding() {
        let am = sdp_am(7, CHAIN_B, false);
        let expected_msg = STANDARD.encode(am.auth_message.encode().unwrap());

        let mut client = MockRelayerClient::new();
        client
            .expect_am_request()
            .withf(move |sender: &str, ucp: &str, msg: &str, udag: &str, ledger: &str| {
                sender == CHAIN_A && ucp == "ucp-7" && msg == expected_msg && udag.is_empty() && ledger == "ledger-proof"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let mut mocks = with_remote_route(Mocks::new().with_local_sender().with_registry(&[CHAIN_A], true))
            .expect_am_update(1);
        mocks.factory = Some(factory_with(client, 1));
        mocks
            .repo
            .expect_put_sdp_message()
            .withf(|sdp: &SdpMsgWrapper| sdp.process_state == SdpMsgProcessState::RemotePending)
            .times(1)
            .returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = am;
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.process_state, AuthMsgProcessState::Processed);
        assert_eq!(am.fail_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_relayer_is_fatal() {
        let mut mocks = Mocks::new().with_local_sender().with_registry(&[CHAIN_A], true);
        mocks.network.expect_find_remote_relayer().returning(|_| Ok(None));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, false);
        let err = processor.process(&mut am).await.unwrap_err();
        assert!(matches!(err, Error::UnknownRelayer { ref domain } if domain == CHAIN_B));
    }

    #[tokio::test]
    async fn test_missing_channel_schedules_route_query() {
        let mut mocks = Mocks::new().with_local_sender().with_registry(&[CHAIN_A], true);
        mocks
            .network
            .expect_find_remote_relayer()
            .returning(|_| Ok(Some(NODE_R.to_string())));
        mocks
            .network
            .expect_has_cross_chain_channel()
            .returning(|_, _| Ok(false));
        mocks
            .schedule
            .expect_mark_for_domain_router_query()
            .withf(|s: &str, r: &str| s == CHAIN_A && r == CHAIN_B)
            .times(1)
            .returning(|_, _| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, false);
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.fail_count, 0);
        assert_eq!(am.process_state, AuthMsgProcessState::Pending);
    }

    #[tokio::test]
    async fn test_channel_not_checked_for_foreign_sender() {
        let mut client = MockRelayerClient::new();
        client.expect_am_request().times(1).returning(|_, _, _, _, _| Ok(()));

        let mut mocks = Mocks::new().with_registry(&[], true).expect_am_update(1);
        mocks
            .network
            .expect_find_remote_relayer()
            .returning(|_| Ok(Some(NODE_R.to_string())));
        mocks
            .network
            .expect_get_relayer_node()
            .returning(|_, _| Ok(Some(remote_node())));
        mocks.factory = Some(factory_with(client, 1));
        mocks.repo.expect_put_sdp_message().times(1).returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, true);
        assert!(processor.process(&mut am).await.unwrap());
    }

    #[tokio::test]
    async fn test_send_failures_until_limit() {
        let mut client = MockRelayerClient::new();
        client
            .expect_am_request()
            .times(2)
            .returning(|_, _, _, _, _| Err(Error::Network("peer down".to_string())));

        let mut mocks = with_remote_route(Mocks::new().with_local_sender().with_registry(&[CHAIN_A], true))
            .expect_am_update(2);
        mocks.factory = Some(factory_with(client, 2));
        let processor = mocks.processor(ProcessConfig {
            ccmsg_fail_limit: 2,
            ..Default::default()
        });

        let mut am = sdp_am(1, CHAIN_B, false);
        am.fail_count = 1;
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.fail_count, 2);
        assert_eq!(am.process_state, AuthMsgProcessState::Pending);
        assert!(am.last_fail_reason.as_deref().unwrap_or_default().contains("peer down"));

        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.fail_count, 3);
        assert_eq!(am.process_state, AuthMsgProcessState::Failed);
    }

    #[tokio::test]
    async fn test_failed_send_rebuilds_peer_client() {
        let mut client = MockRelayerClient::new();
        let mut calls = 0;
        client.expect_am_request().times(2).returning(move |_, _, _, _, _| {
            calls += 1;
            if calls == 1 {
                Err(Error::Network("connection reset".to_string()))
            } else {
                Ok(())
            }
        });

        let mut mocks = with_remote_route(Mocks::new().with_local_sender().with_registry(&[CHAIN_A], true))
            .expect_am_update(2);
        mocks.factory = Some(factory_with(client, 2));
        mocks
            .repo
            .expect_put_sdp_message()
            .withf(|sdp: &SdpMsgWrapper| sdp.process_state == SdpMsgProcessState::RemotePending)
            .times(1)
            .returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, false);
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.fail_count, 1);
        assert_eq!(am.process_state, AuthMsgProcessState::Pending);

        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.fail_count, 1);
        assert_eq!(am.process_state, AuthMsgProcessState::Processed);
    }

    #[tokio::test]
    async fn test_route_query_failure_carries_message_context() {
        let mut mocks = Mocks::new().with_local_sender().with_registry(&[CHAIN_A], true);
        mocks
            .network
            .expect_find_remote_relayer()
            .returning(|_| Ok(Some(NODE_R.to_string())));
        mocks
            .network
            .expect_has_cross_chain_channel()
            .returning(|_, _| Ok(false));
        mocks
            .schedule
            .expect_mark_for_domain_router_query()
            .returning(|_, _| Err(Error::Repository("schedule table locked".to_string())));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(4, CHAIN_B, false);
        match processor.process(&mut am).await.unwrap_err() {
            Error::ProcessAuthMessage {
                domain,
                am_id,
                network_am,
                source,
            } => {
                assert_eq!(domain, CHAIN_A);
                assert_eq!(am_id, 4);
                assert!(!network_am);
                assert!(matches!(*source, Error::Repository(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_peer_times_out() {
        struct SlowClient;

        #[async_trait::async_trait]
        impl RelayerClient for SlowClient {
            async fn am_request(&self, _: &str, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }

        let mut factory = MockRelayerClientFactory::new();
        factory
            .expect_create_client()
            .returning(|_| Ok(Arc::new(SlowClient) as Arc<dyn RelayerClient>));
        let mut mocks = with_remote_route(Mocks::new().with_local_sender().with_registry(&[CHAIN_A], true))
            .expect_am_update(1);
        mocks.factory = Some(Arc::new(factory));
        let processor = mocks.processor_with_timeout(ProcessConfig::default(), Duration::from_millis(20));

        let mut am = sdp_am(1, CHAIN_B, false);
        assert!(processor.process(&mut am).await.unwrap());
        assert_eq!(am.fail_count, 1);
        assert!(am.last_fail_reason.as_deref().unwrap_or_default().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_unsupported_protocol_is_fatal() {
        let processor = Mocks::new().processor(ProcessConfig::default());
        let mut am = sdp_am(1, CHAIN_B, true);
        am.auth_message.upper_protocol = 9;

        let err = processor.process(&mut am).await.unwrap_err();
        match err {
            Error::ProcessAuthMessage { source, network_am, .. } => {
                assert!(network_am);
                assert!(matches!(*source, Error::UnsupportedProtocol(9)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_domain_cert_is_fatal() {
        let mut mocks = Mocks::new();
        mocks.blockchain.expect_get_domain_cert().returning(|_| Ok(None));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, CHAIN_B, false);
        let err = processor.process(&mut am).await.unwrap_err();
        assert!(matches!(err, Error::ProcessAuthMessage { .. }));
        assert!(err.to_string().contains(CHAIN_A));
    }

    #[tokio::test]
    async fn test_failed_persistence_reported() {
        let mut mocks = Mocks::new();
        mocks.repo.expect_update_auth_message().times(1).returning(|_| Ok(false));
        mocks.repo.expect_put_sdp_message().returning(|_| Ok(()));
        let processor = mocks.processor(ProcessConfig::default());

        let mut am = sdp_am(1, "", true);
        assert!(!processor.process(&mut am).await.unwrap());
    }
}
