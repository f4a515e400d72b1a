//! Persistence boundary of the relay pipeline.

use async_trait::async_trait;

use crate::{
    types::{AuthMsgWrapper, SdpMsgWrapper},
    Result,
};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CrossChainMessageRepository: Send + Sync {
    /// Returns `false` when the record could not be updated.
    async fn update_auth_message(&self, am: &AuthMsgWrapper) -> Result<bool>;

    /// Upserts on `auth_msg_id`, so storing the same message twice is harmless.
    async fn put_sdp_message(&self, sdp: &SdpMsgWrapper) -> Result<()>;

    /// Up to `limit` AMs waiting to be processed.
    async fn peek_pending_auth_messages(&self, limit: usize) -> Result<Vec<AuthMsgWrapper>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Asks the scheduler to discover a route for this domain pair.
    async fn mark_for_domain_router_query(&self, sender_domain: &str, receiver_domain: &str) -> Result<()>;
}
