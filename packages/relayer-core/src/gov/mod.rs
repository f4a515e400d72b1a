use async_trait::async_trait;

use crate::Result;

#[cfg(test)]
use mockall::automock;

/// Governance oracle deciding which senders may reach which receivers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GovernManager: Send + Sync {
    async fn verify_cross_chain_msg_acl(
        &self,
        sender_domain: &str,
        sender: &str,
        receiver_domain: &str,
        receiver: &str,
    ) -> Result<bool>;
}
