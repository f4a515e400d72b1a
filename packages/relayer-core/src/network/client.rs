use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{
    AmRequestPayload, RelayerClient, RelayerClientFactory, RelayerNodeInfo, RelayerRequest,
    RelayerRequestType, RelayerResponse,
};
use crate::verify::{CredentialCodec, RelayerCredentialManager};
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct RelayerRequestBody {
    #[serde(rename = "relayerRequest")]
    relayer_request: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelayerResponseBody {
    #[serde(rename = "relayerResponse")]
    relayer_response: String,
}

/// Talks to one peer relayer over HTTP(S), posting signed request envelopes
/// and checking the signed responses.
pub struct HttpRelayerClient {
    http: reqwest::Client,
    endpoint: String,
    node: RelayerNodeInfo,
    credential: Arc<RelayerCredentialManager>,
    codec: Arc<dyn CredentialCodec>,
    timeout: Duration,
}

impl HttpRelayerClient {
    pub fn new(
        node: RelayerNodeInfo,
        credential: Arc<RelayerCredentialManager>,
        codec: Arc<dyn CredentialCodec>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = node.http_endpoint()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            node,
            credential,
            codec,
            timeout,
        })
    }

    fn map_http_err(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout.as_millis() as u64)
        } else {
            Error::Network(format!("request to relayer {} failed: {}", self.node.node_id, e))
        }
    }

    async fn send_request(&self, request_type: RelayerRequestType, payload: Vec<u8>) -> Result<RelayerResponse> {
        let mut request = RelayerRequest::new(request_type, payload);
        self.credential.sign_relayer_request(&mut request)?;
        let body = RelayerRequestBody {
            relayer_request: STANDARD.encode(request.encode()?),
        };

        debug!("Sending {:?} to relayer {} at {}", request_type, self.node.node_id, self.endpoint);
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_http_err(e))?;
        if !resp.status().is_success() {
            return Err(Error::Network(format!(
                "relayer {} answered http status {}",
                self.node.node_id,
                resp.status()
            )));
        }

        let body: RelayerResponseBody = resp.json().await.map_err(|e| self.map_http_err(e))?;
        let raw = STANDARD
            .decode(body.relayer_response.as_bytes())
            .map_err(|e| Error::Codec(format!("relayer response is not base64: {}", e)))?;
        let response = RelayerResponse::decode(&raw)?;

        if !response.verify_with(self.codec.as_ref())? {
            warn!("Invalid response signature from relayer {}", self.node.node_id);
            return Err(Error::Crypto(format!(
                "signature of response from relayer {} is invalid",
                self.node.node_id
            )));
        }
        let responder = response.calc_relayer_node_id();
        if responder != self.node.node_id {
            return Err(Error::Network(format!(
                "expected response from relayer {} but {} answered",
                self.node.node_id, responder
            )));
        }
        if !response.is_success() {
            return Err(Error::Network(format!(
                "relayer {} returned failure: {}",
                self.node.node_id, response.response_message
            )));
        }

        Ok(response)
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.send_request(RelayerRequestType::Heartbeat, vec![]).await?;
        Ok(())
    }
}

#[async_trait]
impl RelayerClient for HttpRelayerClient {
    async fn am_request(
        &self,
        sender_domain: &str,
        ucp_id: &str,
        auth_msg: &str,
        udag_resp: &str,
        raw_ledger_info: &str,
    ) -> Result<()> {
        let payload = AmRequestPayload {
            domain_name: sender_domain.to_string(),
            ucp_id: ucp_id.to_string(),
            auth_msg: auth_msg.to_string(),
            udag_resp: udag_resp.to_string(),
            ledger_info: raw_ledger_info.to_string(),
        };
        self.send_request(RelayerRequestType::AmRequest, payload.encode()?).await?;
        Ok(())
    }
}

/// Builds [`HttpRelayerClient`]s, checking each peer with a heartbeat first.
pub struct HttpRelayerClientFactory {
    credential: Arc<RelayerCredentialManager>,
    codec: Arc<dyn CredentialCodec>,
    timeout: Duration,
}

impl HttpRelayerClientFactory {
    pub fn new(credential: Arc<RelayerCredentialManager>, codec: Arc<dyn CredentialCodec>, timeout: Duration) -> Self {
        Self {
            credential,
            codec,
            timeout,
        }
    }
}

#[async_trait]
impl RelayerClientFactory for HttpRelayerClientFactory {
    async fn create_client(&self, node: &RelayerNodeInfo) -> Result<Arc<dyn RelayerClient>> {
        let client = HttpRelayerClient::new(
            node.clone(),
            self.credential.clone(),
            self.codec.clone(),
            self.timeout,
        )?;
        client.heartbeat().await?;
        info!("Connected to relayer {} at {}", node.node_id, client.endpoint);
        Ok(Arc::new(client))
    }
}
