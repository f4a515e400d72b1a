use serde::{Deserialize, Serialize};

use crate::codec::{TlvReader, TlvWriter};
use crate::verify::{calculate_node_id, verify_with_cert, CredentialCodec, DefaultCredentialCodec};
use crate::{Error, Result};

const TLV_TYPE_RELAYER_REQUEST_TYPE: u16 = 0;
const TLV_TYPE_RELAYER_REQUEST_NODE_ID: u16 = 1;
const TLV_TYPE_RELAYER_REQUEST_SENDER_CERT: u16 = 2;
const TLV_TYPE_RELAYER_REQUEST_SIG_ALGO: u16 = 3;
const TLV_TYPE_RELAYER_REQUEST_PAYLOAD: u16 = 4;
const TLV_TYPE_RELAYER_REQUEST_SIG: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayerRequestType {
    #[default]
    Heartbeat,
    AmRequest,
}

impl RelayerRequestType {
    fn code(&self) -> u8 {
        match self {
            RelayerRequestType::Heartbeat => 0,
            RelayerRequestType::AmRequest => 1,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(RelayerRequestType::Heartbeat),
            1 => Ok(RelayerRequestType::AmRequest),
            other => Err(Error::Codec(format!("unknown relayer request type {}", other))),
        }
    }
}

/// Body of an `AmRequest`: one authenticated message forwarded to the relayer
/// owning the receiver domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmRequestPayload {
    pub domain_name: String,
    pub ucp_id: String,
    /// Base64 of the encoded AM.
    pub auth_msg: String,
    /// Always empty, kept for peers that still read it.
    pub udag_resp: String,
    pub ledger_info: String,
}

impl AmRequestPayload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Codec(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| Error::Codec(format!("bad am request payload: {}", e)))
    }
}

/// Signed request envelope, laid out like [`super::RelayerResponse`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayerRequest {
    pub request_type: RelayerRequestType,
    pub node_id: String,
    pub sender_relayer_certificate: Vec<u8>,
    pub sig_algo: String,
    pub request_payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl RelayerRequest {
    pub fn new(request_type: RelayerRequestType, request_payload: Vec<u8>) -> Self {
        Self {
            request_type,
            request_payload,
            ..Default::default()
        }
    }

    fn unsigned_writer(&self) -> Result<TlvWriter> {
        let mut w = TlvWriter::new();
        w.put_u8(TLV_TYPE_RELAYER_REQUEST_TYPE, self.request_type.code())?
            .put_string(TLV_TYPE_RELAYER_REQUEST_NODE_ID, &self.node_id)?
            .put_bytes(TLV_TYPE_RELAYER_REQUEST_SENDER_CERT, &self.sender_relayer_certificate)?
            .put_string(TLV_TYPE_RELAYER_REQUEST_SIG_ALGO, &self.sig_algo)?
            .put_bytes(TLV_TYPE_RELAYER_REQUEST_PAYLOAD, &self.request_payload)?;
        Ok(w)
    }

    pub fn raw_encode(&self) -> Result<Vec<u8>> {
        Ok(self.unsigned_writer()?.finish())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = self.unsigned_writer()?;
        w.put_bytes(TLV_TYPE_RELAYER_REQUEST_SIG, &self.signature)?;
        Ok(w.finish())
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut request = RelayerRequest::default();
        let mut r = TlvReader::new(raw);
        while let Some(item) = r.next_item()? {
            match item.tag {
                TLV_TYPE_RELAYER_REQUEST_TYPE => {
                    request.request_type = RelayerRequestType::from_code(item.as_u8()?)?
                }
                TLV_TYPE_RELAYER_REQUEST_NODE_ID => request.node_id = item.as_string()?,
                TLV_TYPE_RELAYER_REQUEST_SENDER_CERT => request.sender_relayer_certificate = item.as_bytes(),
                TLV_TYPE_RELAYER_REQUEST_SIG_ALGO => request.sig_algo = item.as_string()?,
                TLV_TYPE_RELAYER_REQUEST_PAYLOAD => request.request_payload = item.as_bytes(),
                TLV_TYPE_RELAYER_REQUEST_SIG => request.signature = item.as_bytes(),
                other => return Err(Error::Codec(format!("unknown relayer request tlv tag {}", other))),
            }
        }
        Ok(request)
    }

    /// Checks the signature and that the claimed node id belongs to the cert.
    pub fn verify(&self) -> Result<bool> {
        self.verify_with(&DefaultCredentialCodec)
    }

    pub fn verify_with(&self, codec: &dyn CredentialCodec) -> Result<bool> {
        if calculate_node_id(&self.sender_relayer_certificate) != self.node_id {
            return Ok(false);
        }
        verify_with_cert(
            codec,
            &self.sender_relayer_certificate,
            &self.sig_algo,
            &self.raw_encode()?,
            &self.signature,
        )
    }
}
