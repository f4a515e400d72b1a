use serde::{Deserialize, Serialize};

use crate::codec::{TlvReader, TlvWriter};
use crate::network::RelayerNetworkManager;
use crate::verify::{calculate_node_id, verify_with_cert, CredentialCodec, DefaultCredentialCodec};
use crate::{Error, Result};

pub const TLV_TYPE_RELAYER_RESPONSE_CODE: u16 = 0;
pub const TLV_TYPE_RELAYER_RESPONSE_MSG: u16 = 1;
pub const TLV_TYPE_RELAYER_RESPONSE_PAYLOAD: u16 = 2;
pub const TLV_TYPE_RELAYER_RESPONSE_REMOTE_RELAYER_CERT: u16 = 3;
pub const TLV_TYPE_RELAYER_RESPONSE_REMOTE_SIG_ALGO: u16 = 4;
pub const TLV_TYPE_RELAYER_RESPONSE_SIG: u16 = 5;

/// Payload carried as the string body of a response.
pub trait ResponsePayload {
    fn encode(&self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRespPayload {
    #[serde(rename = "network_id")]
    pub remote_network_id: String,
    #[serde(rename = "remote_node_info")]
    pub remote_node_info: String,
}

impl HandshakeRespPayload {
    pub fn decode_from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Codec(format!("bad handshake payload: {}", e)))
    }
}

impl ResponsePayload for HandshakeRespPayload {
    fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Codec(e.to_string()))
    }
}

/// Signed response envelope exchanged between relayers.
///
/// The signature covers [`RelayerResponse::raw_encode`], i.e. every field but
/// the signature itself. Nothing in the payload should be trusted before
/// [`RelayerResponse::verify`] passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayerResponse {
    pub response_code: i8,
    pub response_message: String,
    pub response_payload: String,
    pub remote_relayer_certificate: Vec<u8>,
    pub sig_algo: String,
    pub signature: Vec<u8>,
}

impl RelayerResponse {
    pub const SUCCESS: i8 = 0;
    pub const FAILED: i8 = -1;

    pub fn create_success_response(
        payload: Option<&dyn ResponsePayload>,
        relayer_network_manager: &dyn RelayerNetworkManager,
    ) -> Result<Self> {
        Self::create_response(Self::SUCCESS, "", payload, relayer_network_manager)
    }

    pub fn create_failure_response(
        error_msg: &str,
        payload: Option<&dyn ResponsePayload>,
        relayer_network_manager: &dyn RelayerNetworkManager,
    ) -> Result<Self> {
        Self::create_response(Self::FAILED, error_msg, payload, relayer_network_manager)
    }

    pub fn create_response(
        response_code: i8,
        message: &str,
        payload: Option<&dyn ResponsePayload>,
        relayer_network_manager: &dyn RelayerNetworkManager,
    ) -> Result<Self> {
        let mut response = RelayerResponse {
            response_code,
            response_message: message.to_string(),
            response_payload: match payload {
                Some(payload) => payload.encode()?,
                None => String::new(),
            },
            ..Default::default()
        };
        relayer_network_manager.sign_relayer_response(&mut response)?;
        Ok(response)
    }

    fn unsigned_writer(&self) -> Result<TlvWriter> {
        let mut w = TlvWriter::new();
        w.put_u8(TLV_TYPE_RELAYER_RESPONSE_CODE, self.response_code as u8)?
            .put_string(TLV_TYPE_RELAYER_RESPONSE_MSG, &self.response_message)?
            .put_string(TLV_TYPE_RELAYER_RESPONSE_PAYLOAD, &self.response_payload)?
            .put_bytes(TLV_TYPE_RELAYER_RESPONSE_REMOTE_RELAYER_CERT, &self.remote_relayer_certificate)?
            .put_string(TLV_TYPE_RELAYER_RESPONSE_REMOTE_SIG_ALGO, &self.sig_algo)?;
        Ok(w)
    }

    /// Bytes covered by the signature.
    pub fn raw_encode(&self) -> Result<Vec<u8>> {
        Ok(self.unsigned_writer()?.finish())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = self.unsigned_writer()?;
        w.put_bytes(TLV_TYPE_RELAYER_RESPONSE_SIG, &self.signature)?;
        Ok(w.finish())
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut response = RelayerResponse::default();
        let mut r = TlvReader::new(raw);
        while let Some(item) = r.next_item()? {
            match item.tag {
                TLV_TYPE_RELAYER_RESPONSE_CODE => response.response_code = item.as_u8()? as i8,
                TLV_TYPE_RELAYER_RESPONSE_MSG => response.response_message = item.as_string()?,
                TLV_TYPE_RELAYER_RESPONSE_PAYLOAD => response.response_payload = item.as_string()?,
                TLV_TYPE_RELAYER_RESPONSE_REMOTE_RELAYER_CERT => {
                    response.remote_relayer_certificate = item.as_bytes()
                }
                TLV_TYPE_RELAYER_RESPONSE_REMOTE_SIG_ALGO => response.sig_algo = item.as_string()?,
                TLV_TYPE_RELAYER_RESPONSE_SIG => response.signature = item.as_bytes(),
                other => return Err(Error::Codec(format!("unknown relayer response tlv tag {}", other))),
            }
        }
        Ok(response)
    }

    pub fn verify(&self) -> Result<bool> {
        self.verify_with(&DefaultCredentialCodec)
    }

    pub fn verify_with(&self, codec: &dyn CredentialCodec) -> Result<bool> {
        verify_with_cert(
            codec,
            &self.remote_relayer_certificate,
            &self.sig_algo,
            &self.raw_encode()?,
            &self.signature,
        )
        .map_err(|e| Error::Crypto(format!("failed to verify response sig: {}", e)))
    }

    pub fn is_success(&self) -> bool {
        self.response_code == Self::SUCCESS
    }

    /// Id of the relayer that produced this response.
    pub fn calc_relayer_node_id(&self) -> String {
        calculate_node_id(&self.remote_relayer_certificate)
    }
}
