use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::{TlvReader, TlvWriter};
use crate::{Error, Result};

const TLV_TYPE_CERT_VERSION: u16 = 0;
const TLV_TYPE_CERT_ID: u16 = 1;
const TLV_TYPE_CERT_TYPE: u16 = 2;
const TLV_TYPE_CERT_ISSUER: u16 = 3;
const TLV_TYPE_CERT_CREDENTIAL_SUBJECT: u16 = 4;
const TLV_TYPE_CERT_PROOF: u16 = 5;

const TLV_TYPE_OID_TYPE: u16 = 0;
const TLV_TYPE_OID_RAW_ID: u16 = 1;

const TLV_TYPE_RELAYER_VERSION: u16 = 0;
const TLV_TYPE_RELAYER_NAME: u16 = 1;
const TLV_TYPE_RELAYER_APPLICANT: u16 = 2;
const TLV_TYPE_RELAYER_SUBJECT_INFO: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossChainCertificateType {
    BcdnsTrustRoot,
    DomainName,
    Relayer,
    Ptc,
}

impl CrossChainCertificateType {
    fn code(&self) -> u8 {
        match self {
            CrossChainCertificateType::BcdnsTrustRoot => 0,
            CrossChainCertificateType::DomainName => 1,
            CrossChainCertificateType::Relayer => 2,
            CrossChainCertificateType::Ptc => 3,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CrossChainCertificateType::BcdnsTrustRoot),
            1 => Ok(CrossChainCertificateType::DomainName),
            2 => Ok(CrossChainCertificateType::Relayer),
            3 => Ok(CrossChainCertificateType::Ptc),
            other => Err(Error::Codec(format!("unknown certificate type {}", other))),
        }
    }
}

/// Cross-chain certificate issued by a BCDNS.
///
/// Issuance and chain-of-trust validation happen elsewhere; the relay core only
/// reads the credential subject out of it and hashes it into a node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainCertificate {
    pub version: String,
    pub id: String,
    pub cert_type: CrossChainCertificateType,
    pub issuer: Vec<u8>,
    pub credential_subject: Vec<u8>,
    pub proof: Vec<u8>,
}

impl CrossChainCertificate {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = TlvWriter::new();
        w.put_string(TLV_TYPE_CERT_VERSION, &self.version)?
            .put_string(TLV_TYPE_CERT_ID, &self.id)?
            .put_u8(TLV_TYPE_CERT_TYPE, self.cert_type.code())?
            .put_bytes(TLV_TYPE_CERT_ISSUER, &self.issuer)?
            .put_bytes(TLV_TYPE_CERT_CREDENTIAL_SUBJECT, &self.credential_subject)?
            .put_bytes(TLV_TYPE_CERT_PROOF, &self.proof)?;
        Ok(w.finish())
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut cert = CrossChainCertificate {
            version: String::new(),
            id: String::new(),
            cert_type: CrossChainCertificateType::Relayer,
            issuer: vec![],
            credential_subject: vec![],
            proof: vec![],
        };
        let mut has_type = false;

        let mut r = TlvReader::new(raw);
        while let Some(item) = r.next_item()? {
            match item.tag {
                TLV_TYPE_CERT_VERSION => cert.version = item.as_string()?,
                TLV_TYPE_CERT_ID => cert.id = item.as_string()?,
                TLV_TYPE_CERT_TYPE => {
                    cert.cert_type = CrossChainCertificateType::from_code(item.as_u8()?)?;
                    has_type = true;
                }
                TLV_TYPE_CERT_ISSUER => cert.issuer = item.as_bytes(),
                TLV_TYPE_CERT_CREDENTIAL_SUBJECT => cert.credential_subject = item.as_bytes(),
                TLV_TYPE_CERT_PROOF => cert.proof = item.as_bytes(),
                other => return Err(Error::Codec(format!("unknown certificate tlv tag {}", other))),
            }
        }
        if !has_type {
            return Err(Error::Codec("certificate without type".to_string()));
        }
        Ok(cert)
    }

    /// Accepts hex or base64 text, as certificates are shipped in config files.
    ///
    /// Text that is valid hex but does not hold a certificate is retried as
    /// base64, since base64 output may consist of hex digits only.
    pub fn from_text(text: &str) -> Result<Self> {
        let text = text.trim();
        let hex_err = match hex::decode(text) {
            Ok(raw) => match Self::decode(&raw) {
                Ok(cert) => return Ok(cert),
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };
        let raw = STANDARD.decode(text).map_err(|e| {
            Error::Codec(format!(
                "certificate is neither hex ({}) nor base64 ({})",
                hex_err, e
            ))
        })?;
        Self::decode(&raw)
    }

    pub fn is_relayer_cert(&self) -> bool {
        self.cert_type == CrossChainCertificateType::Relayer
    }
}

/// Node id of the relayer owning `raw_cert`: lowercase hex SHA-256 of the
/// encoded certificate.
pub fn calculate_node_id(raw_cert: &[u8]) -> String {
    hex::encode(Sha256::digest(raw_cert))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectIdentityType {
    /// `raw_id` is the public key itself.
    PublicKey,
    /// Blockchain identity; the public key lives in the subject info.
    Bid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectIdentity {
    pub kind: ObjectIdentityType,
    pub raw_id: Vec<u8>,
}

impl ObjectIdentity {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = match self.kind {
            ObjectIdentityType::PublicKey => 0,
            ObjectIdentityType::Bid => 1,
        };
        let mut w = TlvWriter::new();
        w.put_u8(TLV_TYPE_OID_TYPE, kind)?
            .put_bytes(TLV_TYPE_OID_RAW_ID, &self.raw_id)?;
        Ok(w.finish())
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut kind = None;
        let mut raw_id = vec![];

        let mut r = TlvReader::new(raw);
        while let Some(item) = r.next_item()? {
            match item.tag {
                TLV_TYPE_OID_TYPE => {
                    kind = Some(match item.as_u8()? {
                        0 => ObjectIdentityType::PublicKey,
                        1 => ObjectIdentityType::Bid,
                        other => {
                            return Err(Error::Codec(format!("unknown object identity type {}", other)))
                        }
                    })
                }
                TLV_TYPE_OID_RAW_ID => raw_id = item.as_bytes(),
                other => return Err(Error::Codec(format!("unknown object identity tlv tag {}", other))),
            }
        }

        let kind = kind.ok_or_else(|| Error::Codec("object identity without type".to_string()))?;
        Ok(Self { kind, raw_id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerCredentialSubject {
    pub version: String,
    pub name: String,
    pub applicant: ObjectIdentity,
    pub subject_info: Vec<u8>,
}

impl RelayerCredentialSubject {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = TlvWriter::new();
        w.put_string(TLV_TYPE_RELAYER_VERSION, &self.version)?
            .put_string(TLV_TYPE_RELAYER_NAME, &self.name)?
            .put_bytes(TLV_TYPE_RELAYER_APPLICANT, &self.applicant.encode()?)?
            .put_bytes(TLV_TYPE_RELAYER_SUBJECT_INFO, &self.subject_info)?;
        Ok(w.finish())
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut version = String::new();
        let mut name = String::new();
        let mut applicant = None;
        let mut subject_info = vec![];

        let mut r = TlvReader::new(raw);
        while let Some(item) = r.next_item()? {
            match item.tag {
                TLV_TYPE_RELAYER_VERSION => version = item.as_string()?,
                TLV_TYPE_RELAYER_NAME => name = item.as_string()?,
                TLV_TYPE_RELAYER_APPLICANT => applicant = Some(ObjectIdentity::decode(item.value)?),
                TLV_TYPE_RELAYER_SUBJECT_INFO => subject_info = item.as_bytes(),
                other => {
                    return Err(Error::Codec(format!("unknown relayer subject tlv tag {}", other)))
                }
            }
        }

        let applicant =
            applicant.ok_or_else(|| Error::Codec("relayer subject without applicant".to_string()))?;
        Ok(Self {
            version,
            name,
            applicant,
            subject_info,
        })
    }
}
