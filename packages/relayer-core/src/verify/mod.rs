use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ed25519_dalek::{Signer as _, Verifier as _};
use k256::ecdsa::signature::{Signer as _, Verifier as _};
use log::{debug, error, warn};

use crate::{
    network::{RelayerRequest, RelayerResponse},
    Error, Result,
};

pub mod cert;

pub use cert::{
    calculate_node_id, CrossChainCertificate, CrossChainCertificateType, ObjectIdentity,
    ObjectIdentityType, RelayerCredentialSubject,
};

#[cfg(test)]
use mockall::automock;

/// Signature algorithms a peer may declare in its envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAlgo {
    Ed25519,
    /// ECDSA over secp256k1 with SHA-256, DER-encoded signatures.
    Sha256WithEcdsa,
}

impl SignAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignAlgo::Ed25519 => "Ed25519",
            SignAlgo::Sha256WithEcdsa => "SHA256withECDSA",
        }
    }

    pub fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
        match self {
            SignAlgo::Ed25519 => {
                let key: [u8; 32] = public_key.try_into().map_err(|_| {
                    Error::Crypto(format!("ed25519 public key must be 32 bytes, got {}", public_key.len()))
                })?;
                let vk = ed25519_dalek::VerifyingKey::from_bytes(&key)
                    .map_err(|e| Error::Crypto(format!("invalid ed25519 public key: {}", e)))?;
                let sig = match ed25519_dalek::Signature::from_slice(signature) {
                    Ok(sig) => sig,
                    Err(_) => return Ok(false),
                };
                Ok(vk.verify(message, &sig).is_ok())
            }
            SignAlgo::Sha256WithEcdsa => {
                let vk = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                    .map_err(|e| Error::Crypto(format!("invalid secp256k1 public key: {}", e)))?;
                let sig = match k256::ecdsa::Signature::from_der(signature) {
                    Ok(sig) => sig,
                    Err(_) => return Ok(false),
                };
                Ok(vk.verify(message, &sig).is_ok())
            }
        }
    }
}

impl FromStr for SignAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Ed25519" => Ok(SignAlgo::Ed25519),
            "SHA256withECDSA" => Ok(SignAlgo::Sha256WithEcdsa),
            other => Err(Error::Crypto(format!("unsupported signature algorithm: {}", other))),
        }
    }
}

impl fmt::Display for SignAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads credentials out of certificates and checks signatures made with them.
#[cfg_attr(test, automock)]
pub trait CredentialCodec: Send + Sync {
    fn decode_subject(&self, raw_cert: &[u8]) -> Result<RelayerCredentialSubject>;

    fn extract_public_key(&self, subject: &RelayerCredentialSubject) -> Result<Vec<u8>>;

    fn verify(&self, sig_algo: &str, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCredentialCodec;

impl CredentialCodec for DefaultCredentialCodec {
    fn decode_subject(&self, raw_cert: &[u8]) -> Result<RelayerCredentialSubject> {
        let cert = CrossChainCertificate::decode(raw_cert)?;
        if !cert.is_relayer_cert() {
            return Err(Error::Crypto(format!(
                "certificate {} is not a relayer certificate: {:?}",
                cert.id, cert.cert_type
            )));
        }
        RelayerCredentialSubject::decode(&cert.credential_subject)
    }

    fn extract_public_key(&self, subject: &RelayerCredentialSubject) -> Result<Vec<u8>> {
        let key = match subject.applicant.kind {
            ObjectIdentityType::PublicKey => &subject.applicant.raw_id,
            ObjectIdentityType::Bid => &subject.subject_info,
        };
        if key.is_empty() {
            return Err(Error::Crypto(format!("no public key in subject of {}", subject.name)));
        }
        Ok(key.clone())
    }

    fn verify(&self, sig_algo: &str, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
        sig_algo.parse::<SignAlgo>()?.verify(public_key, message, signature)
    }
}

enum LocalSigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

/// Local relayer identity: its certificate and the key behind it.
pub struct RelayerCredentialManager {
    raw_cert: Vec<u8>,
    node_id: String,
    sig_algo: SignAlgo,
    signing_key: LocalSigningKey,
}

impl RelayerCredentialManager {
    /// Creates the manager from a certificate and a 32-byte secret.
    pub fn new(cert: &CrossChainCertificate, sig_algo: SignAlgo, secret: &[u8]) -> Result<Self> {
        if !cert.is_relayer_cert() {
            return Err(Error::Crypto(format!("certificate {} is not a relayer certificate", cert.id)));
        }
        let signing_key = match sig_algo {
            SignAlgo::Ed25519 => {
                let seed: [u8; 32] = secret.try_into().map_err(|_| {
                    Error::Crypto(format!("ed25519 secret must be 32 bytes, got {}", secret.len()))
                })?;
                LocalSigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed))
            }
            SignAlgo::Sha256WithEcdsa => LocalSigningKey::Secp256k1(
                k256::ecdsa::SigningKey::from_slice(secret)
                    .map_err(|e| Error::Crypto(format!("invalid secp256k1 secret: {}", e)))?,
            ),
        };
        let raw_cert = cert.encode()?;
        let node_id = calculate_node_id(&raw_cert);
        debug!("Loaded local relayer credential, node id {}", node_id);

        Ok(Self {
            raw_cert,
            node_id,
            sig_algo,
            signing_key,
        })
    }

    /// Loads a certificate (hex or base64 text) and a hex-encoded secret key.
    pub fn from_files<P: AsRef<Path>>(cert_path: P, key_path: P, sig_algo: SignAlgo) -> Result<Self> {
        let cert_text = std::fs::read_to_string(cert_path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read relayer cert: {}", e)))?;
        let cert = CrossChainCertificate::from_text(&cert_text)?;
        let key_text = std::fs::read_to_string(key_path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read relayer key: {}", e)))?;
        let secret = hex::decode(key_text.trim()).map_err(|e| {
            error!("Failed to decode relayer key: {}", e);
            Error::Crypto(format!("Invalid relayer key: {}", e))
        })?;
        Self::new(&cert, sig_algo, &secret)
    }

    pub fn local_node_id(&self) -> &str {
        &self.node_id
    }

    pub fn local_cert(&self) -> &[u8] {
        &self.raw_cert
    }

    pub fn sig_algo(&self) -> SignAlgo {
        self.sig_algo
    }

    pub fn public_key(&self) -> Vec<u8> {
        match &self.signing_key {
            LocalSigningKey::Ed25519(sk) => sk.verifying_key().to_bytes().to_vec(),
            LocalSigningKey::Secp256k1(sk) => sk.verifying_key().to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.signing_key {
            LocalSigningKey::Ed25519(sk) => sk.sign(message).to_bytes().to_vec(),
            LocalSigningKey::Secp256k1(sk) => {
                let sig: k256::ecdsa::Signature = sk.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
        }
    }

    pub fn sign_relayer_response(&self, response: &mut RelayerResponse) -> Result<()> {
        response.remote_relayer_certificate = self.raw_cert.clone();
        response.sig_algo = self.sig_algo.to_string();
        response.signature = self.sign(&response.raw_encode()?);
        Ok(())
    }

    pub fn sign_relayer_request(&self, request: &mut RelayerRequest) -> Result<()> {
        request.node_id = self.node_id.clone();
        request.sender_relayer_certificate = self.raw_cert.clone();
        request.sig_algo = self.sig_algo.to_string();
        request.signature = self.sign(&request.raw_encode()?);
        Ok(())
    }
}

/// Checks `signature` over `message` against the relayer certificate `raw_cert`.
pub fn verify_with_cert(
    codec: &dyn CredentialCodec,
    raw_cert: &[u8],
    sig_algo: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let subject = codec.decode_subject(raw_cert)?;
    let public_key = codec.extract_public_key(&subject)?;
    let valid = codec.verify(sig_algo, &public_key, message, signature)?;
    if !valid {
        warn!("Signature verification failed for relayer {}", subject.name);
    }
    Ok(valid)
}
