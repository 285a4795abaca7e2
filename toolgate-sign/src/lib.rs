//! Request signing for forwarded calls.
//!
//! The canonical string is `method \n path \n timestamp \n body_digest`, where the digest is the
//! hex SHA-256 of the raw body and the timestamp is in Unix seconds.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use toolgate_types::sha256_hex;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_REQUEST_ID: &str = "x-toolgate-request-id";
pub const HEADER_TIMESTAMP: &str = "x-toolgate-timestamp";
pub const HEADER_BODY_DIGEST: &str = "x-toolgate-body-digest";
pub const HEADER_SIGNATURE: &str = "x-toolgate-signature";

pub const DEFAULT_REPLAY_WINDOW_SECS: i64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignError {
    #[error("invalid signing key")]
    InvalidKey,
}

/// Reasons a downstream verifier rejects an envelope. All of them map to one external
/// "unauthorized"; the variants exist for the audit trail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("envelope carries no signature")]
    Unsigned,
    #[error("body digest mismatch")]
    DigestMismatch,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("timestamp outside replay window (skew {skew_secs}s)")]
    Stale { skew_secs: i64 },
    #[error("invalid verification key")]
    InvalidKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub method: String,
    pub path: String,
    pub timestamp: i64,
    pub body_digest: String,
    /// Hex HMAC; `None` when the route has no signing secret.
    pub signature: Option<String>,
    pub request_id: String,
}

impl SignedEnvelope {
    /// Metadata to attach to the forwarded call.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![(HEADER_REQUEST_ID, self.request_id.clone())];
        if let Some(signature) = &self.signature {
            out.push((HEADER_TIMESTAMP, self.timestamp.to_string()));
            out.push((HEADER_BODY_DIGEST, self.body_digest.clone()));
            out.push((HEADER_SIGNATURE, signature.clone()));
        }
        out
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

pub fn body_digest(body: &[u8]) -> String {
    sha256_hex(body)
}

pub fn canonical_string(method: &str, path: &str, timestamp: i64, body_digest: &str) -> String {
    format!("{}\n{}\n{}\n{}", method.to_ascii_uppercase(), path, timestamp, body_digest)
}

fn mac_for(secret: &[u8], canonical: &str) -> Result<HmacSha256, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(canonical.as_bytes());
    Ok(mac)
}

/// Builds the envelope for an outbound call. Without a secret only the request id is meaningful.
pub fn sign(
    method: &str,
    path: &str,
    timestamp: i64,
    secret: Option<&[u8]>,
    body: &[u8],
) -> Result<SignedEnvelope, SignError> {
    let digest = body_digest(body);
    let signature = match secret {
        Some(secret) => {
            let canonical = canonical_string(method, path, timestamp, &digest);
            let mac = mac_for(secret, &canonical).map_err(|_| SignError::InvalidKey)?;
            Some(hex::encode(mac.finalize().into_bytes()))
        }
        None => None,
    };
    Ok(SignedEnvelope {
        method: method.to_ascii_uppercase(),
        path: path.to_string(),
        timestamp,
        body_digest: digest,
        signature,
        request_id: Uuid::new_v4().to_string(),
    })
}

/// Downstream-side verification of a [`SignedEnvelope`].
#[derive(Clone)]
pub struct Verifier {
    secret: Vec<u8>,
    window_secs: i64,
}

impl Verifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            window_secs: DEFAULT_REPLAY_WINDOW_SECS,
        }
    }

    pub fn with_window(mut self, window_secs: i64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn verify(&self, envelope: &SignedEnvelope, body: &[u8], now: i64) -> Result<(), VerifyError> {
        let signature = envelope.signature.as_deref().ok_or(VerifyError::Unsigned)?;

        let skew_secs = now - envelope.timestamp;
        if skew_secs.abs() > self.window_secs {
            return Err(VerifyError::Stale { skew_secs });
        }

        let digest = body_digest(body);
        if !bool::from(digest.as_bytes().ct_eq(envelope.body_digest.as_bytes())) {
            return Err(VerifyError::DigestMismatch);
        }

        let provided = hex::decode(signature).map_err(|_| VerifyError::SignatureMismatch)?;
        let canonical = canonical_string(&envelope.method, &envelope.path, envelope.timestamp, &digest);
        let mac = mac_for(&self.secret, &canonical).map_err(|_| VerifyError::InvalidKey)?;
        mac.verify_slice(&provided)
            .map_err(|_| VerifyError::SignatureMismatch)
    }
}
