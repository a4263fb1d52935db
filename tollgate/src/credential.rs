//! Short-lived signed credential tokens for the settlement service.
//!
//! The verifying server authenticates itself to the facilitator with a
//! three-segment EdDSA bearer token (`header.payload.signature`, each
//! segment base64url without padding). Tokens are valid for
//! [`TOKEN_LIFETIME_SECS`] and are minted fresh for every outbound call,
//! never cached or reused.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD as b64, URL_SAFE_NO_PAD as b64url};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timestamp::UnixTimestamp;

/// Issuer tag the facilitator expects in credential tokens.
pub const ISSUER: &str = "cdp";

/// Seconds a minted token remains valid.
pub const TOKEN_LIFETIME_SECS: u64 = 120;

/// Credential token header segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Token type, always `"JWT"`.
    pub typ: String,
    /// Signature algorithm, always `"EdDSA"`.
    pub alg: String,
    /// Identifier of the signing credential.
    pub kid: String,
    /// Random per-token nonce, hex-encoded.
    pub nonce: String,
}

/// Credential token claims segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer tag, always [`ISSUER`].
    pub iss: String,
    /// Not-before time, seconds since the Unix epoch.
    pub nbf: u64,
    /// Expiry time, seconds since the Unix epoch.
    pub exp: u64,
    /// Subject: the credential identifier.
    pub sub: String,
    /// Resource the token is scoped to, as `"METHOD host path"`.
    pub uri: String,
}

/// Errors raised while constructing a signer or minting tokens.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The configured private key is not usable Ed25519 secret material.
    #[error("credential private key is malformed: {0}")]
    InvalidKey(String),
    /// Token segment serialization failed.
    #[error("failed to serialize credential token: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Mints short-lived signed tokens proving possession of a named credential.
pub struct CredentialSigner {
    key_id: String,
    signing_key: SigningKey,
}

impl fmt::Debug for CredentialSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSigner")
            .field("key_id", &self.key_id)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl CredentialSigner {
    /// Creates a signer from a credential identifier and a base64-encoded
    /// Ed25519 secret.
    ///
    /// Accepts a 32-byte seed or a 64-byte secret+public keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidKey`] for anything that is not one
    /// of those two shapes; a signer is never constructed from key material
    /// it cannot sign with.
    pub fn try_new(key_id: impl Into<String>, secret_base64: &str) -> Result<Self, CredentialError> {
        let bytes = b64
            .decode(secret_base64.trim())
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        let signing_key = match bytes.len() {
            32 => {
                let seed: [u8; 32] = bytes.try_into().expect("length checked");
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let pair: [u8; 64] = bytes.try_into().expect("length checked");
                SigningKey::from_keypair_bytes(&pair)
                    .map_err(|e| CredentialError::InvalidKey(e.to_string()))?
            }
            n => {
                return Err(CredentialError::InvalidKey(format!(
                    "expected 32 or 64 key bytes, got {n}"
                )));
            }
        };
        Ok(Self {
            key_id: key_id.into(),
            signing_key,
        })
    }

    /// Creates a signer from an already-parsed signing key.
    #[must_use]
    pub fn from_signing_key(key_id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key,
        }
    }

    /// Returns the credential identifier.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the public half of the signing key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Mints a token scoped to a single HTTP call.
    ///
    /// The token carries a fresh random nonce, becomes valid immediately,
    /// and expires after [`TOKEN_LIFETIME_SECS`]. Expiry is enforced by the
    /// relying service, not here.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Serialize`] if a token segment cannot be
    /// serialized.
    pub fn mint(&self, method: &str, host: &str, path: &str) -> Result<String, CredentialError> {
        let now = UnixTimestamp::now().as_secs();
        let header = TokenHeader {
            typ: "JWT".to_owned(),
            alg: "EdDSA".to_owned(),
            kid: self.key_id.clone(),
            nonce: hex::encode(fresh_nonce()),
        };
        let claims = TokenClaims {
            iss: ISSUER.to_owned(),
            nbf: now,
            exp: now + TOKEN_LIFETIME_SECS,
            sub: self.key_id.clone(),
            uri: format!("{method} {host} {path}"),
        };
        let signing_input = format!(
            "{}.{}",
            b64url.encode(serde_json::to_vec(&header)?),
            b64url.encode(serde_json::to_vec(&claims)?),
        );
        let signature = self.signing_key.sign(signing_input.as_bytes());
        Ok(format!(
            "{signing_input}.{}",
            b64url.encode(signature.to_bytes())
        ))
    }
}

/// 16 bytes from the thread-local CSPRNG.
fn fresh_nonce() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}
