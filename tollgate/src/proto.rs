//! Wire types for tollgate payment messages.
//!
//! All types serialize to JSON with camelCase field names. The payment
//! header envelope is the canonical JSON of a [`PaymentAuthorization`],
//! base64-encoded into a single opaque header value.
//!
//! Decoding is total: malformed client input is expected traffic, and every
//! failure mode maps to a [`DecodeError`] variant rather than a panic.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::{Deserialize, Serialize};

use crate::requirement::PriceRequirement;
use crate::timestamp::UnixTimestamp;

/// Payment scheme tag for exact-amount transfer authorizations.
pub const EXACT_SCHEME: &str = "exact";

/// A signed, off-chain transfer authorization.
///
/// Represents "the payer authorizes transferring `value` to `to` within
/// `[valid_after, valid_before)`". This is a structured message signed by
/// the payer's wallet, not an on-chain transaction; the settlement service
/// may execute it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    /// The payer address.
    pub from: String,
    /// The recipient address.
    pub to: String,
    /// Transfer amount in the currency's smallest unit, as an integer string.
    pub value: String,
    /// Earliest time the authorization may be executed.
    pub valid_after: UnixTimestamp,
    /// Time at which the authorization expires.
    pub valid_before: UnixTimestamp,
    /// Opaque random bytes, hex-encoded. Unique per authorization.
    pub nonce: String,
}

/// The signed payload carried inside a payment authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// The payer's structured-data signature over the authorization.
    pub signature: String,
    /// The transfer authorization that was signed.
    pub authorization: TransferAuthorization,
}

/// A payment authorization as carried in the payment header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    /// Payment scheme tag (e.g. [`EXACT_SCHEME`]).
    pub scheme: String,
    /// Settlement network identifier (e.g. `"base-sepolia"`).
    pub network: String,
    /// The signed transfer payload.
    pub payload: ExactPayload,
}

/// Body of a `402 Payment Required` response.
///
/// Carries everything the caller needs to construct payment and retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    /// Price in the currency's smallest unit.
    pub amount: String,
    /// Currency symbol.
    pub currency: String,
    /// Settlement network identifier.
    pub network: String,
    /// Recipient address for payment.
    pub recipient: String,
    /// Machine-readable reason the request was not admitted. Servers that
    /// send only the price fields leave it empty.
    #[serde(default)]
    pub reason: String,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PaymentRequiredBody {
    /// Builds a 402 body from a route's requirement and a refusal reason.
    #[must_use]
    pub fn new(requirement: &PriceRequirement, reason: impl Into<String>) -> Self {
        Self {
            amount: requirement.amount.clone(),
            currency: requirement.currency.clone(),
            network: requirement.network.clone(),
            recipient: requirement.recipient.clone(),
            reason: reason.into(),
            message: None,
        }
    }

    /// Attaches a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Converts the body back into the requirement it advertises.
    #[must_use]
    pub fn requirement(&self) -> PriceRequirement {
        PriceRequirement {
            amount: self.amount.clone(),
            currency: self.currency.clone(),
            network: self.network.clone(),
            recipient: self.recipient.clone(),
        }
    }
}

/// Success body returned by an access-granting route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantBody {
    /// Whether the request succeeded.
    pub success: bool,
    /// Whether access was granted.
    pub access_granted: bool,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Details about the granted access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<GrantUserData>,
}

/// Details attached to a successful access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantUserData {
    /// The wallet address access was granted to.
    pub address: String,
    /// When access was granted.
    pub access_granted_at: UnixTimestamp,
    /// Whether a payment authorization was verified for this grant.
    pub payment_verified: bool,
}

/// Serialization failure while building a payment header envelope.
#[derive(Debug, thiserror::Error)]
#[error("failed to serialize payment authorization: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Failures while decoding a payment header envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The header value is not valid base64.
    #[error("payment header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not valid JSON.
    #[error("payment header is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field is absent from the decoded JSON.
    #[error("payment header is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Encodes a payment authorization into its header envelope.
///
/// Canonical JSON, then base64. Deterministic for a given structural input:
/// field order is fixed by the type definitions, so two structurally equal
/// authorizations encode to the same string.
///
/// # Errors
///
/// Returns [`EncodeError`] if JSON serialization fails.
pub fn encode_payment_header(auth: &PaymentAuthorization) -> Result<String, EncodeError> {
    let json = serde_json::to_vec(auth)?;
    Ok(b64.encode(json))
}

/// Decodes a payment header envelope into a [`PaymentAuthorization`].
///
/// Total over arbitrary input: bad base64, bad JSON, and missing required
/// fields (`scheme`, `network`, `payload.authorization`) each yield a typed
/// [`DecodeError`].
///
/// # Errors
///
/// Returns [`DecodeError`] describing the first failure encountered.
pub fn decode_payment_header(header: &str) -> Result<PaymentAuthorization, DecodeError> {
    let bytes = b64.decode(header.trim())?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    for field in ["scheme", "network", "payload"] {
        if value.get(field).is_none() {
            return Err(DecodeError::MissingField(field));
        }
    }
    if value
        .get("payload")
        .and_then(|payload| payload.get("authorization"))
        .is_none()
    {
        return Err(DecodeError::MissingField("payload.authorization"));
    }
    Ok(serde_json::from_value(value)?)
}
