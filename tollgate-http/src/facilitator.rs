//! Client for the settlement/compliance service.
//!
//! The facilitator verifies and optionally settles payment authorizations
//! out of band. It is an untrusted, optional dependency: every call is
//! authenticated with a freshly minted credential token when credentials
//! are configured, and any failure degrades to "no compliance metadata"
//! instead of blocking the admission decision.

use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use tollgate::credential::CredentialSigner;
use tollgate::proto::PaymentAuthorization;
use tollgate::requirement::PriceRequirement;

use crate::constants::API_KEY_HEADER;

/// Request to verify a payment authorization with the facilitator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// The payment authorization under review.
    pub payment: PaymentAuthorization,
    /// The requirement it must satisfy.
    pub requirement: PriceRequirement,
}

/// Request to settle a verified payment.
///
/// Same wire shape as [`VerifyRequest`]; a distinct type so a verify
/// request is converted deliberately rather than passed by accident.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettleRequest(VerifyRequest);

impl From<VerifyRequest> for SettleRequest {
    fn from(request: VerifyRequest) -> Self {
        Self(request)
    }
}

/// Facilitator verdict on a payment authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    /// Whether the authorization passed the facilitator's checks.
    pub is_valid: bool,
    /// The payer address, when identifiable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// Machine-readable reason verification failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

/// Result of asking the facilitator to settle a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleOutcome {
    /// Whether settlement succeeded.
    pub success: bool,
    /// The settlement transaction identifier, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// The network settlement happened on.
    pub network: String,
    /// Machine-readable reason settlement failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

/// One payment kind the facilitator supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    /// Payment scheme identifier.
    pub scheme: String,
    /// Network identifier.
    pub network: String,
}

/// Response from the facilitator's `supported` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedSchemes {
    /// The supported scheme/network combinations.
    #[serde(default)]
    pub kinds: Vec<SupportedKind>,
}

/// Response from the facilitator's discovery listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryListing {
    /// Listed resources, kept as raw JSON; shapes vary per facilitator.
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

/// Errors raised while talking to the facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// URL construction failed.
    #[error("invalid facilitator URL: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport failed.
    #[error("facilitator request failed: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The response body could not be decoded.
    #[error("facilitator response could not be decoded: {context}: {source}")]
    Decode {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The facilitator answered with an unexpected status.
    #[error("facilitator returned status {status}: {context}")]
    Status {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
    },
}

/// Client for a remote facilitator service.
///
/// Speaks JSON to the `./verify`, `./settle`, `./supported`, and `./list`
/// endpoints relative to a base URL.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    list_url: Url,
    client: Client,
    credentials: Option<Arc<CredentialSigner>>,
    timeout: Option<Duration>,
}

impl FacilitatorClient {
    /// Constructs a client from a base URL, precomputing endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError::UrlParse`] if an endpoint URL cannot be
    /// derived from the base.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorError> {
        let join = |segment: &str, context: &'static str| {
            base_url
                .join(segment)
                .map_err(|source| FacilitatorError::UrlParse { context, source })
        };
        Ok(Self {
            verify_url: join("./verify", "constructing ./verify URL")?,
            settle_url: join("./settle", "constructing ./settle URL")?,
            supported_url: join("./supported", "constructing ./supported URL")?,
            list_url: join("./list", "constructing ./list URL")?,
            base_url,
            client: Client::new(),
            credentials: None,
            timeout: None,
        })
    }

    /// Attaches a credential signer; every future call carries a freshly
    /// minted token.
    #[must_use]
    pub fn with_credentials(mut self, signer: CredentialSigner) -> Self {
        self.credentials = Some(Arc::new(signer));
        self
    }

    /// Sets a timeout applied to every request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the base URL this client talks to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns `true` if a credential signer is configured.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Asks the facilitator to verify a payment authorization.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport, status, or decode failure.
    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome, FacilitatorError> {
        self.post_json(&self.verify_url, "POST /verify", request).await
    }

    /// Asks the facilitator to settle a verified payment.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport, status, or decode failure.
    pub async fn settle(&self, request: &SettleRequest) -> Result<SettleOutcome, FacilitatorError> {
        self.post_json(&self.settle_url, "POST /settle", request).await
    }

    /// Lists the scheme/network combinations the facilitator supports.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport, status, or decode failure.
    pub async fn supported(&self) -> Result<SupportedSchemes, FacilitatorError> {
        self.get_json(&self.supported_url, "GET /supported").await
    }

    /// Fetches the facilitator's discovery listing.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] on transport, status, or decode failure.
    pub async fn list(&self) -> Result<DiscoveryListing, FacilitatorError> {
        self.get_json(&self.list_url, "GET /list").await
    }

    /// Verifies with the facilitator, degrading to `None` on any failure.
    ///
    /// Missing credentials, transport errors, and unexpected statuses all
    /// yield `None`. The admission decision never depends on this result; a
    /// missing facilitator means missing compliance metadata, nothing more.
    pub async fn compliance_check(&self, request: &VerifyRequest) -> Option<VerifyOutcome> {
        if self.credentials.is_none() {
            tracing::debug!("no facilitator credentials configured; skipping compliance check");
            return None;
        }
        match self.verify(request).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(error = %err, "facilitator unavailable; continuing without compliance metadata");
                None
            }
        }
    }

    /// Builds auth headers for one call, minting a fresh credential token.
    ///
    /// Missing credentials or a minting failure yield an empty map; the
    /// call proceeds unauthenticated.
    fn auth_headers(&self, method: &str, url: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let Some(signer) = &self.credentials else {
            return headers;
        };
        let host = url.host_str().unwrap_or_default();
        match signer.mint(method, host, url.path()) {
            Ok(token) => {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                    headers.insert(http::header::AUTHORIZATION, value);
                }
                if let Ok(value) = HeaderValue::from_str(signer.key_id()) {
                    headers.insert(API_KEY_HEADER, value);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential minting failed; calling facilitator unauthenticated");
            }
        }
        headers
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorError>
    where
        T: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(url.clone())
            .headers(self.auth_headers("POST", url))
            .json(payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| FacilitatorError::Http { context, source })?;
        Self::decode(response, context).await
    }

    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, FacilitatorError>
    where
        R: DeserializeOwned,
    {
        let mut request = self.client.get(url.clone()).headers(self.auth_headers("GET", url));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| FacilitatorError::Http { context, source })?;
        Self::decode(response, context).await
    }

    async fn decode<R>(response: reqwest::Response, context: &'static str) -> Result<R, FacilitatorError>
    where
        R: DeserializeOwned,
    {
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FacilitatorError::Status { context, status });
        }
        response
            .json::<R>()
            .await
            .map_err(|source| FacilitatorError::Decode { context, source })
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Normalize to exactly one trailing slash so relative joins work.
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| FacilitatorError::UrlParse {
            context: "parsing base URL",
            source,
        })?;
        Self::try_new(url)
    }
}
