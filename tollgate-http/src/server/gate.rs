//! Core admission logic for protected routes.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::StatusCode;
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

use tollgate::proto::{self, PaymentAuthorization, PaymentRequiredBody};
use tollgate::requirement::{ConfigError, GateConfig, PriceRequirement, RouteTable};
use tollgate::timestamp::UnixTimestamp;
use tollgate::verify::{DenyReason, Verdict, Verifier};

use crate::constants::{PAYMENT_HEADER, PAYMENT_REQUIRED_HEADER};
use crate::facilitator::{FacilitatorClient, VerifyRequest};

/// Marker inserted into admitted requests.
///
/// Downstream handlers read this extension to learn the verified payer
/// without re-checking the payment header. It cannot be forged from the
/// outside: extensions are process-local, never parsed from the wire.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    /// The verified payer address.
    pub payer: String,
    /// When verification happened.
    pub verified_at: UnixTimestamp,
}

/// Admission gate for protected routes.
///
/// Holds the route price table, the shared [`Verifier`], and an optional
/// facilitator side-channel. The gate is stateless per request; the
/// verifier's spent-nonce set is the only shared mutable state, and it is
/// updated atomically. The facilitator is consulted in the background after
/// a grant; the admission decision never waits on it.
#[derive(Debug, Clone)]
pub struct AccessGate {
    routes: Arc<RouteTable>,
    verifier: Arc<Verifier>,
    facilitator: Option<Arc<FacilitatorClient>>,
}

impl AccessGate {
    /// Creates a gate over a validated route table.
    #[must_use]
    pub fn new(routes: RouteTable) -> Self {
        Self {
            routes: Arc::new(routes),
            verifier: Arc::new(Verifier::new()),
            facilitator: None,
        }
    }

    /// Attaches a facilitator; admitted payments are reported to it for
    /// compliance metadata, off the decision path.
    #[must_use]
    pub fn with_facilitator(mut self, facilitator: FacilitatorClient) -> Self {
        self.facilitator = Some(Arc::new(facilitator));
        self
    }

    /// Builds a gate from environment configuration and a list of
    /// `(path, amount)` pairs priced in the configured currency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the recipient address is unset or any
    /// route amount is invalid. A misconfigured route is an error, never an
    /// unprotected endpoint.
    pub fn from_env<I, P, A>(routes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (P, A)>,
        P: Into<String>,
        A: Into<String>,
    {
        let config = GateConfig::from_env()?;
        let mut table = RouteTable::new();
        for (path, amount) in routes {
            table = table.with_route(path.into(), config.price(amount.into()))?;
        }
        Ok(Self::new(table))
    }

    /// Returns the shared verifier.
    #[must_use]
    pub fn verifier(&self) -> &Arc<Verifier> {
        &self.verifier
    }

    /// Handles one request: admit, refuse with 402, or pass through.
    ///
    /// # Errors
    ///
    /// Infallible; every failure mode becomes a response.
    pub async fn handle_request<S>(&self, mut inner: S, mut req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        let path = req.uri().path().to_owned();
        let Some(requirement) = self.routes.get(&path) else {
            return inner.call(req).await;
        };
        if let Err(err) = requirement.validate(&path) {
            tracing::error!(route = %path, error = %err, "protected route misconfigured; refusing request");
            return Ok(config_error_response());
        }
        if req.extensions().get::<VerifiedPayment>().is_some() {
            return inner.call(req).await;
        }

        let header = req
            .headers()
            .get(PAYMENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let Some(header) = header else {
            return Ok(payment_required_response(requirement, DenyReason::NoAuthorization));
        };
        let authorization = match proto::decode_payment_header(&header) {
            Ok(authorization) => authorization,
            Err(err) => {
                tracing::debug!(route = %path, error = %err, "undecodable payment header");
                return Ok(payment_required_response(
                    requirement,
                    DenyReason::InvalidAuthorization,
                ));
            }
        };

        let verdict = self.verifier.verify(Some(&authorization), requirement);
        match verdict {
            Verdict::Grant { payer, verified_at } => {
                self.spawn_compliance_check(authorization, requirement);
                req.extensions_mut().insert(VerifiedPayment { payer, verified_at });
                inner.call(req).await
            }
            Verdict::Deny { reason, requirement } => {
                Ok(payment_required_response(&requirement, reason))
            }
        }
    }

    /// Reports an admitted payment to the facilitator, if one is attached.
    ///
    /// Fire-and-forget: the request is already admitted, and a facilitator
    /// failure degrades to missing compliance metadata.
    fn spawn_compliance_check(
        &self,
        payment: PaymentAuthorization,
        requirement: &PriceRequirement,
    ) {
        let Some(facilitator) = &self.facilitator else {
            return;
        };
        let facilitator = Arc::clone(facilitator);
        let request = VerifyRequest {
            payment,
            requirement: requirement.clone(),
        };
        tokio::spawn(async move {
            if let Some(outcome) = facilitator.compliance_check(&request).await {
                tracing::debug!(
                    is_valid = outcome.is_valid,
                    payer = ?outcome.payer,
                    "facilitator compliance metadata recorded"
                );
            }
        });
    }
}

/// Builds the `402 Payment Required` response for a refused request.
fn payment_required_response(requirement: &PriceRequirement, reason: DenyReason) -> Response {
    let body = PaymentRequiredBody::new(requirement, reason.as_str()).with_message(format!(
        "Payment of {} {} base units required",
        requirement.amount, requirement.currency
    ));
    let bytes = serde_json::to_vec(&body).expect("402 body serialization failed");
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(PAYMENT_REQUIRED_HEADER, "true")
        .body(Body::from(bytes))
        .expect("402 response construction failed")
}

/// Builds the fail-closed response for a misconfigured route.
fn config_error_response() -> Response {
    let bytes = serde_json::to_vec(&serde_json::json!({
        "error": "server configuration error"
    }))
    .expect("error body serialization failed");
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("500 response construction failed")
}
