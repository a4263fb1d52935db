//! Client-side payment orchestration.
//!
//! [`PaymentOrchestrator::pay`] drives a single protected request to a
//! terminal state: `Completed` with the route's success payload, or
//! `Failed` with a reason precise enough for the host to offer the right
//! retry action. There is no automatic retry; a new attempt is an explicit
//! new `pay` call. Hosts observe progress through [`PaymentOrchestrator::phases`].

use rand::RngCore;
use reqwest::StatusCode;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use url::Url;

use tollgate::proto::{
    EXACT_SCHEME, ExactPayload, PaymentAuthorization, PaymentRequiredBody, TransferAuthorization,
    encode_payment_header,
};
use tollgate::requirement::PriceRequirement;
use tollgate::timestamp::UnixTimestamp;

use super::grant::{AccessGrant, AccessGrantCache};
use super::wallet::{Wallet, WalletError};
use crate::constants::{
    DEFAULT_AUTHORIZATION_WINDOW_SECS, DEFAULT_MAX_AMOUNT, DEFAULT_WALLET_TIMEOUT, PAYMENT_HEADER,
    USER_ADDRESS_HEADER,
};

/// Observable phases of a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Idle; no attempt in flight.
    Initial,
    /// The unauthenticated probe request is in flight.
    Requesting,
    /// The wallet is being switched to the payment network.
    SwitchingNetwork,
    /// A transfer authorization is being built and signed.
    Processing,
    /// The paid request is awaiting the server's verdict.
    Verifying,
    /// The attempt finished and the success payload was delivered.
    Completed,
    /// The attempt failed terminally.
    Failed(FailureReason),
}

/// Terminal failure reasons, distinct so a host can offer the right retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The user rejected a wallet prompt.
    UserRejected,
    /// The wallet is not on the payment network and could not be switched.
    WrongNetwork,
    /// A wallet prompt outlived the configured timeout.
    WalletTimeout,
    /// The wallet backend is unreachable.
    WalletUnavailable(String),
    /// The server rejected the submitted payment.
    VerificationRejected(String),
    /// The required amount exceeds the configured signing cap.
    AmountAboveLimit,
    /// The 402 response did not carry a usable price requirement.
    MalformedRequirement(String),
    /// The server answered with an unexpected status.
    UpstreamStatus(u16),
    /// The request could not be transported.
    Transport(String),
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRejected => f.write_str("user rejected"),
            Self::WrongNetwork => f.write_str("wrong network"),
            Self::WalletTimeout => f.write_str("wallet prompt timed out"),
            Self::WalletUnavailable(detail) => write!(f, "wallet unavailable: {detail}"),
            Self::VerificationRejected(reason) => write!(f, "verification rejected: {reason}"),
            Self::AmountAboveLimit => f.write_str("required amount exceeds the signing cap"),
            Self::MalformedRequirement(detail) => {
                write!(f, "malformed payment requirement: {detail}")
            }
            Self::UpstreamStatus(status) => write!(f, "unexpected status {status}"),
            Self::Transport(detail) => write!(f, "transport failure: {detail}"),
        }
    }
}

/// Errors returned by [`PaymentOrchestrator::pay`].
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Another payment attempt is already in flight on this orchestrator.
    #[error("a payment attempt is already in flight")]
    AlreadyInFlight,
    /// The attempt reached a terminal failure.
    #[error("payment failed: {0}")]
    Failed(FailureReason),
}

/// Successful result of a payment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// The route answered without requiring payment.
    Free(serde_json::Value),
    /// A payment was signed, submitted, and verified; carries the route's
    /// success payload.
    Paid(serde_json::Value),
    /// A prior grant for this wallet was found; no request was made.
    AlreadyGranted(AccessGrant),
}

/// Client-side payment state machine.
///
/// One instance drives at most one attempt at a time; a second [`pay`]
/// call while one is in flight is refused immediately rather than queued.
///
/// [`pay`]: Self::pay
pub struct PaymentOrchestrator {
    http: reqwest::Client,
    wallet: Arc<dyn Wallet>,
    grants: Arc<AccessGrantCache>,
    in_flight: AtomicBool,
    phase: watch::Sender<Phase>,
    wallet_timeout: Duration,
    authorization_window_secs: u64,
    max_amount: u128,
}

impl fmt::Debug for PaymentOrchestrator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentOrchestrator")
            .field("wallet_timeout", &self.wallet_timeout)
            .field("authorization_window_secs", &self.authorization_window_secs)
            .field("max_amount", &self.max_amount)
            .finish_non_exhaustive()
    }
}

impl PaymentOrchestrator {
    /// Creates an orchestrator over a wallet and a grant cache.
    #[must_use]
    pub fn new(wallet: Arc<dyn Wallet>, grants: Arc<AccessGrantCache>) -> Self {
        Self {
            http: reqwest::Client::new(),
            wallet,
            grants,
            in_flight: AtomicBool::new(false),
            phase: watch::channel(Phase::Initial).0,
            wallet_timeout: DEFAULT_WALLET_TIMEOUT,
            authorization_window_secs: DEFAULT_AUTHORIZATION_WINDOW_SECS,
            max_amount: DEFAULT_MAX_AMOUNT,
        }
    }

    /// Replaces the HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Sets the upper bound on each wallet prompt.
    #[must_use]
    pub const fn with_wallet_timeout(mut self, timeout: Duration) -> Self {
        self.wallet_timeout = timeout;
        self
    }

    /// Sets the validity window of freshly built authorizations, in seconds.
    #[must_use]
    pub const fn with_authorization_window(mut self, secs: u64) -> Self {
        self.authorization_window_secs = secs;
        self
    }

    /// Sets the largest base-unit amount the orchestrator will sign.
    #[must_use]
    pub const fn with_max_amount(mut self, max_amount: u128) -> Self {
        self.max_amount = max_amount;
        self
    }

    /// Subscribes to phase transitions.
    #[must_use]
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Drives one payment attempt against a protected endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AlreadyInFlight`] if an attempt is
    /// active, or [`OrchestratorError::Failed`] with the terminal
    /// [`FailureReason`] otherwise.
    pub async fn pay(&self, endpoint: Url) -> Result<PaymentOutcome, OrchestratorError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(OrchestratorError::AlreadyInFlight);
        }
        let result = self.drive(endpoint).await;
        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn drive(&self, endpoint: Url) -> Result<PaymentOutcome, OrchestratorError> {
        let address = self.wallet.address();
        if let Some(grant) = self.grants.get(&address) {
            tracing::debug!(%address, "reusing recorded access grant");
            return Ok(PaymentOutcome::AlreadyGranted(grant));
        }

        self.set_phase(Phase::Requesting);
        let response = self.submit(&endpoint, &address, None).await?;
        let status = response.status();
        if status.is_success() {
            let payload = self.success_payload(response).await?;
            self.set_phase(Phase::Completed);
            return Ok(PaymentOutcome::Free(payload));
        }
        if status != StatusCode::PAYMENT_REQUIRED {
            return Err(self.fail(FailureReason::UpstreamStatus(status.as_u16())));
        }

        let required: PaymentRequiredBody = response
            .json()
            .await
            .map_err(|err| self.fail(FailureReason::MalformedRequirement(err.to_string())))?;
        let requirement = required.requirement();
        tracing::info!(
            amount = %requirement.amount,
            currency = %requirement.currency,
            network = %requirement.network,
            "payment required"
        );

        self.align_network(&requirement.network).await?;

        self.set_phase(Phase::Processing);
        let amount: u128 = requirement.amount.parse().map_err(|_| {
            self.fail(FailureReason::MalformedRequirement(format!(
                "amount `{}` is not a base-unit integer",
                requirement.amount
            )))
        })?;
        if amount > self.max_amount {
            return Err(self.fail(FailureReason::AmountAboveLimit));
        }

        let authorization = self.build_authorization(&address, &requirement);
        let signature = self
            .wallet_prompt(self.wallet.sign_transfer(&authorization))
            .await?;
        let payment = PaymentAuthorization {
            scheme: EXACT_SCHEME.into(),
            network: requirement.network.clone(),
            payload: ExactPayload {
                signature,
                authorization,
            },
        };
        let header = encode_payment_header(&payment)
            .map_err(|err| self.fail(FailureReason::Transport(err.to_string())))?;

        self.set_phase(Phase::Verifying);
        let response = self.submit(&endpoint, &address, Some(&header)).await?;
        let status = response.status();
        if status.is_success() {
            let payload = self.success_payload(response).await?;
            self.grants.record(AccessGrant {
                address: address.clone(),
                network: requirement.network.clone(),
                granted_at: UnixTimestamp::now(),
            });
            self.set_phase(Phase::Completed);
            return Ok(PaymentOutcome::Paid(payload));
        }
        if status == StatusCode::PAYMENT_REQUIRED {
            let reason = response
                .json::<PaymentRequiredBody>()
                .await
                .map_or_else(|_| "verification_rejected".to_owned(), |body| body.reason);
            return Err(self.fail(FailureReason::VerificationRejected(reason)));
        }
        Err(self.fail(FailureReason::UpstreamStatus(status.as_u16())))
    }

    /// Ensures the wallet is on the payment network, switching if needed.
    ///
    /// The network id is re-read after a switch; a wallet that claims
    /// success but stays on the old network still fails the attempt.
    async fn align_network(&self, target: &str) -> Result<(), OrchestratorError> {
        let current = self.wallet_prompt(self.wallet.network_id()).await?;
        if current == target {
            return Ok(());
        }
        self.set_phase(Phase::SwitchingNetwork);
        tracing::info!(from = %current, to = %target, "requesting wallet network switch");
        match timeout(self.wallet_timeout, self.wallet.switch_network(target)).await {
            Err(_) => Err(self.fail(FailureReason::WalletTimeout)),
            Ok(Err(_)) => Err(self.fail(FailureReason::WrongNetwork)),
            Ok(Ok(())) => {
                let confirmed = self.wallet_prompt(self.wallet.network_id()).await?;
                if confirmed == target {
                    Ok(())
                } else {
                    Err(self.fail(FailureReason::WrongNetwork))
                }
            }
        }
    }

    /// Runs one wallet interaction under the configured timeout.
    async fn wallet_prompt<T, F>(&self, prompt: F) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, WalletError>>,
    {
        match timeout(self.wallet_timeout, prompt).await {
            Err(_) => Err(self.fail(FailureReason::WalletTimeout)),
            Ok(Err(WalletError::Rejected)) => Err(self.fail(FailureReason::UserRejected)),
            Ok(Err(WalletError::Unavailable(detail))) => {
                Err(self.fail(FailureReason::WalletUnavailable(detail)))
            }
            Ok(Ok(value)) => Ok(value),
        }
    }

    fn build_authorization(
        &self,
        address: &str,
        requirement: &PriceRequirement,
    ) -> TransferAuthorization {
        let now = UnixTimestamp::now();
        TransferAuthorization {
            from: address.to_owned(),
            to: requirement.recipient.clone(),
            value: requirement.amount.clone(),
            valid_after: now,
            valid_before: now + self.authorization_window_secs,
            nonce: fresh_nonce(),
        }
    }

    async fn submit(
        &self,
        endpoint: &Url,
        address: &str,
        payment: Option<&str>,
    ) -> Result<reqwest::Response, OrchestratorError> {
        let mut request = self
            .http
            .post(endpoint.clone())
            .header(USER_ADDRESS_HEADER, address)
            .json(&serde_json::json!({ "userAddress": address }));
        if let Some(header) = payment {
            request = request.header(PAYMENT_HEADER, header);
        }
        request
            .send()
            .await
            .map_err(|err| self.fail(FailureReason::Transport(err.to_string())))
    }

    async fn success_payload(
        &self,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, OrchestratorError> {
        response
            .json()
            .await
            .map_err(|err| self.fail(FailureReason::Transport(err.to_string())))
    }

    fn fail(&self, reason: FailureReason) -> OrchestratorError {
        tracing::warn!(%reason, "payment attempt failed");
        self.set_phase(Phase::Failed(reason.clone()));
        OrchestratorError::Failed(reason)
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }
}

/// 32 random bytes, hex-encoded with a `0x` prefix.
fn fresh_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PAYMENT_HEADER;
    use std::sync::Mutex;
    use tollgate::proto::{GrantBody, decode_payment_header};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct MockWallet {
        address: String,
        network: Mutex<String>,
        reject_signature: bool,
        reject_switch: bool,
    }

    impl MockWallet {
        fn on_network(network: &str) -> Self {
            Self {
                address: "0xPayer".into(),
                network: Mutex::new(network.into()),
                reject_signature: false,
                reject_switch: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Wallet for MockWallet {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn network_id(&self) -> Result<String, WalletError> {
            Ok(self.network.lock().unwrap().clone())
        }

        async fn switch_network(&self, network: &str) -> Result<(), WalletError> {
            if self.reject_switch {
                return Err(WalletError::Rejected);
            }
            *self.network.lock().unwrap() = network.to_owned();
            Ok(())
        }

        async fn sign_transfer(
            &self,
            _authorization: &TransferAuthorization,
        ) -> Result<String, WalletError> {
            if self.reject_signature {
                return Err(WalletError::Rejected);
            }
            Ok("0xsigned".into())
        }
    }

    fn required_body() -> serde_json::Value {
        serde_json::json!({
            "amount": "1000000",
            "currency": "USDC",
            "network": "base-sepolia",
            "recipient": "0xSeller",
            "reason": "no_authorization",
        })
    }

    fn success_body() -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "accessGranted": true,
        })
    }

    async fn gated_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/access/grant"))
            .and(header_exists(PAYMENT_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/access/grant"))
            .respond_with(ResponseTemplate::new(402).set_body_json(required_body()))
            .with_priority(2)
            .mount(&server)
            .await;
        server
    }

    fn orchestrator(wallet: MockWallet) -> PaymentOrchestrator {
        PaymentOrchestrator::new(Arc::new(wallet), Arc::new(AccessGrantCache::new()))
            .with_wallet_timeout(Duration::from_secs(2))
    }

    fn endpoint(server: &MockServer) -> Url {
        format!("{}/api/access/grant", server.uri()).parse().unwrap()
    }

    #[tokio::test]
    async fn pays_and_completes_on_the_happy_path() {
        let server = gated_server().await;
        let orchestrator = orchestrator(MockWallet::on_network("base-sepolia"));
        let phases = orchestrator.phases();

        let outcome = orchestrator.pay(endpoint(&server)).await.unwrap();
        let PaymentOutcome::Paid(payload) = outcome else {
            panic!("expected a paid outcome");
        };
        let grant: GrantBody = serde_json::from_value(payload).unwrap();
        assert!(grant.access_granted);
        assert_eq!(*phases.borrow(), Phase::Completed);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].headers.contains_key(PAYMENT_HEADER));

        let header = requests[1].headers.get(PAYMENT_HEADER).unwrap();
        let payment = decode_payment_header(header.to_str().unwrap()).unwrap();
        assert_eq!(payment.payload.authorization.to, "0xSeller");
        assert_eq!(payment.payload.authorization.value, "1000000");
        assert_eq!(payment.payload.authorization.from, "0xPayer");
    }

    #[tokio::test]
    async fn rejection_fails_without_sending_payment() {
        let server = gated_server().await;
        let mut wallet = MockWallet::on_network("base-sepolia");
        wallet.reject_signature = true;
        let orchestrator = orchestrator(wallet);

        let err = orchestrator.pay(endpoint(&server)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Failed(FailureReason::UserRejected)
        ));

        // Only the unauthenticated probe reached the server.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key(PAYMENT_HEADER));
    }

    #[tokio::test]
    async fn switches_networks_before_signing() {
        let server = gated_server().await;
        let orchestrator = orchestrator(MockWallet::on_network("ethereum"));

        let outcome = orchestrator.pay(endpoint(&server)).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::Paid(_)));
    }

    #[tokio::test]
    async fn refused_network_switch_fails_with_wrong_network() {
        let server = gated_server().await;
        let mut wallet = MockWallet::on_network("ethereum");
        wallet.reject_switch = true;
        let orchestrator = orchestrator(wallet);

        let err = orchestrator.pay(endpoint(&server)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Failed(FailureReason::WrongNetwork)
        ));
    }

    #[tokio::test]
    async fn persistent_402_is_verification_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/access/grant"))
            .respond_with(ResponseTemplate::new(402).set_body_json(required_body()))
            .mount(&server)
            .await;
        let orchestrator = orchestrator(MockWallet::on_network("base-sepolia"));

        let err = orchestrator.pay(endpoint(&server)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Failed(FailureReason::VerificationRejected(_))
        ));
    }

    #[tokio::test]
    async fn free_routes_complete_without_wallet_interaction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/access/grant"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
            .mount(&server)
            .await;
        let mut wallet = MockWallet::on_network("ethereum");
        wallet.reject_signature = true;
        let orchestrator = orchestrator(wallet);

        let outcome = orchestrator.pay(endpoint(&server)).await.unwrap();
        assert_eq!(outcome, PaymentOutcome::Free(success_body()));
    }

    #[tokio::test]
    async fn amounts_above_the_cap_are_refused_before_signing() {
        let server = MockServer::start().await;
        let mut body = required_body();
        body["amount"] = "2000000".into();
        Mock::given(method("POST"))
            .and(path("/api/access/grant"))
            .respond_with(ResponseTemplate::new(402).set_body_json(body))
            .mount(&server)
            .await;
        let orchestrator = orchestrator(MockWallet::on_network("base-sepolia"));

        let err = orchestrator.pay(endpoint(&server)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Failed(FailureReason::AmountAboveLimit)
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recorded_grant_short_circuits_the_flow() {
        let server = gated_server().await;
        let grants = Arc::new(AccessGrantCache::new());
        grants.record(AccessGrant {
            address: "0xPayer".into(),
            network: "base-sepolia".into(),
            granted_at: UnixTimestamp::now(),
        });
        let orchestrator = PaymentOrchestrator::new(
            Arc::new(MockWallet::on_network("base-sepolia")),
            Arc::clone(&grants),
        );

        let outcome = orchestrator.pay(endpoint(&server)).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::AlreadyGranted(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grant_is_recorded_after_a_paid_completion() {
        let server = gated_server().await;
        let grants = Arc::new(AccessGrantCache::new());
        let orchestrator = PaymentOrchestrator::new(
            Arc::new(MockWallet::on_network("base-sepolia")),
            Arc::clone(&grants),
        );

        orchestrator.pay(endpoint(&server)).await.unwrap();
        assert!(grants.is_granted("0xPayer"));

        grants.on_disconnect("0xPayer");
        assert!(!grants.is_granted("0xPayer"));
    }

    #[tokio::test]
    async fn concurrent_attempts_are_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/access/grant"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(success_body())
                    .set_delay(Duration::from_millis(250)),
            )
            .mount(&server)
            .await;
        let orchestrator = Arc::new(orchestrator(MockWallet::on_network("base-sepolia")));

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let endpoint = endpoint(&server);
            tokio::spawn(async move { orchestrator.pay(endpoint).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = orchestrator.pay(endpoint(&server)).await;
        assert!(matches!(second, Err(OrchestratorError::AlreadyInFlight)));
        assert!(first.await.unwrap().is_ok());
    }
}
