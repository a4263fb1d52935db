//! Wallet abstraction for the client payment flow.

use async_trait::async_trait;
use tollgate::proto::TransferAuthorization;

/// Failures surfaced by a wallet during a payment attempt.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The user declined the prompt.
    #[error("wallet prompt rejected by user")]
    Rejected,
    /// The wallet is unreachable or errored.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

/// Seam to the payer's wallet.
///
/// Implementations bridge to whatever signing backend the host embeds.
/// Every async operation is a potential user prompt; the orchestrator bounds
/// each one with its wallet timeout.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Returns the wallet's address.
    fn address(&self) -> String;

    /// Returns the network the wallet is currently connected to.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError`] if the wallet cannot be reached.
    async fn network_id(&self) -> Result<String, WalletError>;

    /// Asks the wallet to switch to the given network.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Rejected`] if the user declines the switch.
    async fn switch_network(&self, network: &str) -> Result<(), WalletError>;

    /// Asks the wallet for an off-chain structured-data signature over the
    /// transfer authorization. This is a signature request, not an on-chain
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Rejected`] if the user declines to sign.
    async fn sign_transfer(
        &self,
        authorization: &TransferAuthorization,
    ) -> Result<String, WalletError>;
}
