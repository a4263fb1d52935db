//! Client-side payment flow.
//!
//! [`PaymentOrchestrator`] drives one protected request through the payment
//! exchange: probe, receive the price requirement, align the wallet
//! network, sign a transfer authorization, resubmit, interpret the verdict.
//! The wallet is reached through the [`Wallet`] trait; completed payments
//! are remembered per address in an [`AccessGrantCache`].

pub mod grant;
pub mod orchestrator;
pub mod wallet;

pub use grant::{AccessGrant, AccessGrantCache};
pub use orchestrator::{
    FailureReason, OrchestratorError, PaymentOrchestrator, PaymentOutcome, Phase,
};
pub use wallet::{Wallet, WalletError};
