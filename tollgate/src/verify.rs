//! Server-side admission decisions.
//!
//! The decision rule is a pure function of the authorization, the route's
//! price requirement, and the current time; it makes no network calls and
//! touches no shared state, so it is synchronously testable against literal
//! fixtures. [`Verifier`] layers replay protection on top through a shared
//! spent-nonce set.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::proto::PaymentAuthorization;
use crate::requirement::PriceRequirement;
use crate::timestamp::UnixTimestamp;

/// Machine-readable reasons an authorization is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No payment authorization accompanied the request.
    NoAuthorization,
    /// The payment header was present but could not be decoded.
    InvalidAuthorization,
    /// The authorization pays a different recipient than the route requires.
    RecipientMismatch,
    /// The authorization amount differs from the required amount.
    AmountMismatch,
    /// The authorization's validity window has not opened yet.
    NotYetValid,
    /// The authorization's validity window has closed.
    Expired,
    /// The authorization's nonce was already spent.
    Replayed,
}

impl DenyReason {
    /// Returns the stable wire identifier for this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoAuthorization => "no_authorization",
            Self::InvalidAuthorization => "invalid_authorization",
            Self::RecipientMismatch => "recipient_mismatch",
            Self::AmountMismatch => "amount_mismatch",
            Self::NotYetValid => "not_yet_valid",
            Self::Expired => "expired",
            Self::Replayed => "replayed",
        }
    }
}

impl Display for DenyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The request is admitted.
    Grant {
        /// Verified payer address (the authorization's `from`).
        payer: String,
        /// When the check passed.
        verified_at: UnixTimestamp,
    },
    /// The request is refused.
    Deny {
        /// Why admission was refused.
        reason: DenyReason,
        /// The requirement the caller must satisfy to retry with payment.
        requirement: PriceRequirement,
    },
}

impl Verdict {
    /// Returns `true` if the request was admitted.
    #[must_use]
    pub const fn is_grant(&self) -> bool {
        matches!(self, Self::Grant { .. })
    }
}

/// Pure decision rule: does `auth` satisfy `requirement` at time `now`?
///
/// Checks, in order: presence, recipient (case-insensitive), amount (exact
/// base-unit integer string), and the `[validAfter, validBefore)` window.
///
/// # Errors
///
/// Returns the first [`DenyReason`] that applies.
pub fn admit(
    auth: Option<&PaymentAuthorization>,
    requirement: &PriceRequirement,
    now: UnixTimestamp,
) -> Result<(), DenyReason> {
    let Some(auth) = auth else {
        return Err(DenyReason::NoAuthorization);
    };
    let transfer = &auth.payload.authorization;
    if !transfer.to.eq_ignore_ascii_case(&requirement.recipient) {
        return Err(DenyReason::RecipientMismatch);
    }
    if transfer.value != requirement.amount {
        return Err(DenyReason::AmountMismatch);
    }
    if now < transfer.valid_after {
        return Err(DenyReason::NotYetValid);
    }
    if now >= transfer.valid_before {
        return Err(DenyReason::Expired);
    }
    Ok(())
}

/// Admission checker with replay protection.
///
/// Wraps [`admit`] and records the nonce of every granted authorization in
/// a shared spent set. Two concurrent requests presenting the same
/// authorization race on an atomic insert; exactly one is granted.
#[derive(Debug, Default)]
pub struct Verifier {
    spent: DashSet<String>,
}

impl Verifier {
    /// Creates a verifier with an empty spent-nonce set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks an authorization against a requirement at the current time.
    ///
    /// A nonce is marked spent only after every other check passes, so a
    /// denied authorization remains presentable once the caller corrects
    /// the request.
    #[must_use]
    pub fn verify(
        &self,
        auth: Option<&PaymentAuthorization>,
        requirement: &PriceRequirement,
    ) -> Verdict {
        let now = UnixTimestamp::now();
        let Some(auth) = auth else {
            return self.deny(DenyReason::NoAuthorization, requirement);
        };
        if let Err(reason) = admit(Some(auth), requirement, now) {
            return self.deny(reason, requirement);
        }
        let transfer = &auth.payload.authorization;
        if !self.spent.insert(transfer.nonce.clone()) {
            tracing::warn!(nonce = %transfer.nonce, "replayed payment authorization refused");
            return self.deny(DenyReason::Replayed, requirement);
        }
        tracing::debug!(payer = %transfer.from, "payment authorization admitted");
        Verdict::Grant {
            payer: transfer.from.clone(),
            verified_at: now,
        }
    }

    fn deny(&self, reason: DenyReason, requirement: &PriceRequirement) -> Verdict {
        tracing::debug!(%reason, "payment authorization refused");
        Verdict::Deny {
            reason,
            requirement: requirement.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{EXACT_SCHEME, ExactPayload, TransferAuthorization};

    const RECIPIENT: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA1";

    fn requirement() -> PriceRequirement {
        PriceRequirement {
            amount: "1000000".into(),
            currency: "USDC".into(),
            network: "base-sepolia".into(),
            recipient: RECIPIENT.into(),
        }
    }

    fn authorization(to: &str, value: &str, nonce: &str) -> PaymentAuthorization {
        let now = UnixTimestamp::now();
        PaymentAuthorization {
            scheme: EXACT_SCHEME.into(),
            network: "base-sepolia".into(),
            payload: ExactPayload {
                signature: "0xsigned".into(),
                authorization: TransferAuthorization {
                    from: "0xPayer".into(),
                    to: to.into(),
                    value: value.into(),
                    valid_after: UnixTimestamp::from_secs(now.as_secs().saturating_sub(10)),
                    valid_before: now + 300,
                    nonce: nonce.into(),
                },
            },
        }
    }

    #[test]
    fn grants_on_case_differing_recipient() {
        let verifier = Verifier::new();
        let auth = authorization(&RECIPIENT.to_lowercase(), "1000000", "0x01");
        let verdict = verifier.verify(Some(&auth), &requirement());
        assert!(matches!(verdict, Verdict::Grant { ref payer, .. } if payer == "0xPayer"));
    }

    #[test]
    fn denies_amount_mismatch() {
        let verifier = Verifier::new();
        let auth = authorization(RECIPIENT, "999999", "0x02");
        let verdict = verifier.verify(Some(&auth), &requirement());
        assert!(
            matches!(verdict, Verdict::Deny { reason: DenyReason::AmountMismatch, .. })
        );
    }

    #[test]
    fn denies_recipient_mismatch() {
        let verifier = Verifier::new();
        let auth = authorization("0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB2", "1000000", "0x03");
        let verdict = verifier.verify(Some(&auth), &requirement());
        assert!(
            matches!(verdict, Verdict::Deny { reason: DenyReason::RecipientMismatch, .. })
        );
    }

    #[test]
    fn denies_missing_authorization_with_requirement() {
        let verifier = Verifier::new();
        let verdict = verifier.verify(None, &requirement());
        let Verdict::Deny { reason, requirement: advertised } = verdict else {
            panic!("expected deny");
        };
        assert_eq!(reason, DenyReason::NoAuthorization);
        assert_eq!(advertised, requirement());
    }

    #[test]
    fn single_character_flip_denies() {
        let verifier = Verifier::new();
        let mut flipped = RECIPIENT.to_owned();
        flipped.pop();
        flipped.push('2');
        let auth = authorization(&flipped, "1000000", "0x04");
        assert!(!verifier.verify(Some(&auth), &requirement()).is_grant());
    }

    #[test]
    fn window_bounds_are_enforced() {
        let req = requirement();
        let mut auth = authorization(RECIPIENT, "1000000", "0x05");
        auth.payload.authorization.valid_after = UnixTimestamp::from_secs(1_000);
        auth.payload.authorization.valid_before = UnixTimestamp::from_secs(2_000);

        let early = UnixTimestamp::from_secs(999);
        assert_eq!(
            admit(Some(&auth), &req, early),
            Err(DenyReason::NotYetValid)
        );

        let open = UnixTimestamp::from_secs(1_000);
        assert_eq!(admit(Some(&auth), &req, open), Ok(()));

        let boundary = UnixTimestamp::from_secs(2_000);
        assert_eq!(admit(Some(&auth), &req, boundary), Err(DenyReason::Expired));
    }

    #[test]
    fn replayed_nonce_is_refused() {
        let verifier = Verifier::new();
        let auth = authorization(RECIPIENT, "1000000", "0x06");
        assert!(verifier.verify(Some(&auth), &requirement()).is_grant());
        let verdict = verifier.verify(Some(&auth), &requirement());
        assert!(matches!(verdict, Verdict::Deny { reason: DenyReason::Replayed, .. }));
    }

    #[test]
    fn denied_authorization_does_not_spend_its_nonce() {
        let verifier = Verifier::new();
        let wrong_amount = authorization(RECIPIENT, "999999", "0x07");
        assert!(!verifier.verify(Some(&wrong_amount), &requirement()).is_grant());

        let corrected = authorization(RECIPIENT, "1000000", "0x07");
        assert!(verifier.verify(Some(&corrected), &requirement()).is_grant());
    }
}
