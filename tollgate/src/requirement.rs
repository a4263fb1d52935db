//! Per-route price requirements and gate configuration.
//!
//! A [`PriceRequirement`] describes what one protected route charges; a
//! [`RouteTable`] maps request paths to their requirements. Both are static
//! configuration, validated at construction so a misconfigured route is an
//! error rather than an unprotected endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The price a route charges for admission.
///
/// Constructed once per protected route and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequirement {
    /// Amount in the currency's smallest unit, as an integer string
    /// (e.g. `"1000000"` for 1 USDC).
    pub amount: String,
    /// Currency symbol (e.g. `"USDC"`).
    pub currency: String,
    /// Settlement network identifier (e.g. `"base-sepolia"`).
    pub network: String,
    /// Recipient address credited by the payment.
    pub recipient: String,
}

impl PriceRequirement {
    /// Checks that the requirement is complete enough to enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the recipient is empty or the amount is
    /// not a base-unit integer string.
    pub fn validate(&self, route: &str) -> Result<(), ConfigError> {
        if self.recipient.trim().is_empty() {
            return Err(ConfigError::MissingRecipient(route.to_owned()));
        }
        if self.amount.is_empty() || self.amount.parse::<u128>().is_err() {
            return Err(ConfigError::InvalidAmount {
                route: route.to_owned(),
                amount: self.amount.clone(),
            });
        }
        Ok(())
    }
}

/// Maps protected request paths to their price requirements.
///
/// Paths are matched exactly. A path not present in the table is
/// unprotected and passes through the gate untouched.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, PriceRequirement>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a price requirement for an exact request path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the requirement fails validation; an
    /// invalid entry is never installed.
    pub fn with_route(
        mut self,
        path: impl Into<String>,
        requirement: PriceRequirement,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        requirement.validate(&path)?;
        self.routes.insert(path, requirement);
        Ok(self)
    }

    /// Returns the requirement for a path, if the path is protected.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&PriceRequirement> {
        self.routes.get(path)
    }

    /// Returns `true` if no routes are protected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the number of protected routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

/// Errors raised while assembling gate configuration.
///
/// Configuration failures are fatal for the affected route; the gate never
/// falls back to admitting traffic for a route it cannot price.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    #[error("missing required environment variable `{0}`")]
    MissingEnv(&'static str),
    /// A route's recipient address is empty.
    #[error("route `{0}` has no recipient address")]
    MissingRecipient(String),
    /// A route's amount is empty or not a base-unit integer string.
    #[error("route `{route}` has an invalid amount `{amount}`")]
    InvalidAmount {
        /// The route the amount was configured for.
        route: String,
        /// The rejected amount string.
        amount: String,
    },
}

/// Gate configuration sourced from the environment.
///
/// Loads a `.env` file when one is present. The recipient address is
/// required; everything else has a default.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Recipient address credited by every route's payments.
    pub recipient: String,
    /// Settlement network identifier.
    pub network: String,
    /// Currency symbol.
    pub currency: String,
}

impl GateConfig {
    /// Environment variable naming the recipient address.
    pub const RECIPIENT_VAR: &'static str = "TOLLGATE_RECIPIENT";
    /// Environment variable overriding the settlement network.
    pub const NETWORK_VAR: &'static str = "TOLLGATE_NETWORK";
    /// Environment variable overriding the currency symbol.
    pub const CURRENCY_VAR: &'static str = "TOLLGATE_CURRENCY";

    /// Default settlement network.
    pub const DEFAULT_NETWORK: &'static str = "base-sepolia";
    /// Default currency symbol.
    pub const DEFAULT_CURRENCY: &'static str = "USDC";

    /// Loads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] if the recipient variable is
    /// unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] if the recipient variable is
    /// unset or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let recipient =
            non_empty(Self::RECIPIENT_VAR).ok_or(ConfigError::MissingEnv(Self::RECIPIENT_VAR))?;
        Ok(Self {
            recipient,
            network: non_empty(Self::NETWORK_VAR)
                .unwrap_or_else(|| Self::DEFAULT_NETWORK.to_owned()),
            currency: non_empty(Self::CURRENCY_VAR)
                .unwrap_or_else(|| Self::DEFAULT_CURRENCY.to_owned()),
        })
    }

    /// Builds the price requirement for one route at the given amount.
    #[must_use]
    pub fn price(&self, amount: impl Into<String>) -> PriceRequirement {
        PriceRequirement {
            amount: amount.into(),
            currency: self.currency.clone(),
            network: self.network.clone(),
            recipient: self.recipient.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement() -> PriceRequirement {
        PriceRequirement {
            amount: "1000000".into(),
            currency: "USDC".into(),
            network: "base-sepolia".into(),
            recipient: "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA1".into(),
        }
    }

    #[test]
    fn table_stores_and_looks_up_routes() {
        let table = RouteTable::new()
            .with_route("/api/access/grant", requirement())
            .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get("/api/access/grant").is_some());
        assert!(table.get("/api/other").is_none());
    }

    #[test]
    fn empty_recipient_fails_closed() {
        let mut bad = requirement();
        bad.recipient = "  ".into();
        let err = RouteTable::new().with_route("/paid", bad).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRecipient(route) if route == "/paid"));
    }

    #[test]
    fn non_integer_amount_fails_closed() {
        let mut bad = requirement();
        bad.amount = "1.0".into();
        assert!(RouteTable::new().with_route("/paid", bad).is_err());
    }

    #[test]
    fn config_requires_recipient() {
        let err = GateConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(GateConfig::RECIPIENT_VAR)));
    }

    #[test]
    fn config_applies_defaults_and_overrides() {
        let cfg = GateConfig::from_lookup(|name| match name {
            GateConfig::RECIPIENT_VAR => Some("0xSeller".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.network, GateConfig::DEFAULT_NETWORK);
        assert_eq!(cfg.currency, GateConfig::DEFAULT_CURRENCY);

        let cfg = GateConfig::from_lookup(|name| match name {
            GateConfig::RECIPIENT_VAR => Some("0xSeller".into()),
            GateConfig::NETWORK_VAR => Some("base".into()),
            GateConfig::CURRENCY_VAR => Some("EURC".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.network, "base");
        assert_eq!(cfg.currency, "EURC");

        let price = cfg.price("250000");
        assert_eq!(price.amount, "250000");
        assert_eq!(price.recipient, "0xSeller");
    }
}
