//! Address-scoped cache of completed access grants.

use dashmap::DashMap;
use tollgate::timestamp::UnixTimestamp;

/// A local record that a wallet address already completed payment.
///
/// Advisory only: it spares the user a second payment prompt, it proves
/// nothing to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    /// The wallet address the grant belongs to.
    pub address: String,
    /// The network the payment was made on.
    pub network: String,
    /// When the grant was recorded.
    pub granted_at: UnixTimestamp,
}

/// Address-scoped store of [`AccessGrant`]s.
///
/// Entries are keyed by lowercased address. A grant for one address never
/// answers for another, and [`on_disconnect`](Self::on_disconnect) clears
/// an address the moment its wallet disconnects. Hosts construct one cache
/// and pass it into the orchestrator explicitly.
#[derive(Debug, Default)]
pub struct AccessGrantCache {
    grants: DashMap<String, AccessGrant>,
}

impl AccessGrantCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed grant for its address.
    pub fn record(&self, grant: AccessGrant) {
        let key = grant.address.to_lowercase();
        self.grants.insert(key, grant);
    }

    /// Returns the grant for an address, if one is recorded.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<AccessGrant> {
        self.grants
            .get(&address.to_lowercase())
            .map(|entry| entry.value().clone())
    }

    /// Returns `true` if the address holds a grant.
    #[must_use]
    pub fn is_granted(&self, address: &str) -> bool {
        self.grants.contains_key(&address.to_lowercase())
    }

    /// Lifecycle hook: the wallet for `address` disconnected.
    ///
    /// Clears that address's grant immediately; other addresses are
    /// untouched.
    pub fn on_disconnect(&self, address: &str) {
        self.grants.remove(&address.to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(address: &str) -> AccessGrant {
        AccessGrant {
            address: address.into(),
            network: "base-sepolia".into(),
            granted_at: UnixTimestamp::now(),
        }
    }

    #[test]
    fn grants_are_scoped_to_their_address() {
        let cache = AccessGrantCache::new();
        cache.record(grant("0xAlice"));
        assert!(cache.is_granted("0xAlice"));
        assert!(!cache.is_granted("0xBob"));
    }

    #[test]
    fn address_lookup_is_case_insensitive() {
        let cache = AccessGrantCache::new();
        cache.record(grant("0xAlice"));
        assert!(cache.is_granted("0XALICE"));
        assert!(cache.get("0xalice").is_some());
    }

    #[test]
    fn disconnect_invalidates_immediately() {
        let cache = AccessGrantCache::new();
        cache.record(grant("0xAlice"));
        cache.record(grant("0xBob"));
        assert!(cache.is_granted("0xAlice"));

        cache.on_disconnect("0xAlice");
        assert!(!cache.is_granted("0xAlice"));
        assert!(cache.is_granted("0xBob"));
    }
}
