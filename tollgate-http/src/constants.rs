//! HTTP-level constants for the tollgate protocol.

use std::time::Duration;

/// Header carrying the payment authorization envelope (client → server).
pub const PAYMENT_HEADER: &str = "X-Payment";

/// Header naming the paying wallet address (client → server).
pub const USER_ADDRESS_HEADER: &str = "X-User-Address";

/// Header flagging a 402 response as a payment requirement (server → client).
pub const PAYMENT_REQUIRED_HEADER: &str = "X-Payment-Required";

/// Header naming the credential used toward the facilitator.
pub const API_KEY_HEADER: &str = "X-CDP-API-KEY";

/// Default settlement/compliance service URL.
pub const DEFAULT_FACILITATOR_URL: &str = "https://api.cdp.coinbase.com";

/// Default validity window for freshly built transfer authorizations.
pub const DEFAULT_AUTHORIZATION_WINDOW_SECS: u64 = 300;

/// Default upper bound on a single wallet prompt.
pub const DEFAULT_WALLET_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on the amount the client will sign, in base units.
pub const DEFAULT_MAX_AMOUNT: u128 = 1_000_000;
