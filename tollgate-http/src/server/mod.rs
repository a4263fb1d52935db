//! Axum middleware gating protected routes behind payment.
//!
//! Requests to a route listed in the gate's [`RouteTable`](tollgate::requirement::RouteTable)
//! must carry a valid payment authorization in the
//! [`PAYMENT_HEADER`](crate::constants::PAYMENT_HEADER) header; anything
//! else receives a `402 Payment Required` response describing the price.
//! Routes not listed pass through untouched.
//!
//! Admitted requests are tagged with a [`VerifiedPayment`] extension so
//! downstream handlers can trust the admission without re-verifying.

pub mod gate;
pub mod layer;

pub use gate::{AccessGate, VerifiedPayment};
pub use layer::{AccessGateLayer, AccessGateService};
