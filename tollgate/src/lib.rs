//! Core types for the tollgate pay-per-access protocol.
//!
//! Tollgate gates HTTP resources behind signed, time-bounded payment
//! authorizations. A request without a valid authorization receives a
//! structured "payment required" response describing the price; a request
//! carrying one is admitted after a pure, synchronous check against the
//! route's price requirement.
//!
//! This crate holds the transport-agnostic pieces:
//!
//! - [`proto`] - Wire types and the payment header envelope codec
//! - [`timestamp`] - Unix timestamps for authorization validity windows
//! - [`requirement`] - Per-route price requirements and gate configuration
//! - [`verify`] - The server-side admission decision and replay guard
//! - [`credential`] - Short-lived signed tokens for the settlement service
//!
//! HTTP middleware, the client-side payment flow, and the settlement-service
//! client live in the `tollgate-http` crate.

pub mod credential;
pub mod proto;
pub mod requirement;
pub mod timestamp;
pub mod verify;
