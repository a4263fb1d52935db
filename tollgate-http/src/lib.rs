//! HTTP transport for the tollgate pay-per-access protocol.
//!
//! Protected routes answer `402 Payment Required` with a structured price
//! requirement until the caller presents a valid payment authorization in
//! the [`constants::PAYMENT_HEADER`] header. This crate provides both sides
//! of that exchange, plus the client for the optional settlement service.
//!
//! # Modules
//!
//! - [`server`] - tower/axum middleware gating protected routes
//! - [`client`] - the client-side payment orchestrator, wallet seam, and
//!   grant cache
//! - [`facilitator`] - client for the settlement/compliance service
//! - [`constants`] - header names and protocol defaults

pub mod client;
pub mod constants;
pub mod facilitator;
pub mod server;
