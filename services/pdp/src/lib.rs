//! Warden PDP service library crate.
//!
//! # Purpose
//! Exposes the PDP's subsystems (config, HTTP API, policy and key sources) for
//! use by the `warden-pdp` binary and integration tests.
pub mod api;
pub mod app;
pub mod bundle;
pub mod config;
pub mod keys;
