//! PDP HTTP API module.
//!
//! # Purpose
//! Route handlers for the authorization callout and the operator endpoints
//! (policy, keys, claim cache).
pub mod authorize;
pub mod error;
pub mod keys;
pub mod policy;
pub mod types;
