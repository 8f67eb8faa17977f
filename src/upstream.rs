//! Upstream grant execution: transport plumbing and the typed OAuth facade.
//!
//! `transport` owns the reqwest handle handed to the `oauth2` crate, captures the raw
//! response body for auditing and pass-through, and applies per-provider request
//! transforms. `facade` exposes the four grant entry points the coordinators call.

pub mod facade;
pub mod transport;

pub use facade::*;
pub use transport::*;
