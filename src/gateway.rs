//! HTTP gateway: request parsing, response shaping, and the per-provider router.

pub mod body;
pub mod router;

pub use body::*;
pub use router::*;
