//! Per-provider coordinators serializing all upstream traffic.
//!
//! Every provider owns one token worker and, when revocable, one revoke worker. Inbound
//! handlers enqueue a job and await its reply; the worker drains the queue sequentially,
//! so at most one upstream call per provider is ever in flight in this process.
//! Cross-process serialization comes from the row-level write lock the store acquires
//! inside each transaction.

pub mod revoke;
pub mod token;

pub use revoke::*;
pub use token::*;

const QUEUE_DEPTH: usize = 64;
