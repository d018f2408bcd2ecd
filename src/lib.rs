//! cenere: edge request layer for an ephemeral, zero-knowledge secret-sharing
//! service.
//!
//! Clients submit already-encrypted payloads; cenere stores them behind a
//! random identifier via an external storage actor and destroys them on first
//! read. The crate's substance is the resilience substrate between the
//! stateless handlers and that actor: sharded rate limiting, circuit
//! breaking, in-flight deduplication, TTL caching, and an abuse blacklist
//! with eventual cross-instance synchronization.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod ratelimit;
pub mod resilience;
