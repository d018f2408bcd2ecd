use std::sync::Arc;

use axum::http::HeaderValue;

use crate::application::secrets::SecretService;
use crate::ratelimit::blacklist::Blacklist;
use crate::ratelimit::limiter::RateLimiter;
use crate::resilience::clock::SharedClock;

/// Transport-level constraints and identity-resolution policy, resolved from
/// configuration once at startup.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    pub max_body_bytes: usize,
    pub max_header_count: usize,
    /// Whether to honor the first `X-Forwarded-For` hop. Only enable behind
    /// a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub cors_allow_origin: Option<HeaderValue>,
    pub identity_salt: String,
    pub shard_count: u32,
}

#[derive(Clone)]
pub struct AppState {
    pub secrets: Arc<SecretService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub blacklist: Arc<Blacklist>,
    pub policy: Arc<RequestPolicy>,
    pub clock: SharedClock,
}
