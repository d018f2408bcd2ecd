//! Sharded rate limiting against an external counter actor.
//!
//! Decision path: cache hit → enforce cached verdict; cache miss → coalesce
//! concurrent checks for the same identity and class into one authoritative
//! call through the counter-actor circuit breaker; cache the verdict bounded
//! by the window boundary. When the actor is unreachable, a conservative
//! per-identity local counter takes over at a fraction of the normal limit.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cenere_api_types::CounterCheckResponse;
use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::domain::identity::ClientIdentity;
use crate::resilience::breaker::{BreakerError, CircuitBreaker};
use crate::resilience::cache::TtlCache;
use crate::resilience::clock::SharedClock;
use crate::resilience::single_flight::SingleFlight;

use super::blacklist::Blacklist;
use super::{RateLimitDecision, TrafficClass};

/// Above this many live fallback windows, stale ones are swept on the next
/// degraded check.
const FALLBACK_SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Error)]
pub enum CounterError {
    #[error("counter actor request failed: {message}")]
    Transport { message: String },
    #[error("counter actor returned a malformed response: {message}")]
    Malformed { message: String },
}

impl CounterError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Authoritative, sharded hit counter. Each shard serializes updates to its
/// own keys; this side only routes and interprets.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn check(
        &self,
        shard: u32,
        key: &str,
        limit: u32,
        window_millis: u64,
    ) -> Result<CounterCheckResponse, CounterError>;
}

#[derive(Debug, Clone)]
pub struct RateClassConfig {
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub create: RateClassConfig,
    pub read: RateClassConfig,
    /// Upper bound on how long a decision may be served from cache.
    pub cache_ttl: Duration,
    pub cache_capacity: NonZeroUsize,
    /// Divisor applied to a class limit while in degraded mode.
    pub fallback_fraction: u32,
    pub fallback_window: Duration,
}

impl RateLimiterConfig {
    fn class(&self, class: TrafficClass) -> &RateClassConfig {
        match class {
            TrafficClass::Create => &self.create,
            TrafficClass::Read => &self.read,
        }
    }
}

/// Breaker and transport failures collapse into one cloneable error so a
/// single authoritative attempt can fan its outcome out to coalesced waiters.
#[derive(Debug, Clone, Error)]
enum AuthoritativeError {
    #[error("counter circuit is open")]
    BreakerOpen,
    #[error("counter check timed out")]
    Timeout,
    #[error("{0}")]
    Counter(CounterError),
}

impl From<BreakerError<CounterError>> for AuthoritativeError {
    fn from(error: BreakerError<CounterError>) -> Self {
        match error {
            BreakerError::Open { .. } => AuthoritativeError::BreakerOpen,
            BreakerError::Timeout { .. } => AuthoritativeError::Timeout,
            BreakerError::Upstream(inner) => AuthoritativeError::Counter(inner),
        }
    }
}

struct FallbackWindow {
    window_start_millis: u64,
    count: u32,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    counters: Option<Arc<dyn CounterStore>>,
    breaker: Arc<CircuitBreaker>,
    blacklist: Option<Arc<Blacklist>>,
    decisions: TtlCache<String, RateLimitDecision>,
    in_flight: SingleFlight<RateLimitDecision, AuthoritativeError>,
    fallback: DashMap<String, FallbackWindow>,
    clock: SharedClock,
}

impl RateLimiter {
    /// Without a counter store the limiter is permissive (every check is
    /// allowed at the configured limit) rather than failing.
    pub fn new(
        config: RateLimiterConfig,
        counters: Option<Arc<dyn CounterStore>>,
        breaker: Arc<CircuitBreaker>,
        blacklist: Option<Arc<Blacklist>>,
        clock: SharedClock,
    ) -> Self {
        let decisions = TtlCache::new(config.cache_capacity, None, Arc::clone(&clock));
        Self {
            config,
            counters,
            breaker,
            blacklist,
            decisions,
            in_flight: SingleFlight::new(),
            fallback: DashMap::new(),
            clock,
        }
    }

    pub async fn check(&self, identity: &ClientIdentity, class: TrafficClass) -> RateLimitDecision {
        let Some(counters) = self.counters.as_ref() else {
            return self.permissive_decision(class);
        };

        let cache_key = format!("ratelimit:{}:{}", class.as_str(), identity.pseudonym());
        if let Some(decision) = self.decisions.get(&cache_key) {
            counter!("cenere_ratelimit_cache_hit_total").increment(1);
            return decision;
        }
        counter!("cenere_ratelimit_cache_miss_total").increment(1);

        let outcome = self
            .in_flight
            .run(&cache_key, || {
                let counters = Arc::clone(counters);
                let breaker = Arc::clone(&self.breaker);
                let clock = Arc::clone(&self.clock);
                let decisions = &self.decisions;
                let blacklist = self.blacklist.clone();
                let class_config = self.config.class(class).clone();
                let cache_ttl = self.config.cache_ttl;
                let shard = identity.shard();
                let pseudonym = identity.pseudonym().to_string();
                let counter_key = cache_key.clone();
                async move {
                    let wire = breaker
                        .execute(|| {
                            counters.check(
                                shard,
                                &counter_key,
                                class_config.limit,
                                class_config.window.as_millis() as u64,
                            )
                        })
                        .await
                        .map_err(AuthoritativeError::from)?;

                    let now = clock.now_millis();
                    let decision = decision_from_wire(wire, &class_config, now);

                    // Never cache past the window boundary.
                    let remaining_window = decision.reset_at_millis.saturating_sub(now);
                    let ttl = cache_ttl.min(Duration::from_millis(remaining_window));
                    if !ttl.is_zero() {
                        decisions.insert_with_ttl(counter_key, decision.clone(), Some(ttl));
                    }

                    if !decision.allowed {
                        counter!("cenere_ratelimit_denied_total", "class" => class.as_str())
                            .increment(1);
                        if let Some(blacklist) = &blacklist {
                            blacklist.observe_denial(&pseudonym, &decision);
                        }
                    }
                    Ok(decision)
                }
            })
            .await;

        match outcome {
            Ok(decision) => decision,
            Err(error) => {
                warn!(
                    target = "cenere::ratelimit",
                    class = class.as_str(),
                    error = %error,
                    "authoritative rate-limit check failed, using local fallback"
                );
                counter!("cenere_ratelimit_degraded_total").increment(1);
                self.degraded_check(identity, class)
            }
        }
    }

    fn permissive_decision(&self, class: TrafficClass) -> RateLimitDecision {
        let class_config = self.config.class(class);
        let now = self.clock.now_millis();
        RateLimitDecision {
            allowed: true,
            limit: class_config.limit,
            remaining: class_config.limit,
            reset_at_millis: now + class_config.window.as_millis() as u64,
            count: 0,
        }
    }

    /// Conservative local counting while the actor is unreachable: a short
    /// per-identity window capped at a fraction of the normal limit. Denies
    /// past the cap instead of hard-failing or opening the gates.
    fn degraded_check(&self, identity: &ClientIdentity, class: TrafficClass) -> RateLimitDecision {
        let class_config = self.config.class(class);
        let degraded_limit = (class_config.limit / self.config.fallback_fraction.max(1)).max(1);
        let window_millis = self.config.fallback_window.as_millis() as u64;
        let now = self.clock.now_millis();

        let key = format!("fallback:{}:{}", class.as_str(), identity.pseudonym());
        let (count, window_start) = {
            let mut window = self.fallback.entry(key).or_insert(FallbackWindow {
                window_start_millis: now,
                count: 0,
            });
            if now.saturating_sub(window.window_start_millis) >= window_millis {
                window.window_start_millis = now;
                window.count = 0;
            }
            window.count += 1;
            (window.count, window.window_start_millis)
        };

        if self.fallback.len() > FALLBACK_SWEEP_THRESHOLD {
            self.fallback
                .retain(|_, window| now.saturating_sub(window.window_start_millis) < window_millis);
        }

        let reset_at_millis = window_start + window_millis;
        if count > degraded_limit {
            RateLimitDecision {
                allowed: false,
                limit: degraded_limit,
                remaining: 0,
                reset_at_millis,
                count,
            }
        } else {
            RateLimitDecision {
                allowed: true,
                limit: degraded_limit,
                remaining: degraded_limit - count,
                reset_at_millis,
                count,
            }
        }
    }
}

fn decision_from_wire(
    wire: CounterCheckResponse,
    class_config: &RateClassConfig,
    now_millis: u64,
) -> RateLimitDecision {
    // A denial must carry a boundary strictly in the future; clamp anything
    // stale or malformed from the actor to one full window out.
    let reset_at_millis = if wire.reset_at_millis > now_millis {
        wire.reset_at_millis
    } else {
        now_millis + class_config.window.as_millis() as u64
    };
    RateLimitDecision {
        allowed: wire.allowed,
        limit: wire.limit,
        remaining: wire.remaining,
        reset_at_millis,
        count: wire.count,
    }
}
