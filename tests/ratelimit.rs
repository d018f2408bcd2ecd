use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cenere_api_types::CounterCheckResponse;

use cenere::domain::identity::ClientIdentity;
use cenere::ratelimit::blacklist::{Blacklist, BlacklistConfig};
use cenere::ratelimit::limiter::{
    CounterError, CounterStore, RateClassConfig, RateLimiter, RateLimiterConfig,
};
use cenere::ratelimit::TrafficClass;
use cenere::resilience::breaker::{BreakerConfig, CircuitBreaker};
use cenere::resilience::clock::{Clock, ManualClock, SharedClock};

/// Counter fake that keeps authoritative per-key counts, like one shard of
/// the real actor. Optionally fails every call or delays to let concurrent
/// checks pile up.
struct WindowedCounter {
    clock: SharedClock,
    calls: AtomicU32,
    failing: AtomicBool,
    delay: Option<Duration>,
    counts: Mutex<HashMap<String, u32>>,
}

impl WindowedCounter {
    fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            calls: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            delay: None,
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for WindowedCounter {
    async fn check(
        &self,
        _shard: u32,
        key: &str,
        limit: u32,
        window_millis: u64,
    ) -> Result<CounterCheckResponse, CounterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CounterError::transport("connection refused"));
        }
        let count = {
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        Ok(CounterCheckResponse {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at_millis: self.clock.now_millis() + window_millis,
            count,
        })
    }
}

/// Counter fake that always answers with one scripted verdict.
struct ScriptedCounter {
    response: CounterCheckResponse,
}

#[async_trait]
impl CounterStore for ScriptedCounter {
    async fn check(
        &self,
        _shard: u32,
        _key: &str,
        _limit: u32,
        _window_millis: u64,
    ) -> Result<CounterCheckResponse, CounterError> {
        Ok(self.response.clone())
    }
}

fn limiter_config(limit: u32, window: Duration, cache_ttl: Duration) -> RateLimiterConfig {
    RateLimiterConfig {
        create: RateClassConfig {
            limit,
            window,
        },
        read: RateClassConfig { limit, window },
        cache_ttl,
        cache_capacity: NonZeroUsize::new(1024).unwrap(),
        fallback_fraction: 10,
        fallback_window: Duration::from_secs(60),
    }
}

fn breaker(clock: SharedClock) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        "counter-actor",
        BreakerConfig {
            per_call_timeout: Duration::from_secs(1),
            ..BreakerConfig::default()
        },
        clock,
    ))
}

fn identity() -> ClientIdentity {
    ClientIdentity::derive("203.0.113.7", "test-salt", 4)
}

#[tokio::test]
async fn denies_the_101st_request_with_retry_after() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = clock.clone();
    let counter = Arc::new(WindowedCounter::new(shared.clone()));
    // Zero cache horizon so every check consults the authoritative counter.
    let limiter = RateLimiter::new(
        limiter_config(100, Duration::from_millis(3_600_000), Duration::ZERO),
        Some(counter.clone()),
        breaker(shared.clone()),
        None,
        shared.clone(),
    );

    let identity = identity();
    for _ in 0..100 {
        let decision = limiter.check(&identity, TrafficClass::Read).await;
        assert!(decision.allowed);
    }

    let decision = limiter.check(&identity, TrafficClass::Read).await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert_eq!(decision.count, 101);
    let now = shared.now_millis();
    assert!(decision.reset_at_millis > now);
    let expected = (decision.reset_at_millis - now).div_ceil(1_000).max(1);
    assert_eq!(decision.retry_after_secs(now), expected);
    assert_eq!(expected, 3_600);
}

#[tokio::test]
async fn fresh_cache_hit_skips_the_actor() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = clock.clone();
    let counter = Arc::new(WindowedCounter::new(shared.clone()));
    let limiter = RateLimiter::new(
        limiter_config(100, Duration::from_secs(3_600), Duration::from_secs(10)),
        Some(counter.clone()),
        breaker(shared.clone()),
        None,
        shared.clone(),
    );

    let identity = identity();
    let first = limiter.check(&identity, TrafficClass::Read).await;
    let second = limiter.check(&identity, TrafficClass::Read).await;
    assert_eq!(counter.calls(), 1);
    assert_eq!(first, second);

    // Past the cache horizon the actor is consulted again.
    clock.advance(10_000);
    let third = limiter.check(&identity, TrafficClass::Read).await;
    assert_eq!(counter.calls(), 2);
    assert_eq!(third.count, 2);
}

#[tokio::test]
async fn distinct_classes_have_distinct_budgets() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = clock.clone();
    let counter = Arc::new(WindowedCounter::new(shared.clone()));
    let limiter = RateLimiter::new(
        limiter_config(1, Duration::from_secs(3_600), Duration::ZERO),
        Some(counter.clone()),
        breaker(shared.clone()),
        None,
        shared.clone(),
    );

    let identity = identity();
    assert!(limiter.check(&identity, TrafficClass::Create).await.allowed);
    assert!(!limiter.check(&identity, TrafficClass::Create).await.allowed);
    // The read budget is untouched by create traffic.
    assert!(limiter.check(&identity, TrafficClass::Read).await.allowed);
}

#[tokio::test]
async fn concurrent_checks_coalesce_into_one_authoritative_call() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = clock.clone();
    let mut counter = WindowedCounter::new(shared.clone());
    counter.delay = Some(Duration::from_millis(50));
    let counter = Arc::new(counter);
    let limiter = Arc::new(RateLimiter::new(
        limiter_config(100, Duration::from_secs(3_600), Duration::from_secs(10)),
        Some(counter.clone()),
        breaker(shared.clone()),
        None,
        shared.clone(),
    ));

    let identity = identity();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = Arc::clone(&limiter);
        let identity = identity.clone();
        handles.push(tokio::spawn(async move {
            limiter.check(&identity, TrafficClass::Read).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().allowed);
    }
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn actor_failure_falls_back_to_conservative_local_counting() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = clock.clone();
    let counter = Arc::new(WindowedCounter::new(shared.clone()));
    counter.failing.store(true, Ordering::SeqCst);
    let limiter = RateLimiter::new(
        limiter_config(100, Duration::from_secs(3_600), Duration::ZERO),
        Some(counter.clone()),
        breaker(shared.clone()),
        None,
        shared.clone(),
    );

    let identity = identity();
    // One-tenth of the limit survives; the eleventh request is denied.
    for expected_count in 1..=10u32 {
        let decision = limiter.check(&identity, TrafficClass::Read).await;
        assert!(decision.allowed, "request {expected_count} should pass");
        assert_eq!(decision.limit, 10);
    }
    let decision = limiter.check(&identity, TrafficClass::Read).await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert!(decision.reset_at_millis > shared.now_millis());

    // The fallback window rolls over and lets traffic through again.
    clock.advance(60_000);
    let decision = limiter.check(&identity, TrafficClass::Read).await;
    assert!(decision.allowed);
}

#[tokio::test]
async fn abusive_denials_trigger_a_ban_and_single_denials_do_not() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = clock.clone();
    let blacklist = Arc::new(Blacklist::new(
        BlacklistConfig::default(),
        None,
        shared.clone(),
    ));

    // count = limit × multiplier: abusive.
    let abusive = Arc::new(ScriptedCounter {
        response: CounterCheckResponse {
            allowed: false,
            limit: 100,
            remaining: 0,
            reset_at_millis: 1_000_000 + 60_000,
            count: 500,
        },
    });
    let limiter = RateLimiter::new(
        limiter_config(100, Duration::from_secs(3_600), Duration::ZERO),
        Some(abusive),
        breaker(shared.clone()),
        Some(Arc::clone(&blacklist)),
        shared.clone(),
    );
    let flooder = ClientIdentity::derive("198.51.100.99", "test-salt", 4);
    let decision = limiter.check(&flooder, TrafficClass::Create).await;
    assert!(!decision.allowed);
    assert!(blacklist.is_banned(flooder.pseudonym()));

    // A barely-over-limit denial is not abuse.
    let modest = Arc::new(ScriptedCounter {
        response: CounterCheckResponse {
            allowed: false,
            limit: 100,
            remaining: 0,
            reset_at_millis: 1_000_000 + 60_000,
            count: 101,
        },
    });
    let limiter = RateLimiter::new(
        limiter_config(100, Duration::from_secs(3_600), Duration::ZERO),
        Some(modest),
        breaker(shared.clone()),
        Some(Arc::clone(&blacklist)),
        shared.clone(),
    );
    let grazer = ClientIdentity::derive("198.51.100.100", "test-salt", 4);
    let decision = limiter.check(&grazer, TrafficClass::Create).await;
    assert!(!decision.allowed);
    assert!(!blacklist.is_banned(grazer.pseudonym()));
}

#[tokio::test]
async fn without_a_counter_store_the_limiter_is_permissive() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = clock.clone();
    let limiter = RateLimiter::new(
        limiter_config(100, Duration::from_secs(3_600), Duration::from_secs(10)),
        None,
        breaker(shared.clone()),
        None,
        shared.clone(),
    );

    let identity = identity();
    for _ in 0..500 {
        let decision = limiter.check(&identity, TrafficClass::Read).await;
        assert!(decision.allowed);
    }
}
