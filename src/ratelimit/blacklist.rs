//! Abuse detection and the banned-identity blacklist.
//!
//! Bans live in an in-memory map for fast request-path lookups and are
//! mirrored to an optional durable key-value store so other process
//! instances eventually observe them. Expiry is lazy on lookup; periodic
//! sweeps and a hard size ceiling bound the map, and a minimum-interval
//! resync absorbs bans issued elsewhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use thiserror::Error;
use tracing::{debug, warn};

use crate::resilience::clock::SharedClock;
use crate::resilience::lock::{rw_read, rw_write};

use super::RateLimitDecision;

const SOURCE: &str = "ratelimit::blacklist";

const ABUSE_REASON: &str = "rate-limit abuse";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    pub identity: String,
    pub reason: String,
    pub banned_at_millis: u64,
    pub expires_at_millis: u64,
}

impl BanEntry {
    fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at_millis <= now_millis
    }
}

#[derive(Debug, Error)]
pub enum BanStoreError {
    #[error("ban store request failed: {message}")]
    Transport { message: String },
    #[error("ban store returned a malformed response: {message}")]
    Malformed { message: String },
}

impl BanStoreError {
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

/// Durable mirror for ban entries. Absence of a configured store degrades the
/// blacklist to in-memory-only operation; it never fails requests.
#[async_trait]
pub trait BanStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<BanEntry>, BanStoreError>;
    async fn put(&self, entry: &BanEntry, ttl_seconds: u64) -> Result<(), BanStoreError>;
    async fn delete(&self, identity: &str) -> Result<(), BanStoreError>;
    async fn list(&self) -> Result<Vec<BanEntry>, BanStoreError>;
}

#[derive(Debug, Clone)]
pub struct BlacklistConfig {
    /// How long an abusive identity stays banned.
    pub ban_duration: Duration,
    /// A denial is abusive once its count reaches `limit × multiplier`.
    pub abuse_multiplier: u32,
    pub sweep_interval: Duration,
    /// Minimum spacing between pulls from the durable store.
    pub resync_interval: Duration,
    /// Hard ceiling on in-memory entries; exceeding it forces a sweep.
    pub max_entries: usize,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            ban_duration: Duration::from_secs(24 * 60 * 60),
            abuse_multiplier: 5,
            sweep_interval: Duration::from_secs(60),
            resync_interval: Duration::from_secs(30),
            max_entries: 100_000,
        }
    }
}

pub struct Blacklist {
    config: BlacklistConfig,
    entries: RwLock<HashMap<String, BanEntry>>,
    store: Option<Arc<dyn BanStore>>,
    last_sweep_millis: AtomicU64,
    last_resync_millis: AtomicU64,
    clock: SharedClock,
}

impl Blacklist {
    pub fn new(
        config: BlacklistConfig,
        store: Option<Arc<dyn BanStore>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            store,
            last_sweep_millis: AtomicU64::new(0),
            last_resync_millis: AtomicU64::new(0),
            clock,
        }
    }

    /// Whether `identity` is currently banned. A stale entry reads as
    /// not-banned and is removed on the spot. Lookups also opportunistically
    /// trigger the periodic sweep and the background resync when their
    /// intervals have elapsed.
    pub fn is_banned(self: &Arc<Self>, identity: &str) -> bool {
        let now = self.clock.now_millis();
        if interval_elapsed(&self.last_sweep_millis, now, self.config.sweep_interval) {
            self.sweep(now);
        }
        self.maybe_resync(now);

        let stale = {
            let entries = rw_read(&self.entries, SOURCE, "is_banned");
            match entries.get(identity) {
                Some(entry) if entry.is_expired(now) => true,
                Some(_) => return true,
                None => return false,
            }
        };
        if stale {
            rw_write(&self.entries, SOURCE, "is_banned.expire").remove(identity);
        }
        false
    }

    /// Record a ban immediately and mirror it to the durable store in the
    /// background so the response is never blocked on persistence.
    pub fn ban(&self, identity: &str, reason: &str, duration: Duration) {
        let now = self.clock.now_millis();
        let entry = BanEntry {
            identity: identity.to_string(),
            reason: reason.to_string(),
            banned_at_millis: now,
            expires_at_millis: now + duration.as_millis() as u64,
        };

        {
            let mut entries = rw_write(&self.entries, SOURCE, "ban");
            entries.insert(identity.to_string(), entry.clone());
            if entries.len() > self.config.max_entries {
                sweep_map(&mut entries, now);
            }
            gauge!("cenere_blacklist_size").set(entries.len() as f64);
        }
        warn!(
            target = "cenere::blacklist",
            identity,
            reason,
            duration_secs = duration.as_secs(),
            "identity banned"
        );
        counter!("cenere_blacklist_ban_total").increment(1);

        if let Some(store) = self.store.clone() {
            let ttl_seconds = duration.as_secs().max(1);
            tokio::spawn(async move {
                if let Err(error) = store.put(&entry, ttl_seconds).await {
                    warn!(
                        target = "cenere::blacklist",
                        identity = %entry.identity,
                        error = %error,
                        "failed to persist ban"
                    );
                }
            });
        }
    }

    pub fn unban(&self, identity: &str) {
        rw_write(&self.entries, SOURCE, "unban").remove(identity);
        debug!(target = "cenere::blacklist", identity, "identity unbanned");

        if let Some(store) = self.store.clone() {
            let identity = identity.to_string();
            tokio::spawn(async move {
                if let Err(error) = store.delete(&identity).await {
                    warn!(
                        target = "cenere::blacklist",
                        identity = %identity,
                        error = %error,
                        "failed to remove persisted ban"
                    );
                }
            });
        }
    }

    /// A single rejection is never abusive; the count has to reach the
    /// configured multiple of the limit.
    pub fn detect_abuse(&self, decision: &RateLimitDecision) -> bool {
        !decision.allowed
            && decision.count >= decision.limit.saturating_mul(self.config.abuse_multiplier)
    }

    /// Feed a denial into abuse detection, banning the identity when it
    /// crosses the threshold.
    pub fn observe_denial(&self, identity: &str, decision: &RateLimitDecision) {
        if !self.detect_abuse(decision) {
            return;
        }
        warn!(
            target = "cenere::blacklist",
            identity,
            count = decision.count,
            limit = decision.limit,
            "abusive traffic detected"
        );
        self.ban(identity, ABUSE_REASON, self.config.ban_duration);
    }

    /// Periodic maintenance: sweep expired entries and pull bans issued by
    /// other instances. Driven by an interval task in `main`; lookups also
    /// trigger both lazily.
    pub async fn maintain(&self) {
        self.sweep(self.clock.now_millis());
        self.resync().await;
    }

    /// Pull every persisted ban and absorb the ones still in force. Local
    /// entries with a later expiry win over the mirrored copy.
    pub async fn resync(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        match store.list().await {
            Ok(bans) => {
                let now = self.clock.now_millis();
                let mut entries = rw_write(&self.entries, SOURCE, "resync");
                let mut absorbed = 0usize;
                for ban in bans {
                    if ban.is_expired(now) {
                        continue;
                    }
                    match entries.get(&ban.identity) {
                        Some(existing) if existing.expires_at_millis >= ban.expires_at_millis => {}
                        _ => {
                            entries.insert(ban.identity.clone(), ban);
                            absorbed += 1;
                        }
                    }
                }
                if entries.len() > self.config.max_entries {
                    sweep_map(&mut entries, now);
                }
                gauge!("cenere_blacklist_size").set(entries.len() as f64);
                if absorbed > 0 {
                    debug!(
                        target = "cenere::blacklist",
                        absorbed, "absorbed bans from durable store"
                    );
                }
            }
            Err(error) => {
                warn!(
                    target = "cenere::blacklist",
                    error = %error,
                    "blacklist resync failed"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self, now_millis: u64) {
        let mut entries = rw_write(&self.entries, SOURCE, "sweep");
        sweep_map(&mut entries, now_millis);
        gauge!("cenere_blacklist_size").set(entries.len() as f64);
    }

    fn maybe_resync(self: &Arc<Self>, now_millis: u64) {
        if self.store.is_none() {
            return;
        }
        if !interval_elapsed(&self.last_resync_millis, now_millis, self.config.resync_interval) {
            return;
        }
        let blacklist = Arc::clone(self);
        tokio::spawn(async move {
            blacklist.resync().await;
        });
    }
}

fn sweep_map(entries: &mut HashMap<String, BanEntry>, now_millis: u64) {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now_millis));
    let removed = before - entries.len();
    if removed > 0 {
        counter!("cenere_blacklist_sweep_removed_total").increment(removed as u64);
        debug!(
            target = "cenere::blacklist",
            removed, "swept expired ban entries"
        );
    }
}

/// True at most once per interval: the caller that wins the compare-exchange
/// owns this tick.
fn interval_elapsed(last_millis: &AtomicU64, now_millis: u64, interval: Duration) -> bool {
    let interval_millis = interval.as_millis() as u64;
    let last = last_millis.load(Ordering::Relaxed);
    now_millis.saturating_sub(last) >= interval_millis
        && last_millis
            .compare_exchange(last, now_millis, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
}
