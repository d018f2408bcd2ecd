//! Secret lifecycle: create behind a random id, consume on first read,
//! probe without consuming.
//!
//! Every actor call runs through this service's circuit breaker; concurrent
//! reads of the same id coalesce into one consuming call whose payload fans
//! out to every waiter.

use std::sync::Arc;

use async_trait::async_trait;
use cenere_api_types::SecretEnvelope;
use metrics::counter;
use thiserror::Error;
use tracing::debug;

use crate::domain::error::DomainError;
use crate::domain::secrets::{NewSecret, SecretId};
use crate::resilience::breaker::{BreakerError, CircuitBreaker};
use crate::resilience::clock::SharedClock;
use crate::resilience::single_flight::SingleFlight;

/// With 128-bit random ids a single collision is already remarkable; a
/// streak of them means the actor is misbehaving.
const CREATE_ID_ATTEMPTS: u32 = 3;

/// Outcome of a store attempt. A conflict is a recoverable condition, not an
/// actor failure, so it travels on the `Ok` side and never trips the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    Conflict,
}

/// Outcome of a consuming read. `Missing` covers both never-existed and
/// already-consumed; the actor does not distinguish them and neither do we.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Secret(SecretEnvelope),
    Missing,
}

#[derive(Debug, Clone, Error)]
pub enum SecretStoreError {
    #[error("secret actor request failed: {message}")]
    Transport { message: String },
    #[error("secret actor returned a malformed response: {message}")]
    Malformed { message: String },
}

impl SecretStoreError {
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

/// The external storage actor. It owns atomic read-once-delete semantics;
/// this side only routes, retries recoverable conditions, and breaks the
/// circuit on real failures.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn store(&self, id: &SecretId, secret: &NewSecret)
    -> Result<StoreOutcome, SecretStoreError>;
    async fn read(&self, id: &SecretId) -> Result<ReadOutcome, SecretStoreError>;
    async fn validate(&self, id: &SecretId) -> Result<bool, SecretStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretServiceError {
    #[error("secret backend unavailable")]
    Unavailable,
    #[error("secret not found or already consumed")]
    NotFound,
    #[error("{0}")]
    Invalid(DomainError),
    #[error("secret backend error: {message}")]
    Upstream { message: String },
    #[error("could not allocate an unused secret id")]
    IdSpaceExhausted,
}

impl From<DomainError> for SecretServiceError {
    fn from(error: DomainError) -> Self {
        Self::Invalid(error)
    }
}

impl From<BreakerError<SecretStoreError>> for SecretServiceError {
    fn from(error: BreakerError<SecretStoreError>) -> Self {
        match error {
            BreakerError::Open { .. } | BreakerError::Timeout { .. } => Self::Unavailable,
            BreakerError::Upstream(inner) => Self::Upstream {
                message: inner.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedSecret {
    pub id: SecretId,
    pub expires_at_millis: u64,
}

pub struct SecretService {
    store: Arc<dyn SecretStore>,
    breaker: Arc<CircuitBreaker>,
    reads: SingleFlight<SecretEnvelope, SecretServiceError>,
    clock: SharedClock,
}

impl SecretService {
    pub fn new(store: Arc<dyn SecretStore>, breaker: Arc<CircuitBreaker>, clock: SharedClock) -> Self {
        Self {
            store,
            breaker,
            reads: SingleFlight::new(),
            clock,
        }
    }

    /// Validate and store a payload behind a fresh random id. Id collisions
    /// are retried with a new id a bounded number of times.
    pub async fn create(&self, secret: NewSecret) -> Result<CreatedSecret, SecretServiceError> {
        secret.validate()?;

        for attempt in 1..=CREATE_ID_ATTEMPTS {
            let id = SecretId::generate();
            match self.breaker.execute(|| self.store.store(&id, &secret)).await {
                Ok(StoreOutcome::Stored) => {
                    counter!("cenere_secret_created_total").increment(1);
                    let expires_at_millis =
                        self.clock.now_millis() + secret.expires_seconds * 1_000;
                    return Ok(CreatedSecret {
                        id,
                        expires_at_millis,
                    });
                }
                Ok(StoreOutcome::Conflict) => {
                    debug!(
                        target = "cenere::secrets",
                        attempt, "secret id collision, retrying with a fresh id"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(SecretServiceError::IdSpaceExhausted)
    }

    /// Consume a secret. Concurrent reads of the same id collapse into one
    /// actor call; every caller receives the payload, after which the id is
    /// gone for good.
    pub async fn read(&self, id: &SecretId) -> Result<SecretEnvelope, SecretServiceError> {
        let flight_key = format!("secret:read:{}", id.as_str());
        let store = Arc::clone(&self.store);
        let breaker = Arc::clone(&self.breaker);
        let id = id.clone();
        self.reads
            .run(&flight_key, move || async move {
                match breaker.execute(|| store.read(&id)).await {
                    Ok(ReadOutcome::Secret(envelope)) => {
                        counter!("cenere_secret_consumed_total").increment(1);
                        Ok(envelope)
                    }
                    Ok(ReadOutcome::Missing) => {
                        counter!("cenere_secret_missing_total").increment(1);
                        Err(SecretServiceError::NotFound)
                    }
                    Err(error) => Err(error.into()),
                }
            })
            .await
    }

    /// Existence probe that does not consume the payload.
    pub async fn validate(&self, id: &SecretId) -> Result<bool, SecretServiceError> {
        self.breaker
            .execute(|| self.store.validate(id))
            .await
            .map_err(SecretServiceError::from)
    }
}
