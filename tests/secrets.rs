use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cenere_api_types::SecretEnvelope;

use cenere::application::secrets::{
    ReadOutcome, SecretService, SecretServiceError, SecretStore, SecretStoreError, StoreOutcome,
};
use cenere::domain::secrets::{NewSecret, SecretId};
use cenere::resilience::breaker::{BreakerConfig, CircuitBreaker};
use cenere::resilience::clock::{ManualClock, SharedClock};

/// In-memory actor fake with real read-once semantics: a read removes the
/// payload before returning it.
#[derive(Default)]
struct MemorySecretStore {
    secrets: Mutex<HashMap<String, SecretEnvelope>>,
    failing: AtomicBool,
    conflicts_remaining: AtomicU32,
    store_calls: AtomicU32,
    read_calls: AtomicU32,
    read_delay: Option<Duration>,
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn store(
        &self,
        id: &SecretId,
        secret: &NewSecret,
    ) -> Result<StoreOutcome, SecretStoreError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SecretStoreError::transport("connection refused"));
        }
        if self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                (left > 0).then(|| left - 1)
            })
            .is_ok()
        {
            return Ok(StoreOutcome::Conflict);
        }
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(id.as_str()) {
            return Ok(StoreOutcome::Conflict);
        }
        secrets.insert(
            id.as_str().to_string(),
            SecretEnvelope {
                ciphertext: secret.ciphertext.clone(),
                iv: secret.iv.clone(),
                expires_at_millis: secret.expires_seconds * 1_000,
            },
        );
        Ok(StoreOutcome::Stored)
    }

    async fn read(&self, id: &SecretId) -> Result<ReadOutcome, SecretStoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SecretStoreError::transport("connection refused"));
        }
        match self.secrets.lock().unwrap().remove(id.as_str()) {
            Some(envelope) => Ok(ReadOutcome::Secret(envelope)),
            None => Ok(ReadOutcome::Missing),
        }
    }

    async fn validate(&self, id: &SecretId) -> Result<bool, SecretStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SecretStoreError::transport("connection refused"));
        }
        Ok(self.secrets.lock().unwrap().contains_key(id.as_str()))
    }
}

fn service(store: Arc<MemorySecretStore>) -> SecretService {
    let clock: SharedClock = Arc::new(ManualClock::new(1_000_000));
    let breaker = Arc::new(CircuitBreaker::new(
        "secret-actor",
        BreakerConfig::default(),
        Arc::clone(&clock),
    ));
    SecretService::new(store, breaker, clock)
}

fn payload() -> NewSecret {
    NewSecret {
        ciphertext: BASE64.encode(b"opaque bytes"),
        iv: BASE64.encode([7u8; 12]),
        expires_seconds: 3_600,
    }
}

#[tokio::test]
async fn create_then_read_consumes_the_secret() {
    let store = Arc::new(MemorySecretStore::default());
    let service = service(store.clone());

    let created = service.create(payload()).await.expect("create");
    assert_eq!(created.expires_at_millis, 1_000_000 + 3_600_000);

    assert_eq!(service.validate(&created.id).await, Ok(true));

    let envelope = service.read(&created.id).await.expect("read");
    assert_eq!(envelope.ciphertext, payload().ciphertext);

    // First read destroyed the payload.
    assert_eq!(service.validate(&created.id).await, Ok(false));
    assert!(matches!(
        service.read(&created.id).await,
        Err(SecretServiceError::NotFound)
    ));
}

#[tokio::test]
async fn create_rejects_invalid_payloads_without_calling_the_actor() {
    let store = Arc::new(MemorySecretStore::default());
    let service = service(store.clone());

    let mut secret = payload();
    secret.ciphertext = "not base64!!!".to_string();
    assert!(matches!(
        service.create(secret).await,
        Err(SecretServiceError::Invalid(_))
    ));
    assert_eq!(store.store_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn id_collisions_are_retried_with_fresh_ids() {
    let store = Arc::new(MemorySecretStore::default());
    store.conflicts_remaining.store(2, Ordering::SeqCst);
    let service = service(store.clone());

    let created = service.create(payload()).await.expect("create");
    assert_eq!(store.store_calls.load(Ordering::SeqCst), 3);
    assert_eq!(service.validate(&created.id).await, Ok(true));
}

#[tokio::test]
async fn persistent_collisions_give_up() {
    let store = Arc::new(MemorySecretStore::default());
    store.conflicts_remaining.store(u32::MAX, Ordering::SeqCst);
    let service = service(store.clone());

    assert!(matches!(
        service.create(payload()).await,
        Err(SecretServiceError::IdSpaceExhausted)
    ));
    assert_eq!(store.store_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_reads_of_one_id_share_a_single_consume() {
    let mut store = MemorySecretStore::default();
    store.read_delay = Some(Duration::from_millis(50));
    let store = Arc::new(store);
    let service = Arc::new(service(store.clone()));

    let created = service.create(payload()).await.expect("create");

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = Arc::clone(&service);
        let id = created.id.clone();
        handles.push(tokio::spawn(async move { service.read(&id).await }));
    }
    for handle in handles {
        let envelope = handle.await.unwrap().expect("shared read");
        assert_eq!(envelope.ciphertext, payload().ciphertext);
    }
    assert_eq!(store.read_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn actor_failures_open_the_breaker_and_map_to_unavailable() {
    let store = Arc::new(MemorySecretStore::default());
    store.failing.store(true, Ordering::SeqCst);
    let service = service(store.clone());
    let id = SecretId::generate();

    // Failures surface as upstream errors until the threshold is reached.
    for _ in 0..5 {
        assert!(matches!(
            service.validate(&id).await,
            Err(SecretServiceError::Upstream { .. })
        ));
    }
    // Now the breaker rejects without reaching the actor.
    assert!(matches!(
        service.validate(&id).await,
        Err(SecretServiceError::Unavailable)
    ));
}
