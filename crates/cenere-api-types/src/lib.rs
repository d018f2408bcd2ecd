//! Shared request and response types for the cenere public API and the
//! storage/counter actor protocol.
//!
//! The service itself depends on this crate; external actor implementations
//! and API clients can depend on it without pulling in the server.

use serde::{Deserialize, Serialize};

// ============================================================================
// Public API
// ============================================================================

/// Body of `POST /api/secrets`. All cryptography happens client-side; the
/// service only ever sees the ciphertext and initialization vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecretRequest {
    /// Base64-encoded ciphertext.
    pub ciphertext: String,
    /// Base64-encoded initialization vector.
    pub iv: String,
    /// Requested lifetime in seconds.
    pub expires_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecretResponse {
    pub id: String,
    pub expires_at_millis: u64,
}

/// Body of a successful `GET /api/secrets/{id}`. The payload is destroyed
/// server-side before this response is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadSecretResponse {
    pub ciphertext: String,
    pub iv: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretStatusResponse {
    pub exists: bool,
}

// ============================================================================
// Storage/counter actor protocol
// ============================================================================

/// Body of `POST {actor}/shards/{shard}/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterCheckRequest {
    pub key: String,
    pub limit: u32,
    pub window_millis: u64,
}

/// The actor's authoritative rate-limit verdict for one key and window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterCheckResponse {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_millis: u64,
    pub count: u32,
}

/// Body of `POST {actor}/secrets/{id}`. The actor answers 201 on success and
/// 409 when the id is already taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSecretRequest {
    pub ciphertext: String,
    pub iv: String,
    pub expires_seconds: u64,
}

/// Stored ciphertext as returned by the actor's consuming read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub expires_at_millis: u64,
}

// ============================================================================
// Durable key-value store (blacklist mirror)
// ============================================================================

/// A ban entry as mirrored to the durable key-value store so that other
/// process instances eventually observe it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub identity: String,
    pub reason: String,
    pub banned_at_millis: u64,
    pub expires_at_millis: u64,
}

/// Response of `GET {kv}/kv?prefix=ban:`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanRecordList {
    pub bans: Vec<BanRecord>,
}
