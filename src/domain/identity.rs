//! Pseudonymous client identities and counter-shard routing.

use sha2::{Digest, Sha256};

/// Shared bucket for requests whose network identity cannot be established.
/// They still pay for a rate budget instead of being waved through.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// How many digest bytes make up the pseudonym. Half the SHA-256 output is
/// plenty for collision resistance and keeps cache keys short.
const PSEUDONYM_BYTES: usize = 16;

/// A client identity reduced to a one-way hash, plus the counter shard that
/// owns its rate-limit state. The raw network address never leaves this
/// constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pseudonym: String,
    shard: u32,
}

impl ClientIdentity {
    /// Derive an identity from a raw network address. Empty or whitespace-only
    /// input collapses into [`UNKNOWN_IDENTITY`].
    ///
    /// The shard selector comes from a prefix of the same digest, so the
    /// authoritative counter for an identity is always routed to the same
    /// shard actor instance.
    pub fn derive(raw: &str, salt: &str, shard_count: u32) -> Self {
        let raw = raw.trim();
        let raw = if raw.is_empty() { UNKNOWN_IDENTITY } else { raw };

        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(raw.as_bytes());
        let digest = hasher.finalize();

        let selector = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Self {
            pseudonym: hex::encode(&digest[..PSEUDONYM_BYTES]),
            shard: selector % shard_count.max(1),
        }
    }

    pub fn pseudonym(&self) -> &str {
        &self.pseudonym
    }

    pub fn shard(&self) -> u32 {
        self.shard
    }
}
