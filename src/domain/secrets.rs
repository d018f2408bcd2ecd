//! Secret identifiers and payload validation.
//!
//! Payloads arrive already encrypted; the only domain rules here are shape
//! rules (valid base64, bounded sizes, sane lifetimes).

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;

use super::error::DomainError;

pub const MAX_CIPHERTEXT_BYTES: usize = 128 * 1024;
pub const MAX_IV_BYTES: usize = 64;
pub const MIN_EXPIRES_SECONDS: u64 = 60;
pub const MAX_EXPIRES_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Random 128-bit identifier a secret is stored behind, rendered as 32
/// lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretId(String);

impl SecretId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let well_formed =
            raw.len() == 32 && raw.bytes().all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'));
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(DomainError::validation(
                "secret id must be 32 lowercase hex characters",
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A client-encrypted payload submitted for storage.
#[derive(Debug, Clone)]
pub struct NewSecret {
    /// Base64-encoded ciphertext.
    pub ciphertext: String,
    /// Base64-encoded initialization vector.
    pub iv: String,
    pub expires_seconds: u64,
}

impl NewSecret {
    pub fn validate(&self) -> Result<(), DomainError> {
        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|_| DomainError::validation("ciphertext must be valid base64"))?;
        if ciphertext.is_empty() {
            return Err(DomainError::validation("ciphertext must not be empty"));
        }
        if ciphertext.len() > MAX_CIPHERTEXT_BYTES {
            return Err(DomainError::validation(format!(
                "ciphertext exceeds {MAX_CIPHERTEXT_BYTES} bytes"
            )));
        }

        let iv = BASE64
            .decode(&self.iv)
            .map_err(|_| DomainError::validation("iv must be valid base64"))?;
        if iv.is_empty() || iv.len() > MAX_IV_BYTES {
            return Err(DomainError::validation(format!(
                "iv must be between 1 and {MAX_IV_BYTES} bytes"
            )));
        }

        if !(MIN_EXPIRES_SECONDS..=MAX_EXPIRES_SECONDS).contains(&self.expires_seconds) {
            return Err(DomainError::validation(format!(
                "expires_seconds must be between {MIN_EXPIRES_SECONDS} and {MAX_EXPIRES_SECONDS}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewSecret {
        NewSecret {
            ciphertext: BASE64.encode(b"opaque bytes"),
            iv: BASE64.encode([7u8; 12]),
            expires_seconds: 3600,
        }
    }

    #[test]
    fn generated_ids_parse_back() {
        let id = SecretId::generate();
        assert_eq!(SecretId::parse(id.as_str()).ok(), Some(id));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(SecretId::parse("short").is_err());
        assert!(SecretId::parse("ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ").is_err());
        assert!(SecretId::parse("../../../../../../etc/passwd0000").is_err());
    }

    #[test]
    fn accepts_well_formed_payload() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_base64() {
        let mut secret = sample();
        secret.ciphertext = "not base64!!!".to_string();
        assert!(secret.validate().is_err());
    }

    #[test]
    fn rejects_empty_ciphertext() {
        let mut secret = sample();
        secret.ciphertext = String::new();
        assert!(secret.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_expiry() {
        let mut secret = sample();
        secret.expires_seconds = 1;
        assert!(secret.validate().is_err());
        secret.expires_seconds = MAX_EXPIRES_SECONDS + 1;
        assert!(secret.validate().is_err());
    }
}
