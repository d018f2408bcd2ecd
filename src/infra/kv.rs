//! Durable key-value client mirroring blacklist entries across instances.

use std::time::Duration;

use async_trait::async_trait;
use cenere_api_types::{BanRecord, BanRecordList};
use reqwest::StatusCode;
use url::Url;

use crate::ratelimit::blacklist::{BanEntry, BanStore, BanStoreError};

use super::error::InfraError;

const BAN_KEY_PREFIX: &str = "ban:";

#[derive(Clone)]
pub struct HttpBanStore {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpBanStore {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, InfraError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| InfraError::actor(format!("failed to build kv http client: {err}")))?;
        Ok(Self { http, base_url })
    }

    fn entry_url(&self, identity: &str) -> Result<Url, BanStoreError> {
        self.base_url
            .join(&format!("kv/{BAN_KEY_PREFIX}{identity}"))
            .map_err(|err| BanStoreError::malformed(format!("invalid kv url: {err}")))
    }
}

fn record_from_entry(entry: &BanEntry) -> BanRecord {
    BanRecord {
        identity: entry.identity.clone(),
        reason: entry.reason.clone(),
        banned_at_millis: entry.banned_at_millis,
        expires_at_millis: entry.expires_at_millis,
    }
}

fn entry_from_record(record: BanRecord) -> BanEntry {
    BanEntry {
        identity: record.identity,
        reason: record.reason,
        banned_at_millis: record.banned_at_millis,
        expires_at_millis: record.expires_at_millis,
    }
}

#[async_trait]
impl BanStore for HttpBanStore {
    async fn get(&self, identity: &str) -> Result<Option<BanEntry>, BanStoreError> {
        let url = self.entry_url(identity)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| BanStoreError::transport(err.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let record = response
                    .json::<BanRecord>()
                    .await
                    .map_err(|err| BanStoreError::malformed(err.to_string()))?;
                Ok(Some(entry_from_record(record)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(BanStoreError::transport(format!(
                "kv store answered {status}"
            ))),
        }
    }

    async fn put(&self, entry: &BanEntry, ttl_seconds: u64) -> Result<(), BanStoreError> {
        let mut url = self.entry_url(&entry.identity)?;
        url.query_pairs_mut()
            .append_pair("ttl", &ttl_seconds.to_string());

        let response = self
            .http
            .put(url)
            .json(&record_from_entry(entry))
            .send()
            .await
            .map_err(|err| BanStoreError::transport(err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BanStoreError::transport(format!(
                "kv store answered {}",
                response.status()
            )))
        }
    }

    async fn delete(&self, identity: &str) -> Result<(), BanStoreError> {
        let url = self.entry_url(identity)?;
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|err| BanStoreError::transport(err.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Deleting an absent entry is a no-op, not a failure.
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(BanStoreError::transport(format!(
                "kv store answered {status}"
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<BanEntry>, BanStoreError> {
        let mut url = self
            .base_url
            .join("kv")
            .map_err(|err| BanStoreError::malformed(format!("invalid kv url: {err}")))?;
        url.query_pairs_mut().append_pair("prefix", BAN_KEY_PREFIX);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| BanStoreError::transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(BanStoreError::transport(format!(
                "kv store answered {}",
                response.status()
            )));
        }
        let listing = response
            .json::<BanRecordList>()
            .await
            .map_err(|err| BanStoreError::malformed(err.to_string()))?;
        Ok(listing.bans.into_iter().map(entry_from_record).collect())
    }
}
