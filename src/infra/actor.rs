//! HTTP clients for the sharded counter/storage actor.
//!
//! The actor is an opaque remote service; everything here translates its
//! status codes into the recoverable-versus-failure split the callers'
//! circuit breakers expect. Conflict and not-found are conditions, not
//! failures.

use std::time::Duration;

use async_trait::async_trait;
use cenere_api_types::{CounterCheckRequest, CounterCheckResponse, SecretEnvelope, StoreSecretRequest};
use reqwest::StatusCode;
use url::Url;

use crate::application::secrets::{ReadOutcome, SecretStore, SecretStoreError, StoreOutcome};
use crate::domain::secrets::{NewSecret, SecretId};
use crate::ratelimit::limiter::{CounterError, CounterStore};

use super::error::InfraError;

fn build_client(request_timeout: Duration) -> Result<reqwest::Client, InfraError> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|err| InfraError::actor(format!("failed to build actor http client: {err}")))
}

fn join_url(base: &Url, path: &str) -> Result<Url, InfraError> {
    base.join(path)
        .map_err(|err| InfraError::actor(format!("invalid actor url `{path}`: {err}")))
}

#[derive(Clone)]
pub struct HttpCounterStore {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpCounterStore {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, InfraError> {
        Ok(Self {
            http: build_client(request_timeout)?,
            base_url,
        })
    }
}

#[async_trait]
impl CounterStore for HttpCounterStore {
    async fn check(
        &self,
        shard: u32,
        key: &str,
        limit: u32,
        window_millis: u64,
    ) -> Result<CounterCheckResponse, CounterError> {
        let url = self
            .base_url
            .join(&format!("shards/{shard}/check"))
            .map_err(|err| CounterError::malformed(format!("invalid shard url: {err}")))?;
        let body = CounterCheckRequest {
            key: key.to_string(),
            limit,
            window_millis,
        };

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| CounterError::transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CounterError::transport(format!(
                "counter actor answered {status}"
            )));
        }
        response
            .json::<CounterCheckResponse>()
            .await
            .map_err(|err| CounterError::malformed(err.to_string()))
    }
}

#[derive(Clone)]
pub struct HttpSecretStore {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpSecretStore {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, InfraError> {
        // Fail on a base URL that cannot take path joins at startup rather
        // than on the first request.
        join_url(&base_url, "secrets/")?;
        Ok(Self {
            http: build_client(request_timeout)?,
            base_url,
        })
    }

    fn secret_url(&self, id: &SecretId, suffix: &str) -> Result<Url, SecretStoreError> {
        self.base_url
            .join(&format!("secrets/{}{suffix}", id.as_str()))
            .map_err(|err| SecretStoreError::malformed(format!("invalid secret url: {err}")))
    }
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn store(
        &self,
        id: &SecretId,
        secret: &NewSecret,
    ) -> Result<StoreOutcome, SecretStoreError> {
        let url = self.secret_url(id, "")?;
        let body = StoreSecretRequest {
            ciphertext: secret.ciphertext.clone(),
            iv: secret.iv.clone(),
            expires_seconds: secret.expires_seconds,
        };

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| SecretStoreError::transport(err.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(StoreOutcome::Stored),
            StatusCode::CONFLICT => Ok(StoreOutcome::Conflict),
            status => Err(SecretStoreError::transport(format!(
                "secret actor answered {status}"
            ))),
        }
    }

    async fn read(&self, id: &SecretId) -> Result<ReadOutcome, SecretStoreError> {
        let url = self.secret_url(id, "/read")?;
        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|err| SecretStoreError::transport(err.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let envelope = response
                    .json::<SecretEnvelope>()
                    .await
                    .map_err(|err| SecretStoreError::malformed(err.to_string()))?;
                Ok(ReadOutcome::Secret(envelope))
            }
            StatusCode::NOT_FOUND => Ok(ReadOutcome::Missing),
            status => Err(SecretStoreError::transport(format!(
                "secret actor answered {status}"
            ))),
        }
    }

    async fn validate(&self, id: &SecretId) -> Result<bool, SecretStoreError> {
        let url = self.secret_url(id, "")?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| SecretStoreError::transport(err.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(SecretStoreError::transport(format!(
                "secret actor answered {status}"
            ))),
        }
    }
}
