use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cenere_api_types::{
    CreateSecretRequest, CreateSecretResponse, ReadSecretResponse, SecretStatusResponse,
};

use crate::application::secrets::SecretServiceError;
use crate::domain::secrets::{NewSecret, SecretId};

use super::error::ApiError;
use super::state::AppState;

pub async fn create_secret(
    State(state): State<AppState>,
    Json(payload): Json<CreateSecretRequest>,
) -> Response {
    let secret = NewSecret {
        ciphertext: payload.ciphertext,
        iv: payload.iv,
        expires_seconds: payload.expires_seconds,
    };
    match state.secrets.create(secret).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(CreateSecretResponse {
                id: created.id.to_string(),
                expires_at_millis: created.expires_at_millis,
            }),
        )
            .into_response(),
        Err(error) => secret_error_response(error),
    }
}

pub async fn read_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match SecretId::parse(&id) {
        Ok(id) => id,
        Err(error) => {
            return ApiError::bad_request("Invalid secret id", Some(error.to_string()))
                .into_response();
        }
    };
    match state.secrets.read(&id).await {
        Ok(envelope) => Json(ReadSecretResponse {
            ciphertext: envelope.ciphertext,
            iv: envelope.iv,
        })
        .into_response(),
        Err(error) => secret_error_response(error),
    }
}

pub async fn validate_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match SecretId::parse(&id) {
        Ok(id) => id,
        Err(error) => {
            return ApiError::bad_request("Invalid secret id", Some(error.to_string()))
                .into_response();
        }
    };
    match state.secrets.validate(&id).await {
        Ok(exists) => Json(SecretStatusResponse { exists }).into_response(),
        Err(error) => secret_error_response(error),
    }
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn secret_error_response(error: SecretServiceError) -> Response {
    match error {
        SecretServiceError::NotFound => {
            ApiError::not_found("Secret not found or already consumed").into_response()
        }
        SecretServiceError::Unavailable => ApiError::service_unavailable().into_response(),
        SecretServiceError::Invalid(domain_error) => {
            ApiError::bad_request("Request could not be processed", Some(domain_error.to_string()))
                .into_response()
        }
        // Actor faults and exhausted id retries surface as a generic internal
        // error; the detail stays in the logs.
        SecretServiceError::Upstream { message } => ApiError::internal(message).into_response(),
        SecretServiceError::IdSpaceExhausted => {
            ApiError::internal("exhausted secret id attempts").into_response()
        }
    }
}
