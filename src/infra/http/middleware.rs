use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, histogram};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::domain::identity::ClientIdentity;
use crate::ratelimit::TrafficClass;

use super::error::{ApiError, apply_rate_limit_headers, codes};
use super::state::AppState;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Reject requests that exceed transport-level limits before any work
/// happens. Body size is enforced separately by the router's body-limit
/// layer.
pub async fn transport_limits(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.headers().len() > state.policy.max_header_count {
        return ApiError::new(
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            codes::BAD_REQUEST,
            "Too many request headers",
            None,
        )
        .into_response();
    }
    next.run(request).await
}

/// Tag every request with a tracking id and stamp outbound responses with it
/// plus the configured CORS origin.
pub async fn decorate_responses(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    if let Some(origin) = &state.policy.cors_allow_origin {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    }
    response
}

/// Resolve the pseudonymous client identity once per request. Unknown or
/// unreadable addresses share one bucket instead of bypassing rate limits.
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let raw = client_address(&request, state.policy.trust_forwarded_for);
    let identity =
        ClientIdentity::derive(&raw, &state.policy.identity_salt, state.policy.shard_count);
    request.extensions_mut().insert(identity);
    next.run(request).await
}

fn client_address(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first_hop) = forwarded.split(',').next() {
                let first_hop = first_hop.trim();
                if !first_hop.is_empty() {
                    return first_hop.to_string();
                }
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default()
}

/// Short-circuit banned identities with 403 before they reach the rate
/// limiter or any business logic.
pub async fn reject_banned(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(identity) = request.extensions().get::<ClientIdentity>() else {
        warn!(
            target = "cenere::http",
            "missing client identity in blacklist middleware"
        );
        return ApiError::internal("identity extension missing").into_response();
    };
    if state.blacklist.is_banned(identity.pseudonym()) {
        counter!("cenere_blacklist_rejected_total").increment(1);
        return ApiError::forbidden().into_response();
    }
    next.run(request).await
}

pub async fn create_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce_rate_limit(state, request, next, TrafficClass::Create).await
}

pub async fn read_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce_rate_limit(state, request, next, TrafficClass::Read).await
}

async fn enforce_rate_limit(
    state: AppState,
    request: Request<Body>,
    next: Next,
    class: TrafficClass,
) -> Response {
    let Some(identity) = request.extensions().get::<ClientIdentity>().cloned() else {
        warn!(
            target = "cenere::http",
            "missing client identity in rate-limit middleware"
        );
        return ApiError::internal("identity extension missing").into_response();
    };

    let decision = state.rate_limiter.check(&identity, class).await;
    if !decision.allowed {
        return ApiError::rate_limited(&decision, state.clock.now_millis());
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let identity = request
        .extensions()
        .get::<ClientIdentity>()
        .map(|identity| identity.pseudonym().to_string())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();
    histogram!("cenere_http_request_ms").record(elapsed_ms as f64);

    if status.is_client_error() || status.is_server_error() {
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "cenere::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                identity = identity,
                "request failed",
            );
        } else {
            warn!(
                target = "cenere::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                identity = identity,
                "client request error",
            );
        }
    }

    response
}
