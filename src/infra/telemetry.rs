use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cenere_ratelimit_cache_hit_total",
            Unit::Count,
            "Total number of rate-limit decisions served from cache."
        );
        describe_counter!(
            "cenere_ratelimit_cache_miss_total",
            Unit::Count,
            "Total number of rate-limit checks that missed the decision cache."
        );
        describe_counter!(
            "cenere_ratelimit_denied_total",
            Unit::Count,
            "Total number of authoritative rate-limit denials, by traffic class."
        );
        describe_counter!(
            "cenere_ratelimit_degraded_total",
            Unit::Count,
            "Total number of checks answered by the local fallback counter."
        );
        describe_counter!(
            "cenere_breaker_rejected_total",
            Unit::Count,
            "Total number of calls rejected while a circuit was open."
        );
        describe_counter!(
            "cenere_breaker_transition_total",
            Unit::Count,
            "Total number of circuit state transitions, by circuit and state."
        );
        describe_counter!(
            "cenere_blacklist_ban_total",
            Unit::Count,
            "Total number of identities banned."
        );
        describe_counter!(
            "cenere_blacklist_rejected_total",
            Unit::Count,
            "Total number of requests rejected as blacklisted."
        );
        describe_counter!(
            "cenere_blacklist_sweep_removed_total",
            Unit::Count,
            "Total number of expired ban entries removed by sweeps."
        );
        describe_gauge!(
            "cenere_blacklist_size",
            Unit::Count,
            "Current number of in-memory ban entries."
        );
        describe_counter!(
            "cenere_secret_created_total",
            Unit::Count,
            "Total number of secrets stored."
        );
        describe_counter!(
            "cenere_secret_consumed_total",
            Unit::Count,
            "Total number of secrets destroyed by a first read."
        );
        describe_counter!(
            "cenere_secret_missing_total",
            Unit::Count,
            "Total number of reads for absent or already-consumed secrets."
        );
        describe_histogram!(
            "cenere_http_request_ms",
            Unit::Milliseconds,
            "Request handling latency in milliseconds."
        );
    });
}
