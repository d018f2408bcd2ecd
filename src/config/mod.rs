//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;
#[cfg(test)]
mod tests;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cenere";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: u64 = 256 * 1024;
const DEFAULT_MAX_HEADER_COUNT: u32 = 64;
const DEFAULT_ACTOR_SHARD_COUNT: u32 = 16;
const DEFAULT_ACTOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_KV_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CREATE_MAX_REQUESTS: u32 = 60;
const DEFAULT_CREATE_WINDOW_SECS: u64 = 3600;
const DEFAULT_READ_MAX_REQUESTS: u32 = 600;
const DEFAULT_READ_WINDOW_SECS: u64 = 3600;
const DEFAULT_DECISION_CACHE_TTL_SECS: u64 = 10;
const DEFAULT_DECISION_CACHE_CAPACITY: u64 = 4096;
const DEFAULT_FALLBACK_FRACTION: u32 = 10;
const DEFAULT_FALLBACK_WINDOW_SECS: u64 = 60;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_SUCCESS_THRESHOLD: u32 = 2;
const DEFAULT_BREAKER_CALL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BREAKER_RESET_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BAN_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_ABUSE_MULTIPLIER: u32 = 5;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_BLACKLIST_MAX_ENTRIES: u64 = 100_000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub http: HttpSettings,
    pub actor: ActorSettings,
    pub kv: KvSettings,
    pub rate_limit: RateLimitSettings,
    pub breaker: BreakerSettings,
    pub blacklist: BlacklistSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_body_bytes: NonZeroUsize,
    pub max_header_count: NonZeroU32,
    pub trust_forwarded_for: bool,
    pub cors_allow_origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActorSettings {
    pub base_url: Option<Url>,
    pub shard_count: NonZeroU32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KvSettings {
    pub base_url: Option<Url>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RateClassSettings {
    pub max_requests: NonZeroU32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub create: RateClassSettings,
    pub read: RateClassSettings,
    pub cache_ttl: Duration,
    pub cache_capacity: NonZeroUsize,
    pub fallback_fraction: NonZeroU32,
    pub fallback_window: Duration,
    pub identity_salt: String,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: NonZeroU32,
    pub success_threshold: NonZeroU32,
    pub per_call_timeout: Duration,
    pub reset_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BlacklistSettings {
    pub ban_duration: Duration,
    pub abuse_multiplier: NonZeroU32,
    pub sweep_interval: Duration,
    pub resync_interval: Duration,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Parse CLI arguments and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("CENERE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    http: RawHttpSettings,
    actor: RawActorSettings,
    kv: RawKvSettings,
    rate_limit: RawRateLimitSettings,
    breaker: RawBreakerSettings,
    blacklist: RawBlacklistSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    max_body_bytes: Option<u64>,
    max_header_count: Option<u32>,
    trust_forwarded_for: Option<bool>,
    cors_allow_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawActorSettings {
    base_url: Option<String>,
    shard_count: Option<u32>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawKvSettings {
    base_url: Option<String>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateClassSettings {
    max_requests: Option<u32>,
    window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    create: RawRateClassSettings,
    read: RawRateClassSettings,
    cache_ttl_seconds: Option<u64>,
    cache_capacity: Option<u64>,
    fallback_fraction: Option<u32>,
    fallback_window_seconds: Option<u64>,
    identity_salt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBreakerSettings {
    failure_threshold: Option<u32>,
    success_threshold: Option<u32>,
    per_call_timeout_seconds: Option<u64>,
    reset_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBlacklistSettings {
    ban_seconds: Option<u64>,
    abuse_multiplier: Option<u32>,
    sweep_interval_seconds: Option<u64>,
    resync_interval_seconds: Option<u64>,
    max_entries: Option<u64>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.actor_base_url.as_ref() {
            self.actor.base_url = Some(url.clone());
        }
        if let Some(count) = overrides.actor_shard_count {
            self.actor.shard_count = Some(count);
        }
        if let Some(url) = overrides.kv_base_url.as_ref() {
            self.kv.base_url = Some(url.clone());
        }
        if let Some(max) = overrides.rate_limit_create_max_requests {
            self.rate_limit.create.max_requests = Some(max);
        }
        if let Some(window) = overrides.rate_limit_create_window_seconds {
            self.rate_limit.create.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_read_max_requests {
            self.rate_limit.read.max_requests = Some(max);
        }
        if let Some(window) = overrides.rate_limit_read_window_seconds {
            self.rate_limit.read.window_seconds = Some(window);
        }
        if let Some(threshold) = overrides.breaker_failure_threshold {
            self.breaker.failure_threshold = Some(threshold);
        }
        if let Some(seconds) = overrides.breaker_reset_timeout_seconds {
            self.breaker.reset_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.blacklist_ban_seconds {
            self.blacklist.ban_seconds = Some(seconds);
        }
        if let Some(trust) = overrides.http_trust_forwarded_for {
            self.http.trust_forwarded_for = Some(trust);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            http,
            actor,
            kv,
            rate_limit,
            breaker,
            blacklist,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            http: build_http_settings(http)?,
            actor: build_actor_settings(actor)?,
            kv: build_kv_settings(kv)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            breaker: build_breaker_settings(breaker)?,
            blacklist: build_blacklist_settings(blacklist)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let max_body_bytes = http.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_bytes = usize::try_from(max_body_bytes)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("http.max_body_bytes", "must be greater than zero")
        })?;

    let max_header_count = NonZeroU32::new(http.max_header_count.unwrap_or(DEFAULT_MAX_HEADER_COUNT))
        .ok_or_else(|| {
            LoadError::invalid("http.max_header_count", "must be greater than zero")
        })?;

    let cors_allow_origin = http.cors_allow_origin.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(HttpSettings {
        max_body_bytes,
        max_header_count,
        trust_forwarded_for: http.trust_forwarded_for.unwrap_or(false),
        cors_allow_origin,
    })
}

fn build_actor_settings(actor: RawActorSettings) -> Result<ActorSettings, LoadError> {
    let base_url = parse_optional_url(actor.base_url, "actor.base_url")?;
    let shard_count = NonZeroU32::new(actor.shard_count.unwrap_or(DEFAULT_ACTOR_SHARD_COUNT))
        .ok_or_else(|| LoadError::invalid("actor.shard_count", "must be greater than zero"))?;
    let timeout_secs = actor
        .request_timeout_seconds
        .unwrap_or(DEFAULT_ACTOR_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "actor.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ActorSettings {
        base_url,
        shard_count,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_kv_settings(kv: RawKvSettings) -> Result<KvSettings, LoadError> {
    let base_url = parse_optional_url(kv.base_url, "kv.base_url")?;
    let timeout_secs = kv.request_timeout_seconds.unwrap_or(DEFAULT_KV_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "kv.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(KvSettings {
        base_url,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_rate_class(
    raw: RawRateClassSettings,
    default_max: u32,
    default_window_secs: u64,
    key: &'static str,
) -> Result<RateClassSettings, LoadError> {
    let max_requests = NonZeroU32::new(raw.max_requests.unwrap_or(default_max))
        .ok_or_else(|| LoadError::invalid(key, "max_requests must be greater than zero"))?;
    let window_secs = raw.window_seconds.unwrap_or(default_window_secs);
    if window_secs == 0 {
        return Err(LoadError::invalid(key, "window_seconds must be greater than zero"));
    }
    Ok(RateClassSettings {
        max_requests,
        window: Duration::from_secs(window_secs),
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let create = build_rate_class(
        rate_limit.create,
        DEFAULT_CREATE_MAX_REQUESTS,
        DEFAULT_CREATE_WINDOW_SECS,
        "rate_limit.create",
    )?;
    let read = build_rate_class(
        rate_limit.read,
        DEFAULT_READ_MAX_REQUESTS,
        DEFAULT_READ_WINDOW_SECS,
        "rate_limit.read",
    )?;

    let cache_capacity = rate_limit
        .cache_capacity
        .unwrap_or(DEFAULT_DECISION_CACHE_CAPACITY);
    let cache_capacity = usize::try_from(cache_capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("rate_limit.cache_capacity", "must be greater than zero")
        })?;

    let fallback_fraction =
        NonZeroU32::new(rate_limit.fallback_fraction.unwrap_or(DEFAULT_FALLBACK_FRACTION))
            .ok_or_else(|| {
                LoadError::invalid("rate_limit.fallback_fraction", "must be greater than zero")
            })?;

    let fallback_window_secs = rate_limit
        .fallback_window_seconds
        .unwrap_or(DEFAULT_FALLBACK_WINDOW_SECS);
    if fallback_window_secs == 0 {
        return Err(LoadError::invalid(
            "rate_limit.fallback_window_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RateLimitSettings {
        create,
        read,
        cache_ttl: Duration::from_secs(
            rate_limit
                .cache_ttl_seconds
                .unwrap_or(DEFAULT_DECISION_CACHE_TTL_SECS),
        ),
        cache_capacity,
        fallback_fraction,
        fallback_window: Duration::from_secs(fallback_window_secs),
        identity_salt: rate_limit.identity_salt.unwrap_or_default(),
    })
}

fn build_breaker_settings(breaker: RawBreakerSettings) -> Result<BreakerSettings, LoadError> {
    let failure_threshold = NonZeroU32::new(
        breaker
            .failure_threshold
            .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
    )
    .ok_or_else(|| LoadError::invalid("breaker.failure_threshold", "must be greater than zero"))?;

    let success_threshold = NonZeroU32::new(
        breaker
            .success_threshold
            .unwrap_or(DEFAULT_BREAKER_SUCCESS_THRESHOLD),
    )
    .ok_or_else(|| LoadError::invalid("breaker.success_threshold", "must be greater than zero"))?;

    let per_call_secs = breaker
        .per_call_timeout_seconds
        .unwrap_or(DEFAULT_BREAKER_CALL_TIMEOUT_SECS);
    if per_call_secs == 0 {
        return Err(LoadError::invalid(
            "breaker.per_call_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let reset_secs = breaker
        .reset_timeout_seconds
        .unwrap_or(DEFAULT_BREAKER_RESET_TIMEOUT_SECS);
    if reset_secs == 0 {
        return Err(LoadError::invalid(
            "breaker.reset_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(BreakerSettings {
        failure_threshold,
        success_threshold,
        per_call_timeout: Duration::from_secs(per_call_secs),
        reset_timeout: Duration::from_secs(reset_secs),
    })
}

fn build_blacklist_settings(
    blacklist: RawBlacklistSettings,
) -> Result<BlacklistSettings, LoadError> {
    let ban_secs = blacklist.ban_seconds.unwrap_or(DEFAULT_BAN_SECONDS);
    if ban_secs == 0 {
        return Err(LoadError::invalid(
            "blacklist.ban_seconds",
            "must be greater than zero",
        ));
    }

    let abuse_multiplier =
        NonZeroU32::new(blacklist.abuse_multiplier.unwrap_or(DEFAULT_ABUSE_MULTIPLIER))
            .ok_or_else(|| {
                LoadError::invalid("blacklist.abuse_multiplier", "must be greater than zero")
            })?;

    let max_entries = blacklist.max_entries.unwrap_or(DEFAULT_BLACKLIST_MAX_ENTRIES);
    let max_entries = usize::try_from(max_entries)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("blacklist.max_entries", "must be greater than zero")
        })?;

    Ok(BlacklistSettings {
        ban_duration: Duration::from_secs(ban_secs),
        abuse_multiplier,
        sweep_interval: Duration::from_secs(
            blacklist
                .sweep_interval_seconds
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        ),
        resync_interval: Duration::from_secs(
            blacklist
                .resync_interval_seconds
                .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS),
        ),
        max_entries,
    })
}

fn parse_optional_url(raw: Option<String>, key: &'static str) -> Result<Option<Url>, LoadError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    // A base URL must end in `/` for path joins to append instead of replace.
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&normalized)
        .map(Some)
        .map_err(|err| LoadError::invalid(key, format!("failed to parse url: {err}")))
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    format!("{host}:{port}")
        .parse::<SocketAddr>()
        .map_err(|err| format!("failed to parse `{host}:{port}`: {err}"))
}
