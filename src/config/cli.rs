use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the cenere binary.
#[derive(Debug, Parser)]
#[command(name = "cenere", version, about = "cenere secret-sharing edge server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CENERE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the cenere HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the storage/counter actor base URL.
    #[arg(long = "actor-base-url", value_name = "URL")]
    pub actor_base_url: Option<String>,

    /// Override the number of counter shards.
    #[arg(long = "actor-shard-count", value_name = "COUNT")]
    pub actor_shard_count: Option<u32>,

    /// Override the durable key-value store base URL.
    #[arg(long = "kv-base-url", value_name = "URL")]
    pub kv_base_url: Option<String>,

    /// Override the create-class rate limit.
    #[arg(long = "rate-limit-create-max-requests", value_name = "COUNT")]
    pub rate_limit_create_max_requests: Option<u32>,

    /// Override the create-class rate window.
    #[arg(long = "rate-limit-create-window-seconds", value_name = "SECONDS")]
    pub rate_limit_create_window_seconds: Option<u64>,

    /// Override the read-class rate limit.
    #[arg(long = "rate-limit-read-max-requests", value_name = "COUNT")]
    pub rate_limit_read_max_requests: Option<u32>,

    /// Override the read-class rate window.
    #[arg(long = "rate-limit-read-window-seconds", value_name = "SECONDS")]
    pub rate_limit_read_window_seconds: Option<u64>,

    /// Override the circuit breaker failure threshold.
    #[arg(long = "breaker-failure-threshold", value_name = "COUNT")]
    pub breaker_failure_threshold: Option<u32>,

    /// Override the circuit breaker reset timeout.
    #[arg(long = "breaker-reset-timeout-seconds", value_name = "SECONDS")]
    pub breaker_reset_timeout_seconds: Option<u64>,

    /// Override the abuse ban duration.
    #[arg(long = "blacklist-ban-seconds", value_name = "SECONDS")]
    pub blacklist_ban_seconds: Option<u64>,

    /// Honor the first X-Forwarded-For hop when resolving client identity.
    #[arg(
        long = "http-trust-forwarded-for",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub http_trust_forwarded_for: Option<bool>,
}
