use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use cenere::{
    application::{error::AppError, secrets::{SecretService, SecretStore}},
    config,
    infra::{
        actor::{HttpCounterStore, HttpSecretStore},
        error::InfraError,
        http::{self, AppState, RequestPolicy},
        kv::HttpBanStore,
        telemetry,
    },
    ratelimit::{
        blacklist::{BanStore, Blacklist, BlacklistConfig},
        limiter::{CounterStore, RateClassConfig, RateLimiter, RateLimiterConfig},
    },
    resilience::{
        breaker::{BreakerConfig, CircuitBreaker},
        clock::{SharedClock, SystemClock},
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;

    // Absorb bans issued before this instance started.
    app.blacklist.resync().await;

    let maintenance_handle =
        spawn_blacklist_maintenance(app.blacklist.clone(), settings.blacklist.sweep_interval);

    let result = serve_http(&settings, app.state).await;

    maintenance_handle.abort();
    let _ = maintenance_handle.await;

    // Final maintenance pass so the instance leaves a current mirror behind.
    app.blacklist.maintain().await;

    result
}

struct ApplicationContext {
    state: AppState,
    blacklist: Arc<Blacklist>,
}

fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let clock: SharedClock = Arc::new(SystemClock);

    let breaker_config = BreakerConfig {
        failure_threshold: settings.breaker.failure_threshold.get(),
        success_threshold: settings.breaker.success_threshold.get(),
        per_call_timeout: settings.breaker.per_call_timeout,
        reset_timeout: settings.breaker.reset_timeout,
    };
    let secret_breaker = Arc::new(CircuitBreaker::new(
        "secret-actor",
        breaker_config.clone(),
        Arc::clone(&clock),
    ));
    let counter_breaker = Arc::new(CircuitBreaker::new(
        "counter-actor",
        breaker_config,
        Arc::clone(&clock),
    ));

    let actor_url = settings
        .actor
        .base_url
        .clone()
        .ok_or_else(|| AppError::from(InfraError::configuration("actor.base_url is not configured")))?;
    let secret_store: Arc<dyn SecretStore> = Arc::new(
        HttpSecretStore::new(actor_url.clone(), settings.actor.request_timeout)
            .map_err(AppError::from)?,
    );
    let counter_store: Arc<dyn CounterStore> = Arc::new(
        HttpCounterStore::new(actor_url, settings.actor.request_timeout).map_err(AppError::from)?,
    );

    let ban_store: Option<Arc<dyn BanStore>> = match settings.kv.base_url.clone() {
        Some(url) => Some(Arc::new(
            HttpBanStore::new(url, settings.kv.request_timeout).map_err(AppError::from)?,
        )),
        None => {
            info!(
                target = "cenere::blacklist",
                "no kv store configured, blacklist runs in-memory only"
            );
            None
        }
    };

    let blacklist = Arc::new(Blacklist::new(
        BlacklistConfig {
            ban_duration: settings.blacklist.ban_duration,
            abuse_multiplier: settings.blacklist.abuse_multiplier.get(),
            sweep_interval: settings.blacklist.sweep_interval,
            resync_interval: settings.blacklist.resync_interval,
            max_entries: settings.blacklist.max_entries.get(),
        },
        ban_store,
        Arc::clone(&clock),
    ));

    let rate_limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig {
            create: RateClassConfig {
                limit: settings.rate_limit.create.max_requests.get(),
                window: settings.rate_limit.create.window,
            },
            read: RateClassConfig {
                limit: settings.rate_limit.read.max_requests.get(),
                window: settings.rate_limit.read.window,
            },
            cache_ttl: settings.rate_limit.cache_ttl,
            cache_capacity: settings.rate_limit.cache_capacity,
            fallback_fraction: settings.rate_limit.fallback_fraction.get(),
            fallback_window: settings.rate_limit.fallback_window,
        },
        Some(counter_store),
        counter_breaker,
        Some(Arc::clone(&blacklist)),
        Arc::clone(&clock),
    ));

    let secrets = Arc::new(SecretService::new(
        secret_store,
        secret_breaker,
        Arc::clone(&clock),
    ));

    let cors_allow_origin = settings
        .http
        .cors_allow_origin
        .as_deref()
        .and_then(|origin| origin.parse().ok());
    let policy = Arc::new(RequestPolicy {
        max_body_bytes: settings.http.max_body_bytes.get(),
        max_header_count: settings.http.max_header_count.get() as usize,
        trust_forwarded_for: settings.http.trust_forwarded_for,
        cors_allow_origin,
        identity_salt: settings.rate_limit.identity_salt.clone(),
        shard_count: settings.actor.shard_count.get(),
    });

    let state = AppState {
        secrets,
        rate_limiter,
        blacklist: Arc::clone(&blacklist),
        policy,
        clock,
    };

    Ok(ApplicationContext { state, blacklist })
}

fn spawn_blacklist_maintenance(
    blacklist: Arc<Blacklist>,
    cadence: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cadence);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            blacklist.maintain().await;
        }
    })
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "cenere::http",
        addr = %settings.server.addr,
        "listening"
    );

    let grace = settings.server.graceful_shutdown;
    let draining = Arc::new(tokio::sync::Notify::new());
    let drain_started = Arc::clone(&draining);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal(grace).await;
        drain_started.notify_one();
    });

    // The drain deadline starts when the signal fires, so a wedged
    // connection cannot hold shutdown open forever.
    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "cenere::http",
                grace_seconds = grace.as_secs(),
                "graceful shutdown deadline exceeded, aborting remaining connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(
            target = "cenere::http",
            error = %error,
            "failed to install shutdown handler"
        );
        return;
    }
    info!(
        target = "cenere::http",
        grace_seconds = grace.as_secs(),
        "shutdown signal received, draining connections"
    );
}
