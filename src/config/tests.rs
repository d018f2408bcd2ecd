use super::*;

#[test]
fn defaults_are_applied() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(settings.actor.base_url.is_none());
    assert_eq!(
        settings.rate_limit.create.max_requests.get(),
        DEFAULT_CREATE_MAX_REQUESTS
    );
    assert_eq!(
        settings.breaker.failure_threshold.get(),
        DEFAULT_BREAKER_FAILURE_THRESHOLD
    );
    assert_eq!(
        settings.blacklist.ban_duration,
        Duration::from_secs(DEFAULT_BAN_SECONDS)
    );
    assert!(!settings.http.trust_forwarded_for);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn actor_url_is_normalized_for_joins() {
    let mut raw = RawSettings::default();
    raw.actor.base_url = Some("http://actor.internal:8787/v1".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    let url = settings.actor.base_url.expect("actor url");
    assert!(url.as_str().ends_with('/'));
    assert_eq!(
        url.join("shards/3/check").expect("join").as_str(),
        "http://actor.internal:8787/v1/shards/3/check"
    );
}

#[test]
fn rejects_zero_port() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn rejects_zero_rate_window() {
    let mut raw = RawSettings::default();
    raw.rate_limit.read.window_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn rejects_malformed_actor_url() {
    let mut raw = RawSettings::default();
    raw.actor.base_url = Some("not a url".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["cenere"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "cenere",
        "serve",
        "--actor-base-url",
        "http://actor.internal:8787",
        "--rate-limit-create-max-requests",
        "10",
        "--http-trust-forwarded-for",
        "true",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(
                serve.overrides.actor_base_url.as_deref(),
                Some("http://actor.internal:8787")
            );
            assert_eq!(serve.overrides.rate_limit_create_max_requests, Some(10));
            assert_eq!(serve.overrides.http_trust_forwarded_for, Some(true));
        }
    }
}
