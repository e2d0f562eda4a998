use kpi_metrics::backend::BackendKind;
use kpi_metrics::config::Config;
use kpi_metrics::error::Error;
use secrecy::ExposeSecret;
use std::sync::Mutex;
use std::time::Duration;

// Environment variables are process-global; tests touching them run one at a time.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: &[&str] = &[
    "KPI_CATALOG",
    "METRICS_BACKEND",
    "METRICS_NAMESPACE",
    "PUSHGATEWAY_URL",
    "PUSHGATEWAY_TOKEN",
    "PUSH_JOB",
    "PUSH_INTERVAL_SECS",
    "PUSH_TIMEOUT_SECS",
    "LISTEN_ADDR",
    "OTEL_ENDPOINT",
    "LOG_LEVEL",
];

fn clear_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

fn set(var: &str, value: &str) {
    unsafe { std::env::set_var(var, value) };
}

#[test]
fn config_from_env_applies_defaults() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    set("KPI_CATALOG", "/etc/kpi/catalog.json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.catalog_path.to_str(), Some("/etc/kpi/catalog.json"));
    assert_eq!(config.backend, BackendKind::Prometheus);
    assert_eq!(config.namespace, None);
    assert_eq!(config.push_job, "kpi-metrics");
    assert_eq!(config.push_interval, Duration::from_secs(15));
    assert_eq!(config.push_timeout, Duration::from_secs(5));
    assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9464");
    assert_eq!(config.log_level, "info");
    assert!(config.push_target().is_none());

    clear_env();
}

#[test]
fn config_from_env_reads_overrides() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    set("KPI_CATALOG", "kpis.json");
    set("METRICS_BACKEND", "Memory");
    set("METRICS_NAMESPACE", "core");
    set("PUSHGATEWAY_URL", "http://gateway:9091");
    set("PUSHGATEWAY_TOKEN", "s3cret");
    set("PUSH_JOB", "edge");
    set("PUSH_INTERVAL_SECS", "30");
    set("LISTEN_ADDR", "0.0.0.0:8080");

    let config = Config::from_env().unwrap();
    assert_eq!(config.backend, BackendKind::Memory);
    assert_eq!(config.namespace.as_deref(), Some("core"));
    assert_eq!(config.push_interval, Duration::from_secs(30));
    assert_eq!(
        config.pushgateway_token.as_ref().map(|t| t.expose_secret()),
        Some("s3cret")
    );
    assert!(!format!("{config:?}").contains("s3cret"));

    let target = config.push_target().unwrap();
    assert_eq!(target.endpoint, "http://gateway:9091");
    assert_eq!(target.job, "edge");

    clear_env();
}

#[test]
fn config_from_env_fails_without_catalog() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    set("KPI_CATALOG", "   ");

    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    clear_env();
}

#[test]
fn config_from_env_rejects_bad_values() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    set("KPI_CATALOG", "kpis.json");

    set("PUSH_INTERVAL_SECS", "soon");
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    set("PUSH_INTERVAL_SECS", "0");
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    set("PUSH_INTERVAL_SECS", "10");
    set("METRICS_BACKEND", "datadog");
    assert!(matches!(
        Config::from_env(),
        Err(Error::BackendNotSupported(_))
    ));

    clear_env();
}
