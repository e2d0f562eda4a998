//! Integration tests for registration against both backends.

use kpi_metrics::backend::{Backend, BackendKind, MemoryBackend, PrometheusBackend};
use kpi_metrics::catalog::Catalog;
use kpi_metrics::engine::Engine;
use kpi_metrics::error::Error;
use kpi_metrics::model::{LabelSet, RawKpi};
use kpi_metrics::registry::Registry;

fn catalog(raw: Vec<RawKpi>) -> Catalog {
    Catalog::load(raw).unwrap()
}

#[test]
fn registers_every_kpi_in_catalog_order() {
    let backend = MemoryBackend::new(None);
    let registry = Registry::register_all(
        &catalog(vec![
            RawKpi::new("b_metric", "counter"),
            RawKpi::new("a_metric", "gauge"),
        ]),
        &backend,
    )
    .unwrap();

    assert_eq!(registry.len(), 2);
    let names: Vec<&str> = registry
        .iter()
        .map(|entry| entry.descriptor.name.as_str())
        .collect();
    assert_eq!(names, vec!["b_metric", "a_metric"]);
    assert!(registry.get("a_metric").unwrap().instances.is_empty());
}

#[test]
fn prometheus_failure_rolls_back_earlier_registrations() {
    let backend = PrometheusBackend::new(None).unwrap();
    let result = Registry::register_all(
        &catalog(vec![
            RawKpi::new("good_counter", "counter").labels(["route"]),
            RawKpi::new("good_gauge", "gauge"),
            RawKpi::new("bad_labels", "gauge").labels(["bad key"]),
        ]),
        &backend,
    );
    assert!(matches!(result, Err(Error::Registration { ref name, .. }) if name == "bad_labels"));

    // Nothing is left behind: the same names register cleanly afterwards.
    let registry = Registry::register_all(
        &catalog(vec![
            RawKpi::new("good_counter", "counter").labels(["route"]),
            RawKpi::new("good_gauge", "gauge"),
        ]),
        &backend,
    )
    .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn backend_refuses_a_name_it_already_holds() {
    let backend = MemoryBackend::new(None);
    Registry::register_all(&catalog(vec![RawKpi::new("reqs", "counter")]), &backend).unwrap();

    let err = Registry::register_all(
        &catalog(vec![
            RawKpi::new("fresh", "gauge"),
            RawKpi::new("reqs", "counter"),
        ]),
        &backend,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Registration { ref name, .. } if name == "reqs"));

    // "fresh" was rolled back, so it can be registered again.
    Registry::register_all(&catalog(vec![RawKpi::new("fresh", "gauge")]), &backend).unwrap();
}

#[test]
fn failed_engine_registration_leaves_engine_unregistered() {
    let mut engine = Engine::new(BackendKind::Prometheus, None).unwrap();
    engine
        .load_kpis(vec![
            RawKpi::new("ok", "counter"),
            RawKpi::new("broken", "counter").labels(["has-dash"]),
        ])
        .unwrap();

    assert!(engine.register_metrics().is_err());
    assert!(!engine.is_registered());
    assert!(matches!(
        engine.increment("ok", &LabelSet::new()),
        Err(Error::UnknownMetric(_))
    ));
}

#[test]
fn prometheus_export_uses_text_format_and_namespace() {
    let mut engine = Engine::new(BackendKind::Prometheus, Some("core")).unwrap();
    engine
        .load_kpis(vec![
            RawKpi::new("reqs", "counter")
                .help("Requests served")
                .labels(["route", "method"]),
            RawKpi::new("temp", "gauge"),
        ])
        .unwrap();
    engine.register_metrics().unwrap();
    assert_eq!(engine.backend_kind(), BackendKind::Prometheus);

    engine
        .add("reqs", 2.0, &LabelSet::new().with("route", "/a"))
        .unwrap();
    engine.set("temp", 1.5, &LabelSet::new()).unwrap();

    let snapshot = engine.export().unwrap();
    assert!(snapshot.content_type.starts_with("text/plain"));
    let text = snapshot.as_text();
    assert!(text.contains("# HELP core_reqs Requests served"), "{text}");
    assert!(text.contains("# TYPE core_reqs counter"), "{text}");
    assert!(text.contains(r#"core_reqs{method="",route="/a"} 2"#), "{text}");
    assert!(text.contains("core_temp 1.5"), "{text}");
}

#[test]
fn memory_backend_prefixes_namespace() {
    let backend = MemoryBackend::new(Some("core"));
    let registry =
        Registry::register_all(&catalog(vec![RawKpi::new("temp", "gauge")]), &backend).unwrap();
    let entry = registry.get("temp").unwrap();
    backend
        .observe(
            entry.handle,
            &LabelSet::new(),
            kpi_metrics::model::Mutation::Set(4.0),
        )
        .unwrap();

    let doc: serde_json::Value = serde_json::from_slice(&backend.export().unwrap().body).unwrap();
    assert_eq!(doc["metrics"][0]["name"], "core_temp");
    assert_eq!(doc["metrics"][0]["samples"][0]["value"], 4.0);
}
