//! Integration tests for the metrics engine.

use kpi_metrics::backend::BackendKind;
use kpi_metrics::engine::Engine;
use kpi_metrics::error::Error;
use kpi_metrics::model::*;

fn test_engine() -> Engine {
    let mut engine = Engine::in_memory();
    engine
        .load_kpis(vec![
            RawKpi::new("reqs", "counter")
                .help("Requests served")
                .labels(["route"]),
            RawKpi::new("temp", "gauge").labels(["room"]),
            RawKpi::new("http_requests", "counter").labels(["method", "status"]),
            RawKpi::new("uptime", "gauge"),
        ])
        .unwrap();
    engine.register_metrics().unwrap();
    engine
}

fn route(path: &str) -> LabelSet {
    LabelSet::new().with("route", path)
}

fn room(name: &str) -> LabelSet {
    LabelSet::new().with("room", name)
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[test]
fn counter_increments_and_adds() {
    let engine = test_engine();

    engine.increment("reqs", &route("/a")).unwrap();
    engine.increment("reqs", &route("/a")).unwrap();
    engine.add("reqs", 3.0, &route("/a")).unwrap();

    assert_eq!(engine.value("reqs", &route("/a")).unwrap(), 5.0);
    assert_eq!(engine.list_instances(), vec!["reqs{route=/a}".to_string()]);
}

#[test]
fn counter_rejects_decrease_and_keeps_value() {
    let engine = test_engine();
    engine.increment("reqs", &route("/a")).unwrap();
    engine.increment("reqs", &route("/a")).unwrap();

    let err = engine.decrement("reqs", &route("/a")).unwrap_err();
    assert!(matches!(
        err,
        Error::OperationNotAllowed {
            kind: KpiKind::Counter,
            operation: Operation::Decrement,
            ..
        }
    ));

    let err = engine.set("reqs", 0.0, &route("/a")).unwrap_err();
    assert!(matches!(
        err,
        Error::OperationNotAllowed {
            operation: Operation::Set,
            ..
        }
    ));

    let err = engine.add("reqs", -1.0, &route("/a")).unwrap_err();
    assert!(matches!(err, Error::InvalidValue { .. }));

    assert_eq!(engine.value("reqs", &route("/a")).unwrap(), 2.0);
}

#[test]
fn counter_set_is_never_allowed_even_with_bad_operand() {
    let engine = test_engine();

    for value in [f64::NAN, f64::INFINITY, -1.0, 0.0, 10.0] {
        let err = engine.set("reqs", value, &route("/a")).unwrap_err();
        assert!(matches!(err, Error::OperationNotAllowed { .. }), "value {value}");
    }
    assert!(engine.list_instances().is_empty());
}

#[test]
fn rejected_mutation_on_fresh_labels_creates_nothing() {
    let engine = test_engine();

    assert!(engine.decrement("reqs", &route("/new")).is_err());
    assert!(engine.add("reqs", -2.0, &route("/new")).is_err());
    assert!(engine.list_instances().is_empty());
}

#[test]
fn add_zero_is_legal_and_creates_instance() {
    let engine = test_engine();

    engine.add("reqs", 0.0, &route("/idle")).unwrap();

    assert_eq!(engine.value("reqs", &route("/idle")).unwrap(), 0.0);
    assert_eq!(engine.list_instances(), vec!["reqs{route=/idle}".to_string()]);
}

#[test]
fn non_finite_add_is_invalid_value() {
    let engine = test_engine();

    assert!(matches!(
        engine.add("temp", f64::NAN, &room("kitchen")),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        engine.add("reqs", f64::INFINITY, &route("/a")),
        Err(Error::InvalidValue { .. })
    ));
    assert!(engine.list_instances().is_empty());
}

// ---------------------------------------------------------------------------
// Gauges
// ---------------------------------------------------------------------------

#[test]
fn gauge_set_then_decrement() {
    let engine = test_engine();

    engine.set("temp", 3.2, &room("kitchen")).unwrap();
    engine.decrement("temp", &room("kitchen")).unwrap();

    let value = engine.value("temp", &room("kitchen")).unwrap();
    assert!((value - 2.2).abs() < 1e-9, "got {value}");
}

#[test]
fn gauge_accepts_negative_add_and_goes_below_zero() {
    let engine = test_engine();

    engine.add("temp", -4.5, &room("cellar")).unwrap();
    engine.increment("temp", &room("cellar")).unwrap();

    assert_eq!(engine.value("temp", &room("cellar")).unwrap(), -3.5);
}

#[test]
fn metric_without_label_keys_uses_empty_label_set() {
    let engine = test_engine();

    engine.set("uptime", 120.0, &LabelSet::new()).unwrap();
    engine.add("uptime", 5.0, &LabelSet::new()).unwrap();

    assert_eq!(engine.value("uptime", &LabelSet::new()).unwrap(), 125.0);
    assert_eq!(engine.list_instances(), vec!["uptime".to_string()]);
}

// ---------------------------------------------------------------------------
// Lookup and labels
// ---------------------------------------------------------------------------

#[test]
fn unknown_metric_is_rejected_and_creates_nothing() {
    let engine = test_engine();

    let err = engine.increment("nope", &LabelSet::new()).unwrap_err();
    assert!(matches!(err, Error::UnknownMetric(ref name) if name == "nope"));
    assert!(err.is_recoverable());
    assert!(engine.list_instances().is_empty());
}

#[test]
fn undeclared_label_key_is_rejected() {
    let engine = test_engine();

    let labels = LabelSet::new().with("route", "/a").with("region", "eu");
    let err = engine.increment("reqs", &labels).unwrap_err();
    assert!(matches!(err, Error::InvalidLabel { ref label, .. } if label == "region"));
    assert!(engine.list_instances().is_empty());
}

#[test]
fn subset_of_label_keys_is_a_distinct_instance() {
    let engine = test_engine();

    engine
        .increment("http_requests", &LabelSet::from([("method", "GET")]))
        .unwrap();
    engine
        .increment(
            "http_requests",
            &LabelSet::from([("method", "GET"), ("status", "200")]),
        )
        .unwrap();

    assert_eq!(
        engine.list_instances(),
        vec![
            "http_requests{method=GET,status=200}".to_string(),
            "http_requests{method=GET}".to_string(),
        ]
    );
}

#[test]
fn label_order_does_not_matter() {
    let engine = test_engine();

    let a = LabelSet::from([("method", "GET"), ("status", "200")]);
    let b = LabelSet::from([("status", "200"), ("method", "GET")]);
    let c = LabelSet::from_flat(&["status", "200", "method", "GET"]).unwrap();

    engine.increment("http_requests", &a).unwrap();
    engine.increment("http_requests", &b).unwrap();
    engine.increment("http_requests", &c).unwrap();

    assert_eq!(engine.list_instances().len(), 1);
    assert_eq!(engine.value("http_requests", &a).unwrap(), 3.0);
}

#[test]
fn odd_flat_label_list_is_malformed() {
    let err = LabelSet::from_flat(&["route", "/a", "dangling"]).unwrap_err();
    assert!(matches!(err, Error::MalformedLabels(3)));
}

#[test]
fn delimiter_characters_in_values_keep_identifiers_distinct() {
    let mut engine = Engine::in_memory();
    engine
        .load_kpis(vec![RawKpi::new("reqs", "counter").labels(["a", "b"])])
        .unwrap();
    engine.register_metrics().unwrap();

    engine
        .increment("reqs", &LabelSet::from([("a", "x,b=y")]))
        .unwrap();
    engine
        .increment("reqs", &LabelSet::from([("a", "x"), ("b", "y")]))
        .unwrap();
    engine
        .increment("reqs", &LabelSet::from([("a", r"x\}")]))
        .unwrap();

    let ids = engine.list_instances();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&r"reqs{a=x\,b\=y}".to_string()), "{ids:?}");
    assert!(ids.contains(&"reqs{a=x,b=y}".to_string()), "{ids:?}");
    assert!(ids.contains(&r"reqs{a=x\\\}}".to_string()), "{ids:?}");
}

#[test]
fn empty_label_value_is_the_absent_label() {
    let mut engine = Engine::new(BackendKind::Prometheus, None).unwrap();
    engine
        .load_kpis(vec![RawKpi::new("reqs", "counter").labels(["route"])])
        .unwrap();
    engine.register_metrics().unwrap();

    engine.increment("reqs", &LabelSet::new()).unwrap();
    engine
        .increment("reqs", &LabelSet::new().with("route", ""))
        .unwrap();
    let from_json: LabelSet = serde_json::from_str(r#"{"route": ""}"#).unwrap();
    engine.increment("reqs", &from_json).unwrap();

    assert_eq!(engine.list_instances(), vec!["reqs".to_string()]);
    assert_eq!(engine.value("reqs", &LabelSet::new()).unwrap(), 3.0);

    let snapshot = engine.export().unwrap();
    let text = snapshot.as_text();
    assert!(text.contains(r#"reqs{route=""} 3"#), "{text}");
}

#[test]
fn empty_value_removes_an_earlier_pair() {
    let labels = LabelSet::new().with("route", "/a").with("route", "");
    assert!(labels.is_empty());
    assert_eq!(LabelSet::from_flat(&["route", ""]).unwrap(), LabelSet::new());
}

#[test]
fn metric_names_are_normalized_on_lookup() {
    let mut engine = Engine::in_memory();
    engine
        .load_kpis(vec![RawKpi::new("Active Sessions", "gauge")])
        .unwrap();
    engine.register_metrics().unwrap();

    engine.set("active-sessions", 7.0, &LabelSet::new()).unwrap();
    engine.increment("ACTIVE SESSIONS", &LabelSet::new()).unwrap();

    assert_eq!(engine.value("active_sessions", &LabelSet::new()).unwrap(), 8.0);
    assert_eq!(engine.list_metrics(), vec!["active_sessions".to_string()]);
}

#[test]
fn distinct_mutations_yield_one_identifier_each() {
    let engine = test_engine();

    for i in 0..25 {
        engine.increment("reqs", &route(&format!("/r{i}"))).unwrap();
    }
    for i in 0..10 {
        engine.set("temp", i as f64, &room(&format!("room{i}"))).unwrap();
    }

    let ids = engine.list_instances();
    assert_eq!(ids.len(), 35);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids are sorted and unique");
}

#[test]
fn value_of_untouched_instance_is_zero_and_not_created() {
    let engine = test_engine();

    assert_eq!(engine.value("reqs", &route("/never")).unwrap(), 0.0);
    assert!(engine.list_instances().is_empty());
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

#[test]
fn mutations_before_registration_are_unknown_metric() {
    let mut engine = Engine::in_memory();
    engine.load_kpis(vec![RawKpi::new("reqs", "counter")]).unwrap();

    assert!(matches!(
        engine.increment("reqs", &LabelSet::new()),
        Err(Error::UnknownMetric(_))
    ));
}

#[test]
fn register_without_catalog_is_config_error() {
    let mut engine = Engine::in_memory();
    assert!(matches!(engine.register_metrics(), Err(Error::Config(_))));
}

#[test]
fn second_registration_is_rejected() {
    let mut engine = test_engine();

    assert!(matches!(engine.register_metrics(), Err(Error::AlreadyRegistered)));
    assert!(matches!(
        engine.load_kpis(vec![RawKpi::new("other", "gauge")]),
        Err(Error::AlreadyRegistered)
    ));
    assert_eq!(engine.list_metrics().len(), 4);
}

#[test]
fn unsupported_backend_name_is_rejected() {
    let err = "datadog".parse::<kpi_metrics::backend::BackendKind>().unwrap_err();
    assert!(matches!(err, Error::BackendNotSupported(ref name) if name == "datadog"));
}

// ---------------------------------------------------------------------------
// Introspection and defaults
// ---------------------------------------------------------------------------

#[test]
fn describe_reports_kind_labels_and_instance_count() {
    let engine = test_engine();
    engine.increment("reqs", &route("/a")).unwrap();
    engine.increment("reqs", &route("/b")).unwrap();

    let described = engine.describe();
    assert_eq!(described.len(), 4);

    let reqs = &described[0];
    assert_eq!(reqs.name, "reqs");
    assert_eq!(reqs.kind, KpiKind::Counter);
    assert_eq!(reqs.help, "Requests served");
    assert_eq!(reqs.label_keys, vec!["route".to_string()]);
    assert_eq!(reqs.instances, 2);
}

#[test]
fn initialize_defaults_touches_every_metric_without_resetting() {
    let engine = test_engine();
    engine
        .set("temp", 21.0, &room("default_room"))
        .unwrap();

    engine.initialize_defaults().unwrap();

    assert_eq!(
        engine.list_instances(),
        vec![
            "http_requests{method=default_method,status=default_status}".to_string(),
            "reqs{route=default_route}".to_string(),
            "temp{room=default_room}".to_string(),
            "uptime".to_string(),
        ]
    );
    assert_eq!(engine.value("temp", &room("default_room")).unwrap(), 21.0);
    assert_eq!(engine.value("reqs", &route("default_route")).unwrap(), 0.0);
}

#[test]
fn memory_export_contains_observed_series() {
    let engine = test_engine();
    engine.add("reqs", 2.0, &route("/a")).unwrap();

    let snapshot = engine.export().unwrap();
    assert_eq!(snapshot.content_type, "application/json");

    let doc: serde_json::Value = serde_json::from_slice(&snapshot.body).unwrap();
    let reqs = doc["metrics"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["name"] == "reqs")
        .unwrap();
    assert_eq!(reqs["kind"], "counter");
    assert_eq!(reqs["samples"][0]["labels"]["route"], "/a");
    assert_eq!(reqs["samples"][0]["value"], 2.0);
}
