//! Prometheus driver built on the `prometheus` crate.
//!
//! Each KPI becomes a `CounterVec` or `GaugeVec` labelled with every allowed
//! key. Series observed with a subset of the keys get the empty value for
//! the missing ones, which Prometheus treats as an absent label.

use parking_lot::RwLock;
use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use tracing::debug;

use super::{Backend, BackendKind, MetricHandle, Snapshot};
use crate::error::{Error, Result};
use crate::model::{KpiDescriptor, KpiKind, LabelSet, Mutation};

#[derive(Clone)]
enum Family {
    Counter(CounterVec),
    Gauge(GaugeVec),
}

impl Family {
    fn collector(&self) -> Box<dyn Collector> {
        match self {
            Family::Counter(vec) => Box::new(vec.clone()),
            Family::Gauge(vec) => Box::new(vec.clone()),
        }
    }
}

struct Registered {
    name: String,
    label_keys: Vec<String>,
    family: Family,
}

pub struct PrometheusBackend {
    registry: Registry,
    /// Indexed by `MetricHandle`; unregistered slots become `None`.
    families: RwLock<Vec<Option<Registered>>>,
}

impl PrometheusBackend {
    /// Create a driver with its own registry. A namespace prefixes every
    /// exported metric name (`<namespace>_<name>`).
    pub fn new(namespace: Option<&str>) -> Result<Self> {
        let registry = match namespace {
            Some(ns) => Registry::new_custom(Some(ns.to_string()), None)
                .map_err(|e| Error::Config(format!("invalid metrics namespace {ns:?}: {e}")))?,
            None => Registry::new(),
        };
        Ok(Self {
            registry,
            families: RwLock::new(Vec::new()),
        })
    }
}

impl Backend for PrometheusBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Prometheus
    }

    fn register(&self, kpi: &KpiDescriptor) -> Result<MetricHandle> {
        let registration_error = |e: prometheus::Error| Error::Registration {
            name: kpi.name.clone(),
            reason: e.to_string(),
        };

        // Prometheus refuses an empty help string.
        let help = if kpi.help.trim().is_empty() {
            kpi.name.as_str()
        } else {
            kpi.help.as_str()
        };
        let opts = Opts::new(kpi.name.as_str(), help);
        let label_keys: Vec<String> = kpi.label_keys.iter().cloned().collect();
        let label_refs: Vec<&str> = label_keys.iter().map(String::as_str).collect();

        let family = match kpi.kind {
            KpiKind::Counter => {
                Family::Counter(CounterVec::new(opts, &label_refs).map_err(registration_error)?)
            }
            KpiKind::Gauge => {
                Family::Gauge(GaugeVec::new(opts, &label_refs).map_err(registration_error)?)
            }
        };
        self.registry
            .register(family.collector())
            .map_err(registration_error)?;

        let mut families = self.families.write();
        families.push(Some(Registered {
            name: kpi.name.clone(),
            label_keys,
            family,
        }));
        debug!(metric = %kpi.name, kind = %kpi.kind, "registered with prometheus");
        Ok(MetricHandle(families.len() - 1))
    }

    fn unregister(&self, handle: MetricHandle) -> Result<()> {
        let registered = self
            .families
            .write()
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or_else(|| Error::Backend(format!("unknown metric handle {}", handle.0)))?;
        self.registry
            .unregister(registered.family.collector())
            .map_err(|e| Error::Backend(format!("unregister {}: {e}", registered.name)))
    }

    fn observe(&self, handle: MetricHandle, labels: &LabelSet, mutation: Mutation) -> Result<()> {
        let families = self.families.read();
        let registered = families
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Backend(format!("unknown metric handle {}", handle.0)))?;

        let values: HashMap<&str, &str> = registered
            .label_keys
            .iter()
            .map(|key| (key.as_str(), labels.get(key).unwrap_or("")))
            .collect();
        let series_error = |e: prometheus::Error| {
            Error::Backend(format!("series {}{{{labels}}}: {e}", registered.name))
        };

        match &registered.family {
            Family::Counter(vec) => {
                let counter = vec.get_metric_with(&values).map_err(series_error)?;
                match mutation {
                    Mutation::Increment => counter.inc(),
                    Mutation::Add(v) if v >= 0.0 => counter.inc_by(v),
                    other => {
                        return Err(Error::Backend(format!(
                            "counter {} cannot apply {other:?}",
                            registered.name
                        )));
                    }
                }
            }
            Family::Gauge(vec) => {
                let gauge = vec.get_metric_with(&values).map_err(series_error)?;
                match mutation {
                    Mutation::Increment => gauge.inc(),
                    Mutation::Decrement => gauge.dec(),
                    Mutation::Add(v) => gauge.add(v),
                    Mutation::Set(v) => gauge.set(v),
                }
            }
        }
        Ok(())
    }

    fn export(&self) -> Result<Snapshot> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut body = Vec::new();
        encoder
            .encode(&metric_families, &mut body)
            .map_err(|e| Error::Backend(format!("prometheus text encoding failed: {e}")))?;
        Ok(Snapshot {
            content_type: encoder.format_type().to_string(),
            body,
        })
    }
}
