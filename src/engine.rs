//! Core engine. The public API for declaring, mutating and exporting KPIs.
//!
//! Setup (backend choice, catalog load, registration) takes `&mut self` and
//! happens once on one thread. After that the engine is shared behind an
//! `Arc` and every mutation, enumeration and push takes `&self`.

use opentelemetry::KeyValue;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{Instrument, debug, info, warn};

use crate::backend::{self, Backend, BackendKind, MemoryBackend, Snapshot};
use crate::catalog::{Catalog, normalize_metric_name};
use crate::error::{Error, Result};
use crate::model::*;
use crate::push::PushClient;
use crate::registry::{Registry, RegistryEntry};
use crate::telemetry;

/// The metrics engine. Owns the backend, the catalog and the registry.
pub struct Engine {
    backend: Box<dyn Backend>,
    catalog: Option<Catalog>,
    registry: Option<Registry>,
    pusher: PushClient,
}

/// Introspection view of one registered metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricDescription {
    pub name: String,
    pub kind: KpiKind,
    pub help: String,
    pub label_keys: Vec<String>,
    pub instances: usize,
}

impl Engine {
    /// Create an engine with the named backend. A namespace prefixes every
    /// exported metric name.
    pub fn new(kind: BackendKind, namespace: Option<&str>) -> Result<Self> {
        let backend = backend::create(kind, namespace)?;
        info!(backend = %kind, namespace = namespace.unwrap_or("-"), "metrics engine initialized");
        Ok(Self::with_backend(backend))
    }

    /// Create an engine on the in-process backend (for testing).
    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::new(None)))
    }

    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            catalog: None,
            registry: None,
            pusher: PushClient::default(),
        }
    }

    /// Replace the push transport (timeout, credentials).
    pub fn with_push_client(mut self, pusher: PushClient) -> Self {
        self.pusher = pusher;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Read and validate a catalog file.
    pub fn load_catalog(&mut self, path: &Path) -> Result<()> {
        let catalog = Catalog::from_path(path)?;
        self.set_catalog(catalog)
    }

    /// Validate raw KPI records handed over by a config loader.
    pub fn load_kpis(&mut self, raw: Vec<RawKpi>) -> Result<()> {
        let catalog = Catalog::load(raw)?;
        self.set_catalog(catalog)
    }

    /// Install a validated catalog. Replaces a previously loaded one; fails
    /// once metrics are registered.
    pub fn set_catalog(&mut self, catalog: Catalog) -> Result<()> {
        if self.registry.is_some() {
            return Err(Error::AlreadyRegistered);
        }
        info!(kpis = catalog.len(), "KPI catalog loaded");
        self.catalog = Some(catalog);
        Ok(())
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Register every catalog KPI with the backend.
    ///
    /// Fails with [`Error::AlreadyRegistered`] on a second call. On any
    /// backend failure nothing stays registered.
    pub fn register_metrics(&mut self) -> Result<()> {
        if self.registry.is_some() {
            return Err(Error::AlreadyRegistered);
        }
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| Error::Config("no KPI catalog loaded".to_string()))?;
        self.registry = Some(Registry::register_all(catalog, self.backend.as_ref())?);
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.registry.is_some()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn increment(&self, name: &str, labels: &LabelSet) -> Result<()> {
        self.mutate(name, labels, Mutation::Increment).map(|_| ())
    }

    /// Gauges only.
    pub fn decrement(&self, name: &str, labels: &LabelSet) -> Result<()> {
        self.mutate(name, labels, Mutation::Decrement).map(|_| ())
    }

    /// Counters accept only non-negative values.
    pub fn add(&self, name: &str, value: f64, labels: &LabelSet) -> Result<()> {
        self.mutate(name, labels, Mutation::Add(value)).map(|_| ())
    }

    /// Gauges only.
    pub fn set(&self, name: &str, value: f64, labels: &LabelSet) -> Result<()> {
        self.mutate(name, labels, Mutation::Set(value)).map(|_| ())
    }

    /// Resolve, check and apply one mutation. Returns the instance's new value.
    ///
    /// Every check runs before the instance is touched: a failed call
    /// changes nothing and creates nothing.
    pub fn mutate(&self, name: &str, labels: &LabelSet, mutation: Mutation) -> Result<f64> {
        let entry = self.resolve(name, labels)?;
        let kpi = &entry.descriptor;

        if let Err(violation) = kpi.policy().check(mutation) {
            let operation = mutation.operation();
            let (err, reason) = match violation {
                Violation::NotAllowed => (
                    Error::OperationNotAllowed {
                        metric: kpi.name.clone(),
                        kind: kpi.kind,
                        operation,
                    },
                    "not_allowed",
                ),
                Violation::InvalidValue => (
                    Error::InvalidValue {
                        metric: kpi.name.clone(),
                        operation,
                        value: mutation.operand().unwrap_or_default(),
                    },
                    "invalid_value",
                ),
            };
            warn!(metric = %kpi.name, %operation, error = %err, "mutation rejected");
            telemetry::metrics::record_rejection(&kpi.name, &operation.to_string(), reason);
            return Err(err);
        }

        let (instance, created) = entry.instances.get_or_create(labels);
        if created {
            debug!(instance = %instance_id(&kpi.name, labels), "created metric instance");
            telemetry::metrics::instances_created()
                .add(1, &[KeyValue::new("metric", kpi.name.clone())]);
        }
        instance.apply(mutation, || self.backend.observe(entry.handle, labels, mutation))
    }

    /// Look up a registered metric and check the label keys against it.
    fn resolve(&self, name: &str, labels: &LabelSet) -> Result<&RegistryEntry> {
        let name = normalize_metric_name(name);
        let entry = self
            .registry
            .as_ref()
            .and_then(|registry| registry.get(&name))
            .ok_or_else(|| Error::UnknownMetric(name.clone()))?;

        if let Some(label) = labels.keys().find(|key| !entry.descriptor.allows_label(key)) {
            return Err(Error::InvalidLabel {
                metric: entry.descriptor.name.clone(),
                label: label.to_string(),
            });
        }
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current value of an instance. Instances that were never mutated read
    /// as zero and are not created by this call.
    pub fn value(&self, name: &str, labels: &LabelSet) -> Result<f64> {
        let entry = self.resolve(name, labels)?;
        Ok(entry
            .instances
            .get(labels)
            .map_or(0.0, |instance| instance.value()))
    }

    /// Identifiers of every populated instance, sorted.
    pub fn list_instances(&self) -> Vec<String> {
        let Some(registry) = &self.registry else {
            return Vec::new();
        };
        let mut ids: Vec<String> = registry
            .iter()
            .flat_map(|entry| {
                entry
                    .instances
                    .keys()
                    .into_iter()
                    .map(move |labels| instance_id(&entry.descriptor.name, &labels))
            })
            .collect();
        ids.sort();
        ids
    }

    /// Names of every registered metric, sorted.
    pub fn list_metrics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .iter()
            .flat_map(|registry| registry.iter())
            .map(|entry| entry.descriptor.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Registered metrics in catalog order, with their instance counts.
    pub fn describe(&self) -> Vec<MetricDescription> {
        self.registry
            .iter()
            .flat_map(|registry| registry.iter())
            .map(|entry| MetricDescription {
                name: entry.descriptor.name.clone(),
                kind: entry.descriptor.kind,
                help: entry.descriptor.help.clone(),
                label_keys: entry.descriptor.label_keys.iter().cloned().collect(),
                instances: entry.instances.len(),
            })
            .collect()
    }

    /// Serialize the backend's current state.
    pub fn export(&self) -> Result<Snapshot> {
        self.backend.export()
    }

    /// Touch every registered metric once with `default_<key>` label values,
    /// so each KPI has at least one series before the first push.
    ///
    /// Uses `add(0)`, which leaves existing values alone.
    pub fn initialize_defaults(&self) -> Result<()> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        for entry in registry.iter() {
            let labels: LabelSet = entry
                .descriptor
                .label_keys
                .iter()
                .map(|key| (key.clone(), format!("default_{key}")))
                .collect();
            self.mutate(&entry.descriptor.name, &labels, Mutation::Add(0.0))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Export the backend state and send it to `endpoint` under `job`.
    ///
    /// Local state is never modified. No engine lock is held while the
    /// request is in flight.
    pub async fn push(&self, endpoint: &str, job: &str) -> Result<()> {
        let span = telemetry::spans::start_push_span(endpoint, job);
        let started = Instant::now();

        let snapshot = self.backend.export().map_err(|e| Error::Push {
            endpoint: endpoint.to_string(),
            reason: format!("export failed: {e}"),
        })?;
        let result = self
            .pusher
            .send(&snapshot, endpoint, job)
            .instrument(span.clone())
            .await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        telemetry::spans::record_push_outcome(&span, snapshot.body.len(), result.is_ok());
        telemetry::metrics::record_push(job, result.is_ok(), elapsed_ms);
        span.in_scope(|| match &result {
            Ok(()) => info!(bytes = snapshot.body.len(), elapsed_ms, "pushed metrics snapshot"),
            Err(e) => warn!(error = %e, "push failed"),
        });
        result
    }

    /// [`initialize_defaults`](Self::initialize_defaults), then [`push`](Self::push).
    pub async fn push_with_defaults(&self, endpoint: &str, job: &str) -> Result<()> {
        self.initialize_defaults()?;
        self.push(endpoint, job).await
    }
}
