//! In-process driver with no external system behind it.
//!
//! Keeps one value per series and exports the whole state as a JSON
//! document. Useful for tests and for collectors that accept JSON.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Backend, BackendKind, MetricHandle, Snapshot};
use crate::error::{Error, Result};
use crate::model::{KpiDescriptor, KpiKind, LabelSet, Mutation};

struct Family {
    kpi: KpiDescriptor,
    /// One lock per series; the map lock is only held to find or add one.
    series: RwLock<BTreeMap<LabelSet, Arc<Mutex<f64>>>>,
}

impl Family {
    fn series(&self, labels: &LabelSet) -> Arc<Mutex<f64>> {
        if let Some(value) = self.series.read().get(labels) {
            return Arc::clone(value);
        }
        let mut series = self.series.write();
        Arc::clone(
            series
                .entry(labels.clone())
                .or_insert_with(|| Arc::new(Mutex::new(0.0))),
        )
    }
}

pub struct MemoryBackend {
    namespace: Option<String>,
    families: RwLock<Vec<Option<Arc<Family>>>>,
}

/// JSON document produced by [`MemoryBackend::export`].
#[derive(Debug, Serialize)]
pub struct MemorySnapshot {
    pub exported_at: DateTime<Utc>,
    pub metrics: Vec<MetricSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: KpiKind,
    pub help: String,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Serialize)]
pub struct Sample {
    pub labels: LabelSet,
    pub value: f64,
}

impl MemoryBackend {
    pub fn new(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            families: RwLock::new(Vec::new()),
        }
    }

    fn family(&self, handle: MetricHandle) -> Result<Arc<Family>> {
        self.families
            .read()
            .get(handle.0)
            .and_then(Option::clone)
            .ok_or_else(|| Error::Backend(format!("unknown metric handle {}", handle.0)))
    }

    fn exported_name(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}_{name}"),
            None => name.to_string(),
        }
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn register(&self, kpi: &KpiDescriptor) -> Result<MetricHandle> {
        let mut families = self.families.write();
        if families.iter().flatten().any(|f| f.kpi.name == kpi.name) {
            return Err(Error::Registration {
                name: kpi.name.clone(),
                reason: "a metric with this name is already registered".to_string(),
            });
        }
        families.push(Some(Arc::new(Family {
            kpi: kpi.clone(),
            series: RwLock::new(BTreeMap::new()),
        })));
        Ok(MetricHandle(families.len() - 1))
    }

    fn unregister(&self, handle: MetricHandle) -> Result<()> {
        self.families
            .write()
            .get_mut(handle.0)
            .and_then(Option::take)
            .map(|_| ())
            .ok_or_else(|| Error::Backend(format!("unknown metric handle {}", handle.0)))
    }

    fn observe(&self, handle: MetricHandle, labels: &LabelSet, mutation: Mutation) -> Result<()> {
        let family = self.family(handle)?;
        if family.kpi.policy().check(mutation).is_err() {
            return Err(Error::Backend(format!(
                "{} {} cannot apply {mutation:?}",
                family.kpi.kind, family.kpi.name
            )));
        }
        let series = family.series(labels);
        let mut value = series.lock();
        *value = mutation.apply(*value);
        Ok(())
    }

    fn export(&self) -> Result<Snapshot> {
        let families: Vec<Arc<Family>> = self.families.read().iter().flatten().cloned().collect();
        let metrics = families
            .iter()
            .map(|family| MetricSnapshot {
                name: self.exported_name(&family.kpi.name),
                kind: family.kpi.kind,
                help: family.kpi.help.clone(),
                samples: family
                    .series
                    .read()
                    .iter()
                    .map(|(labels, value)| Sample {
                        labels: labels.clone(),
                        value: *value.lock(),
                    })
                    .collect(),
            })
            .collect();

        let body = serde_json::to_vec(&MemorySnapshot {
            exported_at: Utc::now(),
            metrics,
        })?;
        Ok(Snapshot {
            content_type: "application/json".to_string(),
            body,
        })
    }
}
