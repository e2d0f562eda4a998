//! Metric registry: KPI name -> descriptor, backend handle, instances.
//!
//! Built once from a catalog. Registration is fail-fast in catalog order and
//! rolls back the backend on failure, so either every KPI is registered or
//! none is.

use std::collections::HashMap;
use tracing::{info, warn};

use crate::backend::{Backend, MetricHandle};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::instance::InstanceSpace;
use crate::model::KpiDescriptor;

/// One registered metric. The descriptor and handle never change; the
/// instance space only grows.
#[derive(Debug)]
pub struct RegistryEntry {
    pub descriptor: KpiDescriptor,
    pub handle: MetricHandle,
    pub instances: InstanceSpace,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, RegistryEntry>,
    /// Registration (catalog) order.
    order: Vec<String>,
}

impl Registry {
    /// Register every catalog KPI with `backend`.
    pub fn register_all(catalog: &Catalog, backend: &dyn Backend) -> Result<Self> {
        let mut registry = Registry::default();

        for kpi in catalog.iter() {
            match backend.register(kpi) {
                Ok(handle) => {
                    registry.order.push(kpi.name.clone());
                    registry.entries.insert(
                        kpi.name.clone(),
                        RegistryEntry {
                            descriptor: kpi.clone(),
                            handle,
                            instances: InstanceSpace::new(),
                        },
                    );
                }
                Err(e) => {
                    warn!(metric = %kpi.name, error = %e, "registration failed, rolling back");
                    registry.rollback(backend);
                    return Err(e);
                }
            }
        }

        info!(
            metrics = registry.len(),
            backend = %backend.kind(),
            "registered KPI catalog"
        );
        Ok(registry)
    }

    fn rollback(self, backend: &dyn Backend) {
        for name in self.order.iter().rev() {
            if let Some(entry) = self.entries.get(name) {
                if let Err(e) = backend.unregister(entry.handle) {
                    warn!(metric = %name, error = %e, "rollback could not unregister metric");
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
