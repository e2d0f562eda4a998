//! Instance key space: the live series of one metric.
//!
//! Instances are created on first use of a label combination and never
//! removed. Creation takes the metric's write lock and re-checks, so racing
//! first uses agree on a single instance. Each instance then has its own
//! lock; two series of the same metric never contend on updates.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{InstanceKey, LabelSet, Mutation};

/// Current value of one (metric, label set) pair.
#[derive(Debug)]
pub struct Instance {
    labels: LabelSet,
    value: Mutex<f64>,
}

impl Instance {
    fn new(labels: LabelSet) -> Self {
        Self {
            labels,
            value: Mutex::new(0.0),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    /// Apply `mutation` while holding this instance's lock.
    ///
    /// `forward` runs under the same lock, before the local value changes.
    /// If it fails the local value is left as it was, so the instance and
    /// the backend apply updates in the same order.
    pub fn apply<F>(&self, mutation: Mutation, forward: F) -> Result<f64>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut value = self.value.lock();
        forward()?;
        *value = mutation.apply(*value);
        Ok(*value)
    }
}

/// All instances of one metric, keyed by canonical label set.
#[derive(Debug, Default)]
pub struct InstanceSpace {
    instances: RwLock<BTreeMap<InstanceKey, Arc<Instance>>>,
}

impl InstanceSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &InstanceKey) -> Option<Arc<Instance>> {
        self.instances.read().get(key).cloned()
    }

    /// Look up an instance, creating it at zero if absent.
    ///
    /// The second element is `true` when this call created the instance.
    pub fn get_or_create(&self, key: &InstanceKey) -> (Arc<Instance>, bool) {
        if let Some(instance) = self.get(key) {
            return (instance, false);
        }
        let mut instances = self.instances.write();
        if let Some(instance) = instances.get(key) {
            return (Arc::clone(instance), false);
        }
        let instance = Arc::new(Instance::new(key.clone()));
        instances.insert(key.clone(), Arc::clone(&instance));
        (instance, true)
    }

    /// Label sets of every instance, in canonical order.
    pub fn keys(&self) -> Vec<InstanceKey> {
        self.instances.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}
