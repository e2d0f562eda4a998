//! Backend drivers: where metric values actually live and how they export.
//!
//! The engine only talks to the [`Backend`] trait. A driver registers KPI
//! descriptors, receives every legal mutation and renders a snapshot of its
//! state for the push client.

pub mod memory;
pub mod prometheus;

use crate::error::{Error, Result};
use crate::model::{KpiDescriptor, LabelSet, Mutation};
use std::fmt;
use std::str::FromStr;

pub use self::memory::MemoryBackend;
pub use self::prometheus::PrometheusBackend;

/// Which driver to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Prometheus,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Prometheus => write!(f, "prometheus"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prometheus" => Ok(BackendKind::Prometheus),
            "memory" => Ok(BackendKind::Memory),
            other => Err(Error::BackendNotSupported(other.to_string())),
        }
    }
}

/// Opaque reference to a metric registered with a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricHandle(pub(crate) usize);

/// Serialized backend state, ready to be shipped to a gateway.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Snapshot {
    /// Body as UTF-8 text. Both built-in drivers export text formats.
    pub fn as_text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }
}

/// Capability set every metrics backend provides.
///
/// Implementations must be safe to call from many threads at once; the
/// engine serializes mutations per instance but not across instances.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Register a KPI. Fails if the backend rejects the name, the label
    /// keys, or already holds a metric of that name.
    fn register(&self, kpi: &KpiDescriptor) -> Result<MetricHandle>;

    /// Remove a previously registered metric and all of its series.
    fn unregister(&self, handle: MetricHandle) -> Result<()>;

    /// Apply an already-validated mutation to one series.
    fn observe(&self, handle: MetricHandle, labels: &LabelSet, mutation: Mutation) -> Result<()>;

    /// Serialize every registered metric and its series.
    fn export(&self) -> Result<Snapshot>;
}

/// Construct the driver for `kind`. An empty namespace means none.
pub fn create(kind: BackendKind, namespace: Option<&str>) -> Result<Box<dyn Backend>> {
    let namespace = namespace.map(str::trim).filter(|ns| !ns.is_empty());
    match kind {
        BackendKind::Prometheus => Ok(Box::new(PrometheusBackend::new(namespace)?)),
        BackendKind::Memory => Ok(Box::new(MemoryBackend::new(namespace))),
    }
}
