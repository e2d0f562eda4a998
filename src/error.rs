//! Error types for kpi-metrics.

use thiserror::Error;

use crate::model::{KpiKind, Operation};

/// Catalog validation failures. Any of these rejects the whole catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate KPI name: {0}")]
    DuplicateKpi(String),

    #[error("unknown metric kind {kind:?} for KPI {name}")]
    UnknownKind { name: String, kind: String },

    #[error("invalid KPI definition at index {index}: {reason}")]
    InvalidDefinition { index: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("catalog validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to register metric {name}: {reason}")]
    Registration { name: String, reason: String },

    #[error("metrics already registered")]
    AlreadyRegistered,

    #[error("metric not found: {0}")]
    UnknownMetric(String),

    #[error("invalid label {label:?} for metric {metric}")]
    InvalidLabel { metric: String, label: String },

    #[error("malformed label list: expected key/value pairs, got {0} tokens")]
    MalformedLabels(usize),

    #[error("{operation} not allowed on {kind} metric {metric}")]
    OperationNotAllowed {
        metric: String,
        kind: KpiKind,
        operation: Operation,
    },

    #[error("invalid value {value} for {operation} on metric {metric}")]
    InvalidValue {
        metric: String,
        operation: Operation,
        value: f64,
    },

    #[error("push to {endpoint} failed: {reason}")]
    Push { endpoint: String, reason: String },

    #[error("backend not supported: {0}")]
    BackendNotSupported(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Per-call failures that leave the engine usable.
    ///
    /// Catalog, registration and configuration errors are fatal to startup
    /// and return `false`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownMetric(_)
                | Error::InvalidLabel { .. }
                | Error::MalformedLabels(_)
                | Error::OperationNotAllowed { .. }
                | Error::InvalidValue { .. }
                | Error::Push { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
