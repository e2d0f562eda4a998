//! # kpi-metrics
//!
//! Declarative KPI metrics registry.
//!
//! A validated catalog declares each KPI (name, kind, label keys). The
//! engine registers every KPI with a pluggable backend (Prometheus or
//! in-process), enforces per-kind mutation policy, lazily creates one
//! instance per label set, and pushes snapshots to a remote gateway.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod instance;
pub mod model;
pub mod push;
pub mod registry;
pub mod service;
pub mod telemetry;

pub use engine::Engine;
pub use error::{Error, Result};
