//! KPI catalog: loading and validation.
//!
//! A catalog is the immutable, validated list of KPIs a process may use.
//! Loading is all-or-nothing: one malformed record rejects the whole file.

use crate::error::{Error, Result, ValidationError};
use crate::model::{KpiDescriptor, KpiKind, RawKpi};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Validated KPI definitions, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    kpis: Vec<KpiDescriptor>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Validate raw KPI records into a catalog.
    ///
    /// Names are normalized with [`normalize_metric_name`] before the
    /// uniqueness check, so `"Active Sessions"` and `"active-sessions"`
    /// collide.
    pub fn load(raw: Vec<RawKpi>) -> std::result::Result<Self, ValidationError> {
        let mut kpis = Vec::with_capacity(raw.len());
        let mut index = HashMap::with_capacity(raw.len());

        for (i, record) in raw.into_iter().enumerate() {
            let source_name = record
                .name
                .as_deref()
                .or(record.display_name.as_deref())
                .unwrap_or_default();
            let name = normalize_metric_name(source_name);
            if name.is_empty() {
                return Err(ValidationError::InvalidDefinition {
                    index: i,
                    reason: "name is empty".to_string(),
                });
            }

            let kind: KpiKind = record.kind.parse().map_err(|_| ValidationError::UnknownKind {
                name: name.clone(),
                kind: record.kind.clone(),
            })?;

            let mut label_keys = BTreeSet::new();
            for key in record.labels {
                if key.trim().is_empty() {
                    return Err(ValidationError::InvalidDefinition {
                        index: i,
                        reason: format!("KPI {name} has an empty label key"),
                    });
                }
                label_keys.insert(key);
            }

            if index.contains_key(&name) {
                return Err(ValidationError::DuplicateKpi(name));
            }
            index.insert(name.clone(), kpis.len());
            kpis.push(KpiDescriptor {
                name,
                kind,
                help: record.help,
                label_keys,
            });
        }

        Ok(Self { kpis, index })
    }

    /// Parse a JSON array of KPI records and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<RawKpi> = serde_json::from_str(json)?;
        Ok(Self::load(raw)?)
    }

    /// Read and validate a catalog file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read KPI catalog {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Look up a KPI by its normalized name.
    pub fn get(&self, name: &str) -> Option<&KpiDescriptor> {
        self.index.get(name).map(|&i| &self.kpis[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &KpiDescriptor> {
        self.kpis.iter()
    }

    pub fn len(&self) -> usize {
        self.kpis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kpis.is_empty()
    }
}

/// Turn a human-facing KPI name into a metric name.
///
/// Lowercases, maps spaces and dashes to underscores, drops parentheses and
/// prefixes a leading digit with `g`.
pub fn normalize_metric_name(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .filter(|c| !matches!(c, '(' | ')'))
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'g');
    }
    out
}
