//! Core data model.
//!
//! A KPI is a declared metric: name, kind, help text and the label keys it
//! may be observed under. Label sets are canonical (key-sorted) so the same
//! key/value pairs always resolve to the same metric instance.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Write as _};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// What kind of metric a KPI is. Determines which mutations are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiKind {
    /// Monotonic. Only increment and non-negative add.
    Counter,
    /// Arbitrary real value. Every mutation is legal.
    Gauge,
}

impl KpiKind {
    pub fn policy(self) -> MutationPolicy {
        match self {
            KpiKind::Counter => MutationPolicy {
                decrement: false,
                set: false,
                negative_add: false,
            },
            KpiKind::Gauge => MutationPolicy {
                decrement: true,
                set: true,
                negative_add: true,
            },
        }
    }
}

impl fmt::Display for KpiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KpiKind::Counter => write!(f, "counter"),
            KpiKind::Gauge => write!(f, "gauge"),
        }
    }
}

impl FromStr for KpiKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "counter" => Ok(KpiKind::Counter),
            "gauge" => Ok(KpiKind::Gauge),
            other => Err(format!("unknown metric kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// The four public mutation operations, without their operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Increment,
    Decrement,
    Add,
    Set,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Increment => "increment",
            Operation::Decrement => "decrement",
            Operation::Add => "add",
            Operation::Set => "set",
        };
        write!(f, "{s}")
    }
}

/// A requested change to a metric instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mutation {
    Increment,
    Decrement,
    Add(f64),
    Set(f64),
}

impl Mutation {
    pub fn operation(self) -> Operation {
        match self {
            Mutation::Increment => Operation::Increment,
            Mutation::Decrement => Operation::Decrement,
            Mutation::Add(_) => Operation::Add,
            Mutation::Set(_) => Operation::Set,
        }
    }

    /// The caller-supplied operand, if the operation takes one.
    pub fn operand(self) -> Option<f64> {
        match self {
            Mutation::Add(v) | Mutation::Set(v) => Some(v),
            Mutation::Increment | Mutation::Decrement => None,
        }
    }

    /// Value of an instance after applying this mutation to `current`.
    pub fn apply(self, current: f64) -> f64 {
        match self {
            Mutation::Increment => current + 1.0,
            Mutation::Decrement => current - 1.0,
            Mutation::Add(v) => current + v,
            Mutation::Set(v) => v,
        }
    }
}

/// Which mutations a KPI kind accepts. Increment is always legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationPolicy {
    pub decrement: bool,
    pub set: bool,
    pub negative_add: bool,
}

/// Why a mutation was refused by a [`MutationPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// The operation is never legal for this kind.
    NotAllowed,
    /// The operation is legal but the operand is not.
    InvalidValue,
}

impl MutationPolicy {
    pub fn check(&self, mutation: Mutation) -> Result<(), Violation> {
        match mutation {
            Mutation::Decrement if !self.decrement => Err(Violation::NotAllowed),
            Mutation::Set(_) if !self.set => Err(Violation::NotAllowed),
            Mutation::Add(v) | Mutation::Set(v) if !v.is_finite() => Err(Violation::InvalidValue),
            Mutation::Add(v) if v < 0.0 && !self.negative_add => Err(Violation::InvalidValue),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// KPI definitions
// ---------------------------------------------------------------------------

/// A KPI record as it appears in a catalog file, before validation.
///
/// Field aliases accept the older catalog layout (`displayName`,
/// `description`, `prometheus_type`, `object`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawKpi {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,

    #[serde(default, alias = "prometheus_type")]
    pub kind: String,

    #[serde(default, alias = "description")]
    pub help: String,

    #[serde(default, alias = "object")]
    pub labels: Vec<String>,
}

impl RawKpi {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

/// A validated KPI. Immutable once the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiDescriptor {
    pub name: String,
    pub kind: KpiKind,
    pub help: String,
    pub label_keys: BTreeSet<String>,
}

impl KpiDescriptor {
    pub fn policy(&self) -> MutationPolicy {
        self.kind.policy()
    }

    pub fn allows_label(&self, key: &str) -> bool {
        self.label_keys.contains(key)
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Canonical label set. Keys are kept sorted, so two sets with the same
/// pairs compare, hash and render identically whatever the insertion order.
///
/// An empty value is the same as an absent label: such pairs are dropped on
/// construction, matching how exporters treat empty label values.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct LabelSet(BTreeMap<String, String>);

/// Lookup key of a metric instance within its metric.
pub type InstanceKey = LabelSet;

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. A repeated key keeps the last value; an empty
    /// value removes the key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key.into(), value.into());
        self
    }

    fn insert(&mut self, key: String, value: String) {
        if value.is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    /// Build from a flat `[k1, v1, k2, v2, ...]` token list.
    pub fn from_flat<S: AsRef<str>>(tokens: &[S]) -> crate::error::Result<Self> {
        if tokens.len() % 2 != 0 {
            return Err(crate::error::Error::MalformedLabels(tokens.len()));
        }
        Ok(tokens
            .chunks_exact(2)
            .map(|pair| (pair[0].as_ref(), pair[1].as_ref()))
            .collect())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut labels = Self::new();
        for (k, v) in iter {
            labels.insert(k.into(), v.into());
        }
        labels
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for LabelSet {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl From<HashMap<String, String>> for LabelSet {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<LabelSet> for BTreeMap<String, String> {
    fn from(labels: LabelSet) -> Self {
        labels.0
    }
}

/// Renders `k1=v1,k2=v2`. Backslash, comma, equals sign and braces inside
/// keys or values are backslash-escaped, so distinct sets never render the
/// same.
impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write_escaped(f, k)?;
            f.write_char('=')?;
            write_escaped(f, v)?;
        }
        Ok(())
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    for c in s.chars() {
        if matches!(c, '\\' | ',' | '=' | '{' | '}') {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}

/// Fully-qualified instance identifier: `name{k1=v1,k2=v2}`, or just `name`
/// when the instance has no labels.
pub fn instance_id(name: &str, labels: &LabelSet) -> String {
    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{labels}}}")
    }
}
