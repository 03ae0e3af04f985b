//! Metric labels
//!
//! Every element carries a resolved label set made of the default labels
//! (domain, zone and block names), the metric's declared labels and, for
//! array metrics, an index label. Declared labels are either fixed strings or
//! values computed by a [`LabelSource`] when the block is attached; computed
//! values stay cached until detach, where they are handed back to the source.
//!
//! Labels marked internal take part in lookups but are never exported.

use std::fmt;
use std::sync::Arc;

/// Label key for the owning domain
pub const DOMAIN_LABEL: &str = "domain";
/// Label key for the owning zone
pub const ZONE_LABEL: &str = "zone";
/// Label key for the owning block
pub const BLOCK_LABEL: &str = "block";
/// Default key of the array index label
pub const INDEX_LABEL: &str = "index";

/// Names of the objects a label is resolved for
#[derive(Debug, Clone, Copy)]
pub struct LabelScope<'a> {
    pub domain: &'a str,
    pub zone: &'a str,
    pub block: &'a str,
    pub metric: &'a str,
}

/// Source of a label value computed at attach time
pub trait LabelSource: Send + Sync {
    /// Compute the value for `key`. Called once per metric attach.
    fn resolve(&self, key: &str, scope: &LabelScope<'_>) -> String;

    /// Give back a value produced by [`resolve`](Self::resolve) at detach.
    fn release(&self, _key: &str, _value: String) {}
}

impl<F> LabelSource for F
where
    F: Fn(&str, &LabelScope<'_>) -> String + Send + Sync,
{
    fn resolve(&self, key: &str, scope: &LabelScope<'_>) -> String {
        self(key, scope)
    }
}

/// Value of a declared label
#[derive(Clone)]
pub enum LabelValue {
    /// Fixed string
    Fixed(String),
    /// Computed at attach time
    Computed(Arc<dyn LabelSource>),
}

impl fmt::Debug for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelValue::Fixed(v) => f.debug_tuple("Fixed").field(v).finish(),
            LabelValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Declared metric label
#[derive(Debug, Clone)]
pub struct LabelSpec {
    /// Label key
    pub key: String,
    /// Value or value source
    pub value: LabelValue,
    /// Excluded from the exporter when set
    pub internal: bool,
}

impl LabelSpec {
    /// Label with a fixed value
    pub fn fixed(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: LabelValue::Fixed(value.into()),
            internal: false,
        }
    }

    /// Label computed when the metric's block is attached
    pub fn computed(key: impl Into<String>, source: Arc<dyn LabelSource>) -> Self {
        Self {
            key: key.into(),
            value: LabelValue::Computed(source),
            internal: false,
        }
    }

    /// Mark the label internal-only
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

/// Formats an array index into a label value
pub type IndexFormatter = Arc<dyn Fn(usize) -> String + Send + Sync>;

/// Per-element index label of an array metric
#[derive(Clone)]
pub struct IndexLabel {
    /// Label key
    pub key: String,
    /// Value formatter (decimal index when absent)
    pub format: Option<IndexFormatter>,
    /// Excluded from the exporter when set
    pub internal: bool,
}

impl IndexLabel {
    /// Index label with a custom key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            format: None,
            internal: false,
        }
    }

    /// Use `format` to turn indices into label values
    pub fn with_format(mut self, format: impl Fn(usize) -> String + Send + Sync + 'static) -> Self {
        self.format = Some(Arc::new(format));
        self
    }

    /// Mark the label internal-only
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Label value for element `index`
    pub fn value(&self, index: usize) -> String {
        match &self.format {
            Some(format) => format(index),
            None => index.to_string(),
        }
    }
}

impl Default for IndexLabel {
    fn default() -> Self {
        Self::new(INDEX_LABEL)
    }
}

impl fmt::Debug for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexLabel")
            .field("key", &self.key)
            .field("custom_format", &self.format.is_some())
            .field("internal", &self.internal)
            .finish()
    }
}

/// Resolved label of one element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    pub value: String,
    pub internal: bool,
}

/// Resolved labels of one element, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    /// Empty set with room for `capacity` labels
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            labels: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, key: &str, value: String, internal: bool) {
        self.labels.push(Label {
            key: key.to_string(),
            value,
            internal,
        });
    }

    pub(crate) fn clear(&mut self) {
        self.labels.clear();
    }

    /// Look up a label value, internal labels included
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value.as_str())
    }

    /// All labels
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Labels handed to the exporter
    pub fn exported(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(|l| !l.internal)
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether no labels are resolved (element not attached)
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
