//! Metrics and their elements
//!
//! A [`Metric`] is a named, typed series with one element, or `N` elements for
//! array metrics sharing one register rule. Each [`Element`] keeps the
//! accumulated raw value, the last raw sample used for counter deltas, the
//! converted float and its resolved labels. Element and label storage is sized
//! once when the metric is allocated.

use std::time::SystemTime;

use prometheus::Gauge;
use serde::{Deserialize, Serialize};

use crate::decode::RegisterField;
use crate::label::{IndexLabel, LabelScope, LabelSet, LabelSpec, LabelValue};

/// Numeric semantics of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetricType {
    /// Monotonic count accumulated from register deltas
    Counter,
    /// Latest sampled value
    #[default]
    Gauge,
    /// Boolean status (0 or 1)
    Flag,
}

impl MetricType {
    /// All metric types
    pub const ALL: [MetricType; 3] = [MetricType::Counter, MetricType::Gauge, MetricType::Flag];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Flag => "flag",
        }
    }
}

/// Independent metric flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricFlags {
    /// Metric has `nelements` elements read from consecutive registers
    pub array: bool,
    /// The register resets itself when read
    pub clear_on_read: bool,
    /// Exempt from clear passes
    pub never_clear: bool,
}

impl MetricFlags {
    /// No flags set
    pub const NONE: MetricFlags = MetricFlags {
        array: false,
        clear_on_read: false,
        never_clear: false,
    };

    pub fn array() -> Self {
        Self {
            array: true,
            ..Self::NONE
        }
    }

    pub fn clear_on_read() -> Self {
        Self {
            clear_on_read: true,
            ..Self::NONE
        }
    }

    pub fn never_clear() -> Self {
        Self {
            never_clear: true,
            ..Self::NONE
        }
    }

    /// Union of two flag sets
    pub fn with(self, other: MetricFlags) -> Self {
        Self {
            array: self.array || other.array,
            clear_on_read: self.clear_on_read || other.clear_on_read,
            never_clear: self.never_clear || other.never_clear,
        }
    }
}

/// Declarative description of a metric
#[derive(Debug, Clone)]
pub struct MetricSpec {
    /// Metric name, also the exporter series name
    pub name: String,
    /// Human readable description
    pub desc: String,
    pub metric_type: MetricType,
    pub flags: MetricFlags,
    /// Number of array elements (ignored unless `flags.array`)
    pub nelements: usize,
    /// Value restored by clear passes, and the starting value
    pub init_value: u64,
    /// Register field for direct reads
    pub field: RegisterField,
    /// Declared labels
    pub labels: Vec<LabelSpec>,
    /// Index label of array elements
    pub index_label: IndexLabel,
    /// Opaque word handed back to driver hooks
    pub data: u64,
}

impl MetricSpec {
    /// Metric of the given type reading `field`
    pub fn new(name: impl Into<String>, metric_type: MetricType, field: RegisterField) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            metric_type,
            flags: MetricFlags::NONE,
            nelements: 1,
            init_value: 0,
            field,
            labels: Vec::new(),
            index_label: IndexLabel::default(),
            data: 0,
        }
    }

    pub fn counter(name: impl Into<String>, field: RegisterField) -> Self {
        Self::new(name, MetricType::Counter, field)
    }

    pub fn gauge(name: impl Into<String>, field: RegisterField) -> Self {
        Self::new(name, MetricType::Gauge, field)
    }

    pub fn flag(name: impl Into<String>, field: RegisterField) -> Self {
        Self::new(name, MetricType::Flag, field)
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Add flags to the metric
    pub fn with_flags(mut self, flags: MetricFlags) -> Self {
        self.flags = self.flags.with(flags);
        self
    }

    /// Turn the metric into an array of `nelements` elements
    pub fn with_elements(mut self, nelements: usize) -> Self {
        self.flags.array = true;
        self.nelements = nelements;
        self
    }

    pub fn with_init_value(mut self, init_value: u64) -> Self {
        self.init_value = init_value;
        self
    }

    pub fn with_label(mut self, label: LabelSpec) -> Self {
        self.labels.push(label);
        self
    }

    pub fn with_index_label(mut self, index_label: IndexLabel) -> Self {
        self.index_label = index_label;
        self
    }

    pub fn with_data(mut self, data: u64) -> Self {
        self.data = data;
        self
    }

    /// Number of elements the metric holds
    pub fn element_count(&self) -> usize {
        if self.flags.array {
            self.nelements
        } else {
            1
        }
    }

    /// Description used by the exporter (falls back to the name)
    pub fn help(&self) -> &str {
        if self.desc.is_empty() {
            &self.name
        } else {
            &self.desc
        }
    }

    /// Keys of the variable labels handed to the exporter, in order
    pub fn exported_label_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .labels
            .iter()
            .filter(|l| !l.internal)
            .map(|l| l.key.as_str())
            .collect();
        if self.flags.array && !self.index_label.internal {
            keys.push(self.index_label.key.as_str());
        }
        keys
    }
}

/// Raw and converted value of one element
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricValue {
    /// Accumulated raw value
    pub raw: u64,
    /// Converted value
    pub value: f64,
}

/// One scalar slot of a metric
#[derive(Clone)]
pub struct Element {
    /// Accumulated raw value
    pub(crate) value: u64,
    /// Last raw sample, for counter deltas
    pub(crate) last: u64,
    /// Converted value
    pub(crate) converted: f64,
    pub(crate) labels: LabelSet,
    pub(crate) gauge: Option<Gauge>,
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("value", &self.value)
            .field("last", &self.last)
            .field("converted", &self.converted)
            .field("labels", &self.labels)
            .field("exported", &self.gauge.is_some())
            .finish()
    }
}

impl Element {
    fn new(init_value: u64, nlabels: usize) -> Self {
        Self {
            value: init_value,
            last: 0,
            converted: init_value as f64,
            labels: LabelSet::with_capacity(nlabels),
            gauge: None,
        }
    }

    /// Update with the mask a direct register read would use
    #[cfg(test)]
    pub(crate) fn update(&mut self, spec: &MetricSpec, current: u64, clear: bool) {
        self.update_masked(spec, current, spec.field.value_mask(), clear);
    }

    /// Apply one raw sample under the metric's semantics.
    ///
    /// Counter deltas are taken modulo `mask + 1`, so a register narrower
    /// than 64 bits wraps forward. On a clear pass the counter baseline still
    /// moves to `current`, but the accumulator is reset to the initial value
    /// unless the metric is never cleared.
    pub(crate) fn update_masked(
        &mut self,
        spec: &MetricSpec,
        current: u64,
        mask: u64,
        clear: bool,
    ) {
        let reset = clear && !spec.flags.never_clear;

        match spec.metric_type {
            MetricType::Counter => {
                let diff = if spec.flags.clear_on_read {
                    current
                } else {
                    let diff = current.wrapping_sub(self.last) & mask;
                    self.last = current;
                    diff
                };

                if reset {
                    self.value = spec.init_value;
                } else {
                    self.value = self.value.wrapping_add(diff);
                }
            }
            MetricType::Flag => {
                self.value = if reset {
                    spec.init_value
                } else {
                    u64::from(current != 0)
                };
            }
            MetricType::Gauge => {
                self.value = if reset { spec.init_value } else { current };
            }
        }
    }

    /// Accumulated raw value
    pub fn raw(&self) -> u64 {
        self.value
    }

    /// Converted value from the last pass
    pub fn converted(&self) -> f64 {
        self.converted
    }

    pub fn value(&self) -> MetricValue {
        MetricValue {
            raw: self.value,
            value: self.converted,
        }
    }

    /// Resolved labels (empty while detached)
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

/// A metric and its elements
#[derive(Debug)]
pub struct Metric {
    spec: MetricSpec,
    elements: Vec<Element>,
    /// Cached values of computed labels, released at detach
    computed: Vec<(usize, String)>,
}

impl Metric {
    /// Allocate element storage for `spec`.
    ///
    /// # Panics
    ///
    /// Panics when an array metric declares zero elements.
    pub fn alloc(spec: MetricSpec, block: &str) -> Self {
        if spec.flags.array && spec.nelements == 0 {
            crate::fatal!(
                "array metric {} in block {} declares zero elements",
                spec.name,
                block
            );
        }

        let nelements = spec.element_count();
        // domain, zone, block, declared labels, index
        let nlabels = 3 + spec.labels.len() + usize::from(spec.flags.array);
        let elements = (0..nelements)
            .map(|_| Element::new(spec.init_value, nlabels))
            .collect();

        Self {
            spec,
            elements,
            computed: Vec::new(),
        }
    }

    pub fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub(crate) fn split_mut(&mut self) -> (&MetricSpec, &mut [Element]) {
        (&self.spec, &mut self.elements)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Always false: metrics have at least one element
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Current values of all elements
    pub fn values(&self) -> Vec<MetricValue> {
        self.elements.iter().map(Element::value).collect()
    }

    /// Resolve every element's labels for `scope`
    pub(crate) fn resolve_labels(&mut self, scope: &LabelScope<'_>) {
        let mut declared = Vec::with_capacity(self.spec.labels.len());
        for (n, label) in self.spec.labels.iter().enumerate() {
            let value = match &label.value {
                LabelValue::Fixed(v) => v.clone(),
                LabelValue::Computed(source) => {
                    let v = source.resolve(&label.key, scope);
                    self.computed.push((n, v.clone()));
                    v
                }
            };
            declared.push(value);
        }

        for (index, element) in self.elements.iter_mut().enumerate() {
            let labels = &mut element.labels;
            labels.clear();
            labels.push(crate::label::DOMAIN_LABEL, scope.domain.to_string(), false);
            labels.push(crate::label::ZONE_LABEL, scope.zone.to_string(), false);
            labels.push(crate::label::BLOCK_LABEL, scope.block.to_string(), false);
            for (label, value) in self.spec.labels.iter().zip(&declared) {
                labels.push(&label.key, value.clone(), label.internal);
            }
            if self.spec.flags.array {
                let index_label = &self.spec.index_label;
                labels.push(&index_label.key, index_label.value(index), index_label.internal);
            }
        }
    }

    /// Drop resolved labels and give computed values back to their sources
    pub(crate) fn release_labels(&mut self) {
        for (n, value) in self.computed.drain(..) {
            let label = &self.spec.labels[n];
            if let LabelValue::Computed(source) = &label.value {
                source.release(&label.key, value);
            }
        }
        for element in &mut self.elements {
            element.labels.clear();
            element.gauge = None;
        }
    }
}

/// One metric as seen by a traversal callback
#[derive(Debug, Clone, Copy)]
pub struct MetricVisit<'a> {
    pub domain: &'a str,
    pub zone: &'a str,
    pub block: &'a str,
    pub metric: &'a Metric,
    /// Last completed sampling pass of the block
    pub last_update: Option<SystemTime>,
}

impl<'a> MetricVisit<'a> {
    pub fn spec(&self) -> &'a MetricSpec {
        self.metric.spec()
    }

    pub fn elements(&self) -> &'a [Element] {
        self.metric.elements()
    }

    pub fn values(&self) -> Vec<MetricValue> {
        self.metric.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> MetricSpec {
        MetricSpec::counter("rx_packets", RegisterField::new(0, 4))
    }

    #[test]
    fn test_counter_accumulates_deltas() {
        let spec = counter();
        let mut e = Element::new(0, 3);
        e.update(&spec, 100, false);
        e.update(&spec, 150, false);
        assert_eq!(e.raw(), 150);
        e.update(&spec, 175, false);
        assert_eq!(e.raw(), 175);
    }

    #[test]
    fn test_counter_wraparound() {
        let spec = MetricSpec::counter("rx_bytes", RegisterField::new(0, 8));
        let mut e = Element::new(0, 3);
        e.update(&spec, u64::MAX - 4, false);
        let before = e.raw();
        e.update(&spec, 5, false);
        assert_eq!(e.raw().wrapping_sub(before), 10);
    }

    #[test]
    fn test_counter_wraps_at_register_width() {
        let spec = counter();
        let mut e = Element::new(0, 3);
        e.update(&spec, 0xffff_fff0, false);
        e.update(&spec, 0x10, false);
        assert_eq!(e.raw(), 0xffff_fff0 + 0x20);
        assert_eq!(e.last, 0x10);
    }

    #[test]
    fn test_counter_wraps_at_field_width() {
        let spec = MetricSpec::counter("drops", RegisterField::bits(0, 4, 4, 8));
        let mut e = Element::new(0, 3);
        e.update(&spec, 0xf0, false);
        e.update(&spec, 0x10, false);
        assert_eq!(e.raw(), 0xf0 + 0x20);
    }

    #[test]
    fn test_counter_full_width_mask() {
        let spec = counter();
        let mut e = Element::new(0, 3);
        e.update_masked(&spec, 0xffff_fff0, u64::MAX, false);
        e.update_masked(&spec, 0x1_0000_0010, u64::MAX, false);
        assert_eq!(e.raw(), 0x1_0000_0010);
    }

    #[test]
    fn test_clear_on_read_counter_adds_samples() {
        let spec = counter().with_flags(MetricFlags::clear_on_read());
        let mut e = Element::new(0, 3);
        e.update(&spec, 7, false);
        e.update(&spec, 3, false);
        assert_eq!(e.raw(), 10);
        assert_eq!(e.last, 0);
    }

    #[test]
    fn test_counter_clear_resets_and_moves_baseline() {
        let spec = counter().with_init_value(5);
        let mut e = Element::new(5, 3);
        e.update(&spec, 100, false);
        assert_eq!(e.raw(), 105);

        e.update(&spec, 120, true);
        assert_eq!(e.raw(), 5);

        e.update(&spec, 121, false);
        assert_eq!(e.raw(), 6);
    }

    #[test]
    fn test_never_clear_survives_clear() {
        let spec = counter().with_flags(MetricFlags::never_clear());
        let mut e = Element::new(0, 3);
        e.update(&spec, 10, false);
        e.update(&spec, 12, true);
        assert_eq!(e.raw(), 12);
    }

    #[test]
    fn test_flag_semantics() {
        let spec = MetricSpec::flag("link_up", RegisterField::bits(0, 1, 1, 1));
        let mut e = Element::new(0, 3);
        e.update(&spec, 42, false);
        assert_eq!(e.raw(), 1);
        e.update(&spec, 0, false);
        assert_eq!(e.raw(), 0);
        e.update(&spec, 1, true);
        assert_eq!(e.raw(), 0);
    }

    #[test]
    fn test_gauge_semantics() {
        let spec = MetricSpec::gauge("temperature", RegisterField::new(0, 2)).with_init_value(3);
        let mut e = Element::new(3, 3);
        e.update(&spec, 160, false);
        assert_eq!(e.raw(), 160);
        e.update(&spec, 170, true);
        assert_eq!(e.raw(), 3);
    }

    #[test]
    fn test_element_count() {
        assert_eq!(counter().element_count(), 1);
        assert_eq!(counter().with_elements(16).element_count(), 16);

        // nelements is ignored without the array flag
        let mut spec = counter();
        spec.nelements = 4;
        assert_eq!(spec.element_count(), 1);
    }

    #[test]
    #[should_panic(expected = "declares zero elements")]
    fn test_zero_element_array_is_fatal() {
        Metric::alloc(counter().with_elements(0), "rx");
    }

    #[test]
    fn test_alloc_sizes_elements_once() {
        let metric = Metric::alloc(counter().with_elements(4).with_init_value(9), "rx");
        assert_eq!(metric.len(), 4);
        assert!(metric.values().iter().all(|v| v.raw == 9));
        assert!(metric.elements().iter().all(|e| e.labels().is_empty()));
    }

    #[test]
    fn test_exported_label_keys() {
        let spec = counter()
            .with_elements(2)
            .with_label(LabelSpec::fixed("port", "0"))
            .with_label(LabelSpec::fixed("slot", "3").internal());
        assert_eq!(spec.exported_label_keys(), vec!["port", "index"]);

        let hidden = counter()
            .with_elements(2)
            .with_index_label(IndexLabel::new("lane").internal());
        assert!(hidden.exported_label_keys().is_empty());
    }

    #[test]
    fn test_resolve_and_release_labels() {
        struct Source(AtomicUsize);
        impl crate::label::LabelSource for Source {
            fn resolve(&self, _key: &str, scope: &LabelScope<'_>) -> String {
                format!("{}:{}", scope.zone, scope.metric)
            }
            fn release(&self, _key: &str, _value: String) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let source = Arc::new(Source(AtomicUsize::new(0)));
        let spec = counter()
            .with_elements(3)
            .with_label(LabelSpec::computed("path", source.clone()));
        let mut metric = Metric::alloc(spec, "rx");

        let scope = LabelScope {
            domain: "card0",
            zone: "cmac0",
            block: "rx",
            metric: "rx_packets",
        };
        metric.resolve_labels(&scope);

        let e = &metric.elements()[2];
        assert_eq!(e.labels().get("domain"), Some("card0"));
        assert_eq!(e.labels().get("path"), Some("cmac0:rx_packets"));
        assert_eq!(e.labels().get("index"), Some("2"));

        metric.release_labels();
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
        assert!(metric.elements()[0].labels().is_empty());
    }

    #[test]
    fn test_flags_serde() {
        let flags = MetricFlags::array().with(MetricFlags::never_clear());
        let json = serde_json::to_string(&flags).unwrap();
        let back: MetricFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(flags, back);
    }
}
