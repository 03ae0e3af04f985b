//! Metric selection for traversal consumers

use serde::{Deserialize, Serialize};

use crate::metric::{Element, Metric, MetricType};

/// Selects metrics and elements during a traversal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricFilter {
    /// Drop all-zero metrics and zero elements of the metrics kept
    pub non_zero: bool,
    /// Metric types to keep (all when empty)
    pub types: Vec<MetricType>,
}

impl MetricFilter {
    /// Filter that keeps everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn non_zero(mut self) -> Self {
        self.non_zero = true;
        self
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = MetricType>) -> Self {
        self.types.extend(types);
        self
    }

    pub fn keeps_type(&self, metric_type: MetricType) -> bool {
        self.types.is_empty() || self.types.contains(&metric_type)
    }

    /// Whether `metric` passes the type and non-zero checks
    pub fn keeps_metric(&self, metric: &Metric) -> bool {
        if !self.keeps_type(metric.spec().metric_type) {
            return false;
        }
        !self.non_zero || metric.elements().iter().any(|e| e.raw() != 0)
    }

    /// Whether `element` of a kept metric passes
    pub fn keeps_element(&self, element: &Element) -> bool {
        !self.non_zero || element.raw() != 0
    }

    /// Indices of the kept elements of `metric`, empty when the metric is dropped
    pub fn select(&self, metric: &Metric) -> Vec<usize> {
        if !self.keeps_metric(metric) {
            return Vec::new();
        }
        metric
            .elements()
            .iter()
            .enumerate()
            .filter(|(_, e)| self.keeps_element(e))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RegisterField;
    use crate::metric::MetricSpec;

    fn metric(values: &[u64]) -> Metric {
        let spec =
            MetricSpec::counter("drops", RegisterField::new(0, 4)).with_elements(values.len());
        let mut metric = Metric::alloc(spec.clone(), "rx");
        for (element, v) in metric.elements_mut().iter_mut().zip(values) {
            element.update(&spec, *v, false);
        }
        metric
    }

    #[test]
    fn test_all_keeps_everything() {
        let filter = MetricFilter::all();
        assert_eq!(filter.select(&metric(&[0, 0, 3])), vec![0, 1, 2]);
    }

    #[test]
    fn test_non_zero() {
        let filter = MetricFilter::all().non_zero();
        assert!(!filter.keeps_metric(&metric(&[0, 0])));
        assert_eq!(filter.select(&metric(&[0, 5, 0, 1])), vec![1, 3]);
    }

    #[test]
    fn test_type_selection() {
        let gauges = MetricFilter::all().with_types([MetricType::Gauge, MetricType::Flag]);
        assert!(!gauges.keeps_metric(&metric(&[1])));
        assert!(gauges.keeps_type(MetricType::Flag));

        let counters = MetricFilter::all().with_types([MetricType::Counter]);
        assert!(counters.keeps_metric(&metric(&[1])));
    }
}
