//! Exporter plumbing
//!
//! Each attached block registers one [`BlockCollector`] with the domain's
//! `prometheus::Registry`. The collector owns one gauge vector per metric;
//! domain, zone and block names are const labels, declared labels and the
//! index label are variable labels. Sampling passes set the per-element gauge
//! children directly.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts, Registry};

use crate::error::{Result, StatsError};
use crate::label::{LabelScope, BLOCK_LABEL, DOMAIN_LABEL, ZONE_LABEL};
use crate::metric::Metric;

/// Exporter-visible collector of one block
#[derive(Clone)]
pub struct BlockCollector {
    block: String,
    gauges: Vec<GaugeVec>,
}

impl BlockCollector {
    /// Build gauge vectors for `metrics` and bind every element to its series.
    ///
    /// Element labels must already be resolved.
    pub fn build(scope: &LabelScope<'_>, metrics: &mut [Metric]) -> Result<Self> {
        let exporter_err = |source| StatsError::Exporter {
            block: scope.block.to_string(),
            source,
        };

        let mut gauges = Vec::with_capacity(metrics.len());
        for metric in metrics.iter_mut() {
            let spec = metric.spec();
            let opts = Opts::new(spec.name.clone(), spec.help().to_string())
                .const_label(DOMAIN_LABEL, scope.domain)
                .const_label(ZONE_LABEL, scope.zone)
                .const_label(BLOCK_LABEL, scope.block);
            let vec = GaugeVec::new(opts, &spec.exported_label_keys()).map_err(exporter_err)?;

            for element in metric.elements_mut() {
                let values: Vec<&str> = element
                    .labels
                    .exported()
                    .filter(|l| {
                        l.key != DOMAIN_LABEL && l.key != ZONE_LABEL && l.key != BLOCK_LABEL
                    })
                    .map(|l| l.value.as_str())
                    .collect();
                let gauge = vec
                    .get_metric_with_label_values(&values)
                    .map_err(exporter_err)?;
                gauge.set(element.converted);
                element.gauge = Some(gauge);
            }

            gauges.push(vec);
        }

        Ok(Self {
            block: scope.block.to_string(),
            gauges,
        })
    }

    /// Whether the collector exposes no series
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }

    /// Register with `registry`.
    ///
    /// Collectors without metrics are not registered: the registry keys
    /// collectors by their descriptors.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        registry
            .register(Box::new(self.clone()))
            .map_err(|source| StatsError::Exporter {
                block: self.block.clone(),
                source,
            })
    }

    /// Remove from `registry` and drop all series
    pub fn unregister(&self, registry: &Registry) -> Result<()> {
        for vec in &self.gauges {
            vec.reset();
        }
        if self.is_empty() {
            return Ok(());
        }
        registry
            .unregister(Box::new(self.clone()))
            .map_err(|source| StatsError::Exporter {
                block: self.block.clone(),
                source,
            })
    }
}

impl Collector for BlockCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.gauges.iter().flat_map(|g| g.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.gauges.iter().flat_map(|g| g.collect()).collect()
    }
}

impl std::fmt::Debug for BlockCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCollector")
            .field("block", &self.block)
            .field("metrics", &self.gauges.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RegisterField;
    use crate::label::LabelSpec;
    use crate::metric::MetricSpec;

    fn scope(block: &'static str) -> LabelScope<'static> {
        LabelScope {
            domain: "card0",
            zone: "cmac0",
            block,
            metric: "",
        }
    }

    fn metrics() -> Vec<Metric> {
        let specs = vec![
            MetricSpec::counter("rx_packets", RegisterField::new(0, 8))
                .with_desc("Packets received"),
            MetricSpec::gauge("queue_depth", RegisterField::new(8, 4))
                .with_elements(2)
                .with_label(LabelSpec::fixed("dir", "rx"))
                .with_label(LabelSpec::fixed("slot", "3").internal()),
        ];
        let s = scope("rx");
        specs
            .into_iter()
            .map(|spec| {
                let mut m = Metric::alloc(spec, s.block);
                m.resolve_labels(&s);
                m
            })
            .collect()
    }

    #[test]
    fn test_collect_exports_labels() {
        let mut metrics = metrics();
        let collector = BlockCollector::build(&scope("rx"), &mut metrics).unwrap();

        let families = collector.collect();
        assert_eq!(families.len(), 2);

        let depth = families
            .iter()
            .find(|f| f.get_name() == "queue_depth")
            .unwrap();
        assert_eq!(depth.get_metric().len(), 2);

        let names: Vec<&str> = depth.get_metric()[0]
            .get_label()
            .iter()
            .map(|l| l.get_name())
            .collect();
        assert!(names.contains(&"block"));
        assert!(names.contains(&"dir"));
        assert!(names.contains(&"index"));
        assert!(!names.contains(&"slot"));
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = Registry::new();
        let mut metrics = metrics();
        let collector = BlockCollector::build(&scope("rx"), &mut metrics).unwrap();

        collector.register(&registry).unwrap();
        assert!(registry
            .gather()
            .iter()
            .any(|f| f.get_name() == "rx_packets"));

        collector.unregister(&registry).unwrap();
        assert!(registry.gather().is_empty());
    }

    #[test]
    fn test_same_metric_in_two_blocks() {
        let registry = Registry::new();
        let mut a = metrics();
        let mut b = metrics();
        BlockCollector::build(&scope("rx"), &mut a)
            .unwrap()
            .register(&registry)
            .unwrap();
        BlockCollector::build(&scope("tx"), &mut b)
            .unwrap()
            .register(&registry)
            .unwrap();

        let packets = registry
            .gather()
            .into_iter()
            .find(|f| f.get_name() == "rx_packets")
            .unwrap();
        assert_eq!(packets.get_metric().len(), 2);
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let registry = Registry::new();
        let mut a = metrics();
        let mut b = metrics();
        BlockCollector::build(&scope("rx"), &mut a)
            .unwrap()
            .register(&registry)
            .unwrap();
        let err = BlockCollector::build(&scope("rx"), &mut b)
            .unwrap()
            .register(&registry)
            .unwrap_err();
        assert!(matches!(err, StatsError::Exporter { .. }));
    }

    #[test]
    fn test_invalid_metric_name() {
        let s = scope("rx");
        let spec = MetricSpec::counter("rx packets", RegisterField::new(0, 8));
        let mut m = Metric::alloc(spec, "rx");
        m.resolve_labels(&s);
        let mut metrics = vec![m];
        assert!(BlockCollector::build(&s, &mut metrics).is_err());
    }

    #[test]
    fn test_empty_collector_is_not_registered() {
        let registry = Registry::new();
        let collector = BlockCollector::build(&scope("idle"), &mut []).unwrap();
        assert!(collector.is_empty());
        collector.register(&registry).unwrap();
        collector.unregister(&registry).unwrap();
    }
}
