use crate::util::errors::Error;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub coordination_calls: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["controller"],
        )?;
        let failures = IntCounterVec::new(
            opts!("controller_reconciliation_errors_total", "reconciliation errors",),
            &["controller", "error"],
        )?;
        let reconciliations = IntCounterVec::new(
            opts!("controller_reconciliations_total", "reconciliations"),
            &["controller"],
        )?;
        let coordination_calls = IntCounterVec::new(
            opts!(
                "storage_controller_calls_total",
                "calls to the storage controller by operation and outcome"
            ),
            &["operation", "outcome"],
        )?;
        Ok(Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            coordination_calls,
        })
    }

    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.coordination_calls.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, controller: &str, e: &Error) {
        self.failures
            .with_label_values(&[controller, e.metric_label().as_ref()])
            .inc()
    }

    pub fn coordination_call(&self, operation: &str, outcome: &str) {
        self.coordination_calls.with_label_values(&[operation, outcome]).inc()
    }

    pub fn count_and_measure(&self, controller: &str) -> ReconcileMeasurer {
        self.reconciliations.with_label_values(&[controller]).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            controller: controller.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    controller: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.controller.as_str()])
            .observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_labelled_per_controller() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();

        drop(metrics.count_and_measure("branch"));
        metrics.reconcile_failure("branch", &Error::NotFound("x".to_string()));
        metrics.coordination_call("create_timeline", "created");

        assert_eq!(metrics.reconciliations.with_label_values(&["branch"]).get(), 1);
        assert_eq!(metrics.failures.with_label_values(&["branch", "notfound"]).get(), 1);
        assert_eq!(
            metrics
                .coordination_calls
                .with_label_values(&["create_timeline", "created"])
                .get(),
            1
        );
        assert_eq!(
            metrics.reconcile_duration.with_label_values(&["branch"]).get_sample_count(),
            1
        );
        assert_eq!(registry.gather().len(), 4);
    }

    #[test]
    fn registering_twice_fails() {
        let registry = Registry::new();
        Metrics::new().unwrap().register(&registry).unwrap();
        assert!(Metrics::new().unwrap().register(&registry).is_err());
    }
}
