use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Filler Metrics
    // ============================================================================

    /// Parameter batches accepted by the filler
    pub static ref FILLER_BATCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parchive_filler_batches_total", "Total parameter batches received"),
        &["processor"]
    ).expect("metric can be created");

    /// Batches dropped before reaching a segment
    pub static ref FILLER_BATCHES_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parchive_filler_batches_dropped_total", "Total parameter batches dropped"),
        &["processor", "reason"] // stale, saturated, shutdown
    ).expect("metric can be created");

    /// Backward time jumps that forced a queue flush
    pub static ref FILLER_BACKWARD_JUMPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parchive_filler_backward_jumps_total", "Total backward time jumps"),
        &["processor"]
    ).expect("metric can be created");

    /// Failures resolving a parameter set to a group id
    pub static ref FILLER_GROUP_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parchive_filler_group_errors_total", "Total group id resolution failures"),
        &["processor"]
    ).expect("metric can be created");

    /// Segment queues currently registered
    pub static ref FILLER_ACTIVE_QUEUES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("parchive_filler_active_queues", "Number of parameter group queues"),
        &["processor"]
    ).expect("metric can be created");

    // ============================================================================
    // Archive Write Metrics
    // ============================================================================

    /// Segments persisted to the archive
    pub static ref ARCHIVE_SEGMENTS_WRITTEN_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parchive_archive_segments_written_total", "Total segments written"),
        &["processor"]
    ).expect("metric can be created");

    /// Samples persisted to the archive
    pub static ref ARCHIVE_SAMPLES_WRITTEN_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parchive_archive_samples_written_total", "Total samples written"),
        &["processor"]
    ).expect("metric can be created");

    /// Failed write attempts by what happened next
    pub static ref ARCHIVE_WRITE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parchive_archive_write_failures_total", "Total failed segment writes"),
        &["processor", "outcome"] // retry, released, retained
    ).expect("metric can be created");

    /// Segment write latency, retries included
    pub static ref ARCHIVE_WRITE_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("parchive_archive_write_latency_seconds", "Segment write latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["processor"]
    ).expect("metric can be created");

    /// Segment writes submitted but not finished
    pub static ref ARCHIVE_WRITES_IN_FLIGHT: IntGauge = IntGauge::new(
        "parchive_archive_writes_in_flight",
        "Number of segment writes in flight"
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        // Filler metrics
        REGISTRY
            .register(Box::new(FILLER_BATCHES_TOTAL.clone()))
            .expect("filler_batches_total can be registered");
        REGISTRY
            .register(Box::new(FILLER_BATCHES_DROPPED_TOTAL.clone()))
            .expect("filler_batches_dropped_total can be registered");
        REGISTRY
            .register(Box::new(FILLER_BACKWARD_JUMPS_TOTAL.clone()))
            .expect("filler_backward_jumps_total can be registered");
        REGISTRY
            .register(Box::new(FILLER_GROUP_ERRORS_TOTAL.clone()))
            .expect("filler_group_errors_total can be registered");
        REGISTRY
            .register(Box::new(FILLER_ACTIVE_QUEUES.clone()))
            .expect("filler_active_queues can be registered");

        // Archive write metrics
        REGISTRY
            .register(Box::new(ARCHIVE_SEGMENTS_WRITTEN_TOTAL.clone()))
            .expect("archive_segments_written_total can be registered");
        REGISTRY
            .register(Box::new(ARCHIVE_SAMPLES_WRITTEN_TOTAL.clone()))
            .expect("archive_samples_written_total can be registered");
        REGISTRY
            .register(Box::new(ARCHIVE_WRITE_FAILURES_TOTAL.clone()))
            .expect("archive_write_failures_total can be registered");
        REGISTRY
            .register(Box::new(ARCHIVE_WRITE_LATENCY.clone()))
            .expect("archive_write_latency can be registered");
        REGISTRY
            .register(Box::new(ARCHIVE_WRITES_IN_FLIGHT.clone()))
            .expect("archive_writes_in_flight can be registered");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        init();
        init();
    }

    #[test]
    fn test_dropped_batches_by_reason() {
        FILLER_BATCHES_DROPPED_TOTAL
            .with_label_values(&["metrics-test", "stale"])
            .inc();
        FILLER_BATCHES_DROPPED_TOTAL
            .with_label_values(&["metrics-test", "saturated"])
            .inc_by(3);

        assert_eq!(
            FILLER_BATCHES_DROPPED_TOTAL
                .with_label_values(&["metrics-test", "stale"])
                .get(),
            1
        );
        assert_eq!(
            FILLER_BATCHES_DROPPED_TOTAL
                .with_label_values(&["metrics-test", "saturated"])
                .get(),
            3
        );
    }

    #[test]
    fn test_active_queues_gauge() {
        FILLER_ACTIVE_QUEUES
            .with_label_values(&["metrics-test"])
            .set(12);

        assert_eq!(
            FILLER_ACTIVE_QUEUES.with_label_values(&["metrics-test"]).get(),
            12
        );
    }
}
