use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, Registry};
use tracing::error;

use pagelift_core_types::DetectionMethod;

lazy_static! {
    static ref PROBE_DETECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "pagelift_probe_detections_total",
            "Detection results grouped by producing heuristic"
        ),
        &["method"]
    )
    .unwrap();
    static ref PROBE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "pagelift_probe_misses_total",
        "Detection passes that found neither keys nor a platform signature",
    )
    .unwrap();
    static ref CLONE_ACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "pagelift_clone_actions_total",
            "Clone actions grouped by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register prober metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, PROBE_DETECTIONS_TOTAL.clone());
    register(registry, PROBE_MISSES_TOTAL.clone());
    register(registry, CLONE_ACTIONS_TOTAL.clone());
}

pub fn record_detection(method: DetectionMethod) {
    PROBE_DETECTIONS_TOTAL
        .with_label_values(&[method.as_str()])
        .inc();
}

pub fn record_miss() {
    PROBE_MISSES_TOTAL.inc();
}

pub fn record_clone(ok: bool) {
    let outcome = if ok { "success" } else { "failure" };
    CLONE_ACTIONS_TOTAL.with_label_values(&[outcome]).inc();
}
