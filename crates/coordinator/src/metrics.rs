use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref COORDINATOR_BINDINGS_TOTAL: IntGauge = IntGauge::new(
        "pagelift_coordinator_bindings_total",
        "Live tab bindings held in memory"
    )
    .unwrap();
    static ref COORDINATOR_DISCOVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "pagelift_coordinator_discoveries_total",
            "Forwarded detection results grouped by effect"
        ),
        &["effect"]
    )
    .unwrap();
    static ref COORDINATOR_SWEEP_REMOVED_TOTAL: IntCounter = IntCounter::new(
        "pagelift_coordinator_sweep_removed_total",
        "Stale tab bindings removed by garbage-collection passes",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register coordinator metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, COORDINATOR_BINDINGS_TOTAL.clone());
    register(registry, COORDINATOR_DISCOVERIES_TOTAL.clone());
    register(registry, COORDINATOR_SWEEP_REMOVED_TOTAL.clone());
}

pub fn set_binding_count(count: usize) {
    COORDINATOR_BINDINGS_TOTAL.set(count as i64);
}

pub fn record_discovery(bound: bool) {
    let effect = if bound { "bound" } else { "cleared" };
    COORDINATOR_DISCOVERIES_TOTAL
        .with_label_values(&[effect])
        .inc();
}

pub fn record_sweep_removed(count: usize) {
    COORDINATOR_SWEEP_REMOVED_TOTAL.inc_by(count as u64);
}
