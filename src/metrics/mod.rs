//! Prometheus metrics for fabric allocation.
//!
//! All collectors live in one crate registry so an embedding service can
//! expose them next to its own via [`gather_text`].

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("tailor".to_string()), None)
        .expect("registry can be created");
    static ref FABRIC_ALLOCATIONS: IntCounter = IntCounter::new(
        "fabric_allocations_total",
        "Total number of successful fabric allocation requests"
    )
    .expect("metric can be created");
    static ref FABRIC_ALLOCATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "fabric_allocation_failures_total",
            "Total number of failed fabric allocation requests"
        ),
        &["reason"]
    )
    .expect("metric can be created");
    static ref FABRIC_RELEASES: IntCounter = IntCounter::new(
        "fabric_releases_total",
        "Total number of released fabric allocations"
    )
    .expect("metric can be created");
    static ref FABRIC_ALLOCATED_METERS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "fabric_allocated_meters",
            "Meters of fabric allocated per request"
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0])
    )
    .expect("metric can be created");
}

/// Registers the collectors with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(FABRIC_ALLOCATIONS.clone()),
        Box::new(FABRIC_ALLOCATION_FAILURES.clone()),
        Box::new(FABRIC_RELEASES.clone()),
        Box::new(FABRIC_ALLOCATED_METERS.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => warn!(error = %e, "failed to register metric"),
        }
    }
}

pub fn record_allocation(total_allocated: Decimal) {
    FABRIC_ALLOCATIONS.inc();
    FABRIC_ALLOCATED_METERS.observe(total_allocated.to_f64().unwrap_or_default());
}

pub fn record_allocation_failure(reason: &str) {
    FABRIC_ALLOCATION_FAILURES.with_label_values(&[reason]).inc();
}

pub fn record_release() {
    FABRIC_RELEASES.inc();
}

pub fn allocations_total() -> u64 {
    FABRIC_ALLOCATIONS.get()
}

pub fn allocation_failures(reason: &str) -> u64 {
    FABRIC_ALLOCATION_FAILURES.with_label_values(&[reason]).get()
}

pub fn releases_total() -> u64 {
    FABRIC_RELEASES.get()
}

/// Prometheus text exposition of the crate registry.
pub fn gather_text() -> Result<String, prometheus::Error> {
    register_metrics();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
