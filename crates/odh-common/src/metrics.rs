//! Metrics registry for ODH operator observability
//!
//! Provides OpenTelemetry metrics for:
//! - Manifest rendering (resources produced per engine)
//! - Deployment (resources applied and skipped through the deploy cache)
//! - Garbage collection
//! - Reconcile loop health

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for ODH metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("odh"));

// ============================================================================
// Pipeline Metrics
// ============================================================================

/// Counter of resources produced by a fresh render (cache misses only)
///
/// Labels:
/// - `controller`: controller name (lowercase kind)
/// - `engine`: kustomize, helm, template
pub static RENDERED_RESOURCES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("odh_rendered_resources_total")
        .with_description("Number of resources rendered")
        .with_unit("{resources}")
        .build()
});

/// Counter of resources written with server-side apply or create
///
/// Labels:
/// - `controller`: controller name
pub static DEPLOYED_RESOURCES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("odh_deployed_resources_total")
        .with_description("Number of resources deployed")
        .with_unit("{resources}")
        .build()
});

/// Counter of resources whose write was skipped by the deploy cache
///
/// Labels:
/// - `controller`: controller name
pub static DEPLOY_SKIPPED_RESOURCES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("odh_deploy_skipped_resources_total")
        .with_description("Number of resources skipped by the deploy cache")
        .with_unit("{resources}")
        .build()
});

/// Counter of resources removed by garbage collection
///
/// Labels:
/// - `controller`: controller name
pub static GC_DELETED_RESOURCES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("odh_gc_deleted_resources_total")
        .with_description("Number of resources deleted by garbage collection")
        .with_unit("{resources}")
        .build()
});

// ============================================================================
// Reconcile Loop Metrics
// ============================================================================

/// Counter of reconcile errors
///
/// Labels:
/// - `controller`: controller name
/// - `error_type`: stop, transient, fatal
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("odh_reconcile_errors_total")
        .with_description("Total number of reconcile errors")
        .with_unit("{errors}")
        .build()
});

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: controller name
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("odh_reconcile_duration_seconds")
        .with_description("Duration of reconcile cycles in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Recording helpers
// ============================================================================

/// Record resources produced by a render
pub fn record_rendered(controller: &str, engine: &str, count: usize) {
    RENDERED_RESOURCES.add(
        count as u64,
        &[
            KeyValue::new("controller", controller.to_string()),
            KeyValue::new("engine", engine.to_string()),
        ],
    );
}

/// Record one applied resource
pub fn record_deployed(controller: &str) {
    DEPLOYED_RESOURCES.add(1, &[KeyValue::new("controller", controller.to_string())]);
}

/// Record one resource skipped by the deploy cache
pub fn record_deploy_skipped(controller: &str) {
    DEPLOY_SKIPPED_RESOURCES.add(1, &[KeyValue::new("controller", controller.to_string())]);
}

/// Record one resource deleted by garbage collection
pub fn record_gc_deleted(controller: &str) {
    GC_DELETED_RESOURCES.add(1, &[KeyValue::new("controller", controller.to_string())]);
}

/// Record a reconcile error
pub fn record_reconcile_error(controller: &str, error_type: &str) {
    RECONCILE_ERRORS.add(
        1,
        &[
            KeyValue::new("controller", controller.to_string()),
            KeyValue::new("error_type", error_type.to_string()),
        ],
    );
}

/// Record how long a reconcile took
pub fn record_reconcile_duration(controller: &str, success: bool, seconds: f64) {
    let result = if success { "success" } else { "error" };
    RECONCILE_DURATION.record(
        seconds,
        &[
            KeyValue::new("controller", controller.to_string()),
            KeyValue::new("result", result),
        ],
    );
}
