//! Prometheus metrics for payment-engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Payments recorded by method.
pub static PAYMENTS_RECORDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_payments_recorded_total",
        "Total number of payments recorded by method",
        &["method"]
    )
    .expect("Failed to register payments_recorded_total")
});

/// Payment amount by method.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_payment_amount_total",
        "Total payment amount by method",
        &["method"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Corrections appended to payment histories.
pub static CORRECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_corrections_total",
        "Total number of payment corrections by kind",
        &["kind"] // amend, void
    )
    .expect("Failed to register corrections_total")
});

/// Consistency violations found by the validator.
pub static VIOLATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_violations_total",
        "Total number of consistency violations found by kind",
        &["kind"]
    )
    .expect("Failed to register violations_total")
});

/// Reconciliation runs by outcome.
pub static RECONCILIATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_reconciliations_total",
        "Total number of reconciliation runs by outcome",
        &["outcome"] // fixed, clean, unresolved
    )
    .expect("Failed to register reconciliations_total")
});

/// Compensating invoice removals after a failed client write.
pub static COMPENSATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_compensations_total",
        "Total number of compensating actions by outcome",
        &["outcome"] // succeeded, failed
    )
    .expect("Failed to register compensations_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Bus deliveries by topic.
pub static BUS_DELIVERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_engine_bus_deliveries_total",
        "Total number of notification deliveries by topic",
        &["topic"]
    )
    .expect("Failed to register bus_deliveries_total")
});

/// Store operation duration histogram.
pub static STORE_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payment_engine_store_operation_duration_seconds",
        "Store operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25]
    )
    .expect("Failed to register store_operation_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&PAYMENTS_RECORDED_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&CORRECTIONS_TOTAL);
    Lazy::force(&VIOLATIONS_TOTAL);
    Lazy::force(&RECONCILIATIONS_TOTAL);
    Lazy::force(&COMPENSATIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&BUS_DELIVERIES_TOTAL);
    Lazy::force(&STORE_OPERATION_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record a recorded payment.
pub fn record_payment(method: &str, amount: f64) {
    PAYMENTS_RECORDED_TOTAL.with_label_values(&[method]).inc();
    PAYMENT_AMOUNT_TOTAL.with_label_values(&[method]).inc_by(amount);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Record a consistency violation.
pub fn record_violation(kind: &str) {
    VIOLATIONS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a reconciliation run.
pub fn record_reconciliation(outcome: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a compensating action.
pub fn record_compensation(outcome: &str) {
    COMPENSATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a correction.
pub fn record_correction(kind: &str) {
    CORRECTIONS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record bus deliveries.
pub fn record_bus_delivery(topic: &str, delivered: usize) {
    BUS_DELIVERIES_TOTAL
        .with_label_values(&[topic])
        .inc_by(delivered as f64);
}
