use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

pub static CYCLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gitlab_extra_cycles_total",
        "Total number of collection cycles attempted"
    )
    .expect("cycles total")
});

pub static CYCLE_SUCCESSES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gitlab_extra_cycle_success_total",
        "Collection cycles that published a new snapshot"
    )
    .expect("cycle successes")
});

pub static CYCLE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gitlab_extra_cycle_failure_total",
        "Collection cycles that kept the previous snapshot, grouped by error kind",
        &["kind"]
    )
    .expect("cycle failures")
});

pub static LAST_RUN_TIMESTAMP: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gitlab_extra_last_run_timestamp_seconds",
        "Unix timestamp when the collection cycle last started"
    )
    .expect("last run timestamp")
});

pub static LAST_SUCCESS_TIMESTAMP: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gitlab_extra_last_success_timestamp_seconds",
        "Unix timestamp when a collection cycle last published a snapshot"
    )
    .expect("last success timestamp")
});

pub static CYCLE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "gitlab_extra_cycle_duration_seconds",
        "Duration of collection cycles in seconds",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]
    )
    .expect("cycle duration histogram")
});

pub static UPSTREAM_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gitlab_extra_upstream_requests_total",
        "GitLab API calls grouped by operation and outcome",
        &["op", "outcome"]
    )
    .expect("upstream requests total")
});

pub static UPSTREAM_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gitlab_extra_upstream_latency_seconds",
        "Latency of GitLab API calls grouped by operation",
        &["op"],
        vec![0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]
    )
    .expect("upstream latency seconds")
});
