//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Evidentia metrics
pub const METRICS_PREFIX: &str = "evidentia";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 800ms single-shot, P99 < 15s multi-step
pub const LATENCY_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    0.800,  // 800ms - single-shot P50 target
    1.500,  // 1.5s
    3.000,  // 3s
    5.000,  // 5s
    10.00,  // 10s
    15.00,  // 15s - multi-step P99 target
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_pipeline_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total pipeline executions by strategy"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_pipeline_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline fallbacks from reasoning to single-shot generation"
    );

    // Reasoning metrics
    describe_counter!(
        format!("{}_reasoning_steps_total", METRICS_PREFIX),
        Unit::Count,
        "Total reasoning steps executed"
    );

    describe_counter!(
        format!("{}_reasoning_steps_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Reasoning steps that degraded instead of completing"
    );

    describe_histogram!(
        format!("{}_reasoning_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Reasoning chain latency in seconds"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrieval_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval calls"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval call latency in seconds"
    );

    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of evidence items returned from retrieval"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_generation_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Total generation API calls"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Generation call latency in seconds"
    );

    describe_counter!(
        format!("{}_generation_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total generation API errors"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record pipeline metrics
pub fn record_pipeline(duration_secs: f64, strategy: &str, fell_back: bool) {
    counter!(
        format!("{}_pipeline_requests_total", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);

    if fell_back {
        counter!(format!("{}_pipeline_fallbacks_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record reasoning chain metrics
pub fn record_reasoning(duration_secs: f64, steps: usize, degraded: usize) {
    counter!(format!("{}_reasoning_steps_total", METRICS_PREFIX)).increment(steps as u64);

    if degraded > 0 {
        counter!(format!("{}_reasoning_steps_degraded_total", METRICS_PREFIX))
            .increment(degraded as u64);
    }

    histogram!(format!("{}_reasoning_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, result_count: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_retrieval_calls_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);

        gauge!(format!("{}_retrieval_results_count", METRICS_PREFIX)).set(result_count as f64);
    }
}

/// Helper to record generation metrics
pub fn record_generation(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_generation_calls_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_generation_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_generation_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
