//! Prometheus metrics for the stowage server.
//!
//! Counters cover the upload lifecycle (files created, chunks staged,
//! completions, failures) and copy propagation. No file names or ids are
//! used as labels.
//!
//! The `/metrics` endpoint is unauthenticated; restrict it at the network
//! level when exposing the server publicly.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static FILES_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_files_created_total",
        "Total number of file records created",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_chunks_received_total",
        "Total number of chunks appended to staging files",
    )
    .expect("metric creation failed")
});

pub static BYTES_STAGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_bytes_staged_total",
        "Total bytes appended to staging files",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_uploads_completed_total",
        "Total number of files written to a store backend",
    )
    .expect("metric creation failed")
});

pub static COPIES_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_copies_failed_total",
        "Total number of failed copies to a target store",
    )
    .expect("metric creation failed")
});

pub static COMPLETION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stowage_completion_duration_seconds",
            "Time taken to move a staged file into its store",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stowage_upload_failures_total",
            "Total upload failures by stage",
        ),
        &["stage"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(FILES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STAGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COPIES_FAILED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMPLETION_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_FAILURES.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record an upload failure at `stage` ("stage", "write", "copy", ...).
pub fn record_upload_failure(stage: &str) {
    UPLOAD_FAILURES.with_label_values(&[stage]).inc();
}
