use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_STREAMS: OnceLock<IntGauge> = OnceLock::new();
static CANCELLED_STREAMS: OnceLock<IntCounter> = OnceLock::new();
static BATCH_PASSES: OnceLock<IntCounterVec> = OnceLock::new();

/// Register collectors. Safe to call more than once.
pub fn init_metrics() {
    if let Some(counter) = get_or_register(&REQ_COUNTER, || {
        IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"],
        )
    }) {
        REGISTRY.register(Box::new(counter)).ok();
    }
    if let Some(gauge) = get_or_register(&ACTIVE_STREAMS, || {
        IntGauge::new("active_streams", "Response streams currently relaying model output")
    }) {
        REGISTRY.register(Box::new(gauge)).ok();
    }
    if let Some(counter) = get_or_register(&CANCELLED_STREAMS, || {
        IntCounter::new(
            "cancelled_streams_total",
            "Response streams abandoned before their completion record",
        )
    }) {
        REGISTRY.register(Box::new(counter)).ok();
    }
    if let Some(counter) = get_or_register(&BATCH_PASSES, || {
        IntCounterVec::new(
            prometheus::opts!("trait_mining_passes_total", "Batch trait-mining passes by outcome"),
            &["outcome"],
        )
    }) {
        REGISTRY.register(Box::new(counter)).ok();
    }
}

/// Returns a clone of a freshly created collector, `None` if it already existed.
fn get_or_register<T: Clone>(
    cell: &OnceLock<T>,
    build: impl FnOnce() -> prometheus::Result<T>,
) -> Option<T> {
    if cell.get().is_some() {
        return None;
    }
    match build() {
        // Only the caller that wins the race registers.
        Ok(metric) => cell.set(metric.clone()).ok().map(|_| metric),
        Err(e) => {
            warn!("failed to create metric: {}", e);
            None
        }
    }
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.inc();
    }
}

pub fn dec_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.dec();
    }
}

pub fn inc_cancelled_streams() {
    if let Some(counter) = CANCELLED_STREAMS.get() {
        counter.inc();
    }
}

pub fn inc_batch_pass(outcome: &str) {
    if let Some(counter) = BATCH_PASSES.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("failed to encode metrics: {}", e).into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
