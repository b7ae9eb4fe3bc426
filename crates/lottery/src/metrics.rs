//! Prometheus metrics for round and ticket activity
//!
//! Counters are registered once into the default registry by
//! [`init_metrics`]; until then every `record_*` call is a no-op, which keeps
//! library users and tests free of global registration.

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::Response;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::info;

static ROUNDS_OPENED: OnceLock<IntCounter> = OnceLock::new();
static ROUNDS_CLOSED: OnceLock<IntCounter> = OnceLock::new();
static RESULTS_STORED: OnceLock<IntCounter> = OnceLock::new();
static TICKETS_ACCEPTED: OnceLock<IntCounter> = OnceLock::new();
static TICKETS_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Register all lottery counters. Calling it again is a no-op.
pub fn init_metrics() -> Result<()> {
    if ROUNDS_OPENED.get().is_some() {
        return Ok(());
    }

    ROUNDS_OPENED
        .set(register_int_counter!(
            "lottery_rounds_opened_total",
            "Total number of rounds opened"
        )?)
        .map_err(|_| anyhow::anyhow!("Failed to register ROUNDS_OPENED"))?;

    ROUNDS_CLOSED
        .set(register_int_counter!(
            "lottery_rounds_closed_total",
            "Total number of rounds closed"
        )?)
        .map_err(|_| anyhow::anyhow!("Failed to register ROUNDS_CLOSED"))?;

    RESULTS_STORED
        .set(register_int_counter!(
            "lottery_results_stored_total",
            "Total number of draw results recorded"
        )?)
        .map_err(|_| anyhow::anyhow!("Failed to register RESULTS_STORED"))?;

    TICKETS_ACCEPTED
        .set(register_int_counter!(
            "lottery_tickets_accepted_total",
            "Total number of tickets accepted"
        )?)
        .map_err(|_| anyhow::anyhow!("Failed to register TICKETS_ACCEPTED"))?;

    TICKETS_REJECTED
        .set(register_int_counter_vec!(
            "lottery_tickets_rejected_total",
            "Total number of tickets rejected, by reason",
            &["reason"]
        )?)
        .map_err(|_| anyhow::anyhow!("Failed to register TICKETS_REJECTED"))?;

    info!("Lottery metrics registered");
    Ok(())
}

pub fn record_round_opened() {
    if let Some(counter) = ROUNDS_OPENED.get() {
        counter.inc();
    }
}

pub fn record_rounds_closed(count: u64) {
    if let Some(counter) = ROUNDS_CLOSED.get() {
        counter.inc_by(count);
    }
}

pub fn record_results_stored() {
    if let Some(counter) = RESULTS_STORED.get() {
        counter.inc();
    }
}

pub fn record_ticket_accepted() {
    if let Some(counter) = TICKETS_ACCEPTED.get() {
        counter.inc();
    }
}

pub fn record_ticket_rejected(reason: &str) {
    if let Some(counter) = TICKETS_REJECTED.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler() -> Result<Response<String>, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, encoder.format_type())
            .body(metrics)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
