//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status and tip height
//! - Swap and order status transitions
//! - Watcher errors by disposition, halted loops
//! - Screener hits and FailedHard alarms

use crate::error::{Disposition, SwapperError, SwapperResult};
use crate::model::{Chain, OrderStatus, SwapStatus};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "htlc_swapper_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain"]
    ).unwrap();

    pub static ref CHAIN_TIP_HEIGHT: GaugeVec = register_gauge_vec!(
        "htlc_swapper_chain_tip_height",
        "Latest observed block height per chain",
        &["chain"]
    ).unwrap();

    pub static ref CHAIN_TICK_LATENCY: HistogramVec = register_histogram_vec!(
        "htlc_swapper_chain_tick_seconds",
        "Duration of one chain loop tick",
        &["chain"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Swap metrics
    pub static ref SWAP_TRANSITIONS: CounterVec = register_counter_vec!(
        "htlc_swapper_swap_transitions_total",
        "Swap leg status transitions",
        &["chain", "from", "to"]
    ).unwrap();

    pub static ref WATCHER_ERRORS: CounterVec = register_counter_vec!(
        "htlc_swapper_watcher_errors_total",
        "Watcher errors by disposition",
        &["chain", "disposition"]
    ).unwrap();

    pub static ref SCREENER_HITS: CounterVec = register_counter_vec!(
        "htlc_swapper_screener_hits_total",
        "Deposits rejected by the screener",
        &["chain"]
    ).unwrap();

    // Order metrics
    pub static ref ORDER_TRANSITIONS: CounterVec = register_counter_vec!(
        "htlc_swapper_order_transitions_total",
        "Order status transitions",
        &["from", "to"]
    ).unwrap();

    pub static ref FAILED_HARD: CounterVec = register_counter_vec!(
        "htlc_swapper_failed_hard_total",
        "Orders that reached FailedHard",
        &[]
    ).unwrap();

    // Loop metrics
    pub static ref LOOP_HALTED: GaugeVec = register_gauge_vec!(
        "htlc_swapper_loop_halted",
        "Loop halted on a non-recoverable error (1=halted)",
        &["loop"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "htlc_swapper_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "htlc_swapper_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SwapperResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SwapperError::Config(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SwapperError::Internal(format!("metrics server: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of the default registry
pub fn render() -> SwapperResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| SwapperError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| SwapperError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain: Chain, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[chain.as_str()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_tip_height(chain: Chain, height: u64) {
    CHAIN_TIP_HEIGHT
        .with_label_values(&[chain.as_str()])
        .set(height as f64);
}

pub fn record_tick_latency(chain: Chain, latency_secs: f64) {
    CHAIN_TICK_LATENCY
        .with_label_values(&[chain.as_str()])
        .observe(latency_secs);
}

pub fn record_swap_transition(chain: Chain, from: SwapStatus, to: SwapStatus) {
    if from != to {
        SWAP_TRANSITIONS
            .with_label_values(&[chain.as_str(), from.as_str(), to.as_str()])
            .inc();
    }
}

pub fn record_watcher_error(chain: Chain, disposition: Disposition) {
    WATCHER_ERRORS
        .with_label_values(&[chain.as_str(), disposition.as_str()])
        .inc();
}

pub fn record_screener_hit(chain: Chain) {
    SCREENER_HITS.with_label_values(&[chain.as_str()]).inc();
}

pub fn record_order_transition(from: OrderStatus, to: OrderStatus) {
    if from != to {
        ORDER_TRANSITIONS
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }
    if to == OrderStatus::FailedHard {
        FAILED_HARD.with_label_values(&[]).inc();
    }
}

pub fn record_loop_halted(name: &str, halted: bool) {
    LOOP_HALTED
        .with_label_values(&[name])
        .set(if halted { 1.0 } else { 0.0 });
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_metrics() {
        record_swap_transition(Chain::BitcoinRegtest, SwapStatus::Detected, SwapStatus::Initiated);
        record_watcher_error(Chain::EthereumLocalnet, Disposition::Ignorable);
        record_loop_halted("chain:arbitrum_localnet", true);

        let text = render().unwrap();
        assert!(text.contains("htlc_swapper_swap_transitions_total"));
        assert!(text.contains(r#"disposition="ignorable""#));
        assert!(text.contains(r#"loop="chain:arbitrum_localnet""#));
    }

    #[test]
    fn failed_hard_is_counted() {
        let before = FAILED_HARD.with_label_values(&[]).get();
        record_order_transition(OrderStatus::Filled, OrderStatus::FailedHard);
        assert!(FAILED_HARD.with_label_values(&[]).get() >= before + 1.0);
    }
}
