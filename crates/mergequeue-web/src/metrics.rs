//! Prometheus metrics for the merge-train scheduler's HTTP surface.

use axum::extract::State;
use axum::response::IntoResponse;
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use crate::state::AppState;

pub struct MetricsCollector {
    registry: Registry,

    webhook_requests_total: CounterVec,
    webhook_request_duration_seconds: HistogramVec,
    trains_refreshed_total: CounterVec,
    train_cars: GaugeVec,
    train_waiting_pulls: GaugeVec,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let webhook_requests_total = CounterVec::new(
            Opts::new(
                "mergequeue_webhook_requests_total",
                "Total inbound webhook requests by operation and outcome",
            ),
            &["operation", "status"],
        )?;

        let webhook_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mergequeue_webhook_request_duration_seconds",
                "Webhook request handling duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["operation"],
        )?;

        let trains_refreshed_total = CounterVec::new(
            Opts::new("mergequeue_trains_refreshed_total", "Trains processed by refresh sweeps"),
            &["repo"],
        )?;

        let train_cars = GaugeVec::new(
            Opts::new("mergequeue_train_cars", "Current number of cars in a train"),
            &["repo", "target_ref"],
        )?;

        let train_waiting_pulls = GaugeVec::new(
            Opts::new(
                "mergequeue_train_waiting_pulls",
                "Current number of pulls waiting to be batched in a train",
            ),
            &["repo", "target_ref"],
        )?;

        registry.register(Box::new(webhook_requests_total.clone()))?;
        registry.register(Box::new(webhook_request_duration_seconds.clone()))?;
        registry.register(Box::new(trains_refreshed_total.clone()))?;
        registry.register(Box::new(train_cars.clone()))?;
        registry.register(Box::new(train_waiting_pulls.clone()))?;

        Ok(Self {
            registry,
            webhook_requests_total,
            webhook_request_duration_seconds,
            trains_refreshed_total,
            train_cars,
            train_waiting_pulls,
        })
    }

    pub fn record_webhook_request(&self, operation: &str, status: u16, duration_seconds: f64) {
        self.webhook_requests_total
            .with_label_values(&[operation, &status.to_string()])
            .inc();
        self.webhook_request_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    pub fn record_train_refreshed(&self, repo: &str) {
        self.trains_refreshed_total.with_label_values(&[repo]).inc();
    }

    pub fn set_train_cars(&self, repo: &str, target_ref: &str, count: usize) {
        self.train_cars
            .with_label_values(&[repo, target_ref])
            .set(count as f64);
    }

    pub fn set_train_waiting_pulls(&self, repo: &str, target_ref: &str, count: usize) {
        self.train_waiting_pulls
            .with_label_values(&[repo, target_ref])
            .set(count as f64);
    }

    pub fn gather(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("failed to construct metrics registry")
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.gather() {
        Ok(body) => (
            axum::http::StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(_) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            String::new(),
        ),
    }
}
