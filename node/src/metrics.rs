//! # Prometheus Metrics
//!
//! Operational metrics for the gateway node, scraped at `/metrics` on the
//! dedicated metrics port. Everything lives in its own
//! [`prometheus::Registry`] under the `ussd` namespace.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metric handles shared by the request handlers.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Dialogs that got past `start` and hold a session.
    pub sessions_started_total: IntCounter,
    /// Terminal replies, labelled by outcome.
    pub dialogs_ended_total: IntCounterVec,
    /// Live sessions in the store.
    pub active_sessions: IntGauge,
    /// Requests refused by a rate limit, labelled by operation class.
    pub rate_limited_total: IntCounterVec,
    /// Wallet callbacks, labelled `linked`, `already_linked` or `rejected`.
    pub wallet_callbacks_total: IntCounterVec,
    /// Request latency in seconds, labelled by route.
    pub request_latency_seconds: HistogramVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("ussd".into()), None)
            .expect("failed to create prometheus registry");

        let sessions_started_total = IntCounter::new(
            "sessions_started_total",
            "Total number of dialogs that opened a session",
        )
        .expect("metric creation");
        registry
            .register(Box::new(sessions_started_total.clone()))
            .expect("metric registration");

        let dialogs_ended_total = IntCounterVec::new(
            Opts::new("dialogs_ended_total", "Terminal replies by dialog outcome"),
            &["outcome"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(dialogs_ended_total.clone()))
            .expect("metric registration");

        let active_sessions = IntGauge::new("active_sessions", "Sessions currently in the store")
            .expect("metric creation");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("metric registration");

        let rate_limited_total = IntCounterVec::new(
            Opts::new("rate_limited_total", "Requests refused by a rate limit"),
            &["class"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(rate_limited_total.clone()))
            .expect("metric registration");

        let wallet_callbacks_total = IntCounterVec::new(
            Opts::new("wallet_callbacks_total", "Wallet-linking callbacks by result"),
            &["result"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(wallet_callbacks_total.clone()))
            .expect("metric registration");

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_latency_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["route"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(request_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            sessions_started_total,
            dialogs_ended_total,
            active_sessions,
            rate_limited_total,
            wallet_callbacks_total,
            request_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_namespaced_metrics() {
        let metrics = NodeMetrics::new();
        metrics.sessions_started_total.inc();
        metrics
            .dialogs_ended_total
            .with_label_values(&["completed"])
            .inc();
        metrics.active_sessions.set(3);

        let body = metrics.encode().unwrap();
        assert!(body.contains("ussd_sessions_started_total 1"));
        assert!(body.contains("ussd_dialogs_ended_total{outcome=\"completed\"} 1"));
        assert!(body.contains("ussd_active_sessions 3"));
    }

    #[tokio::test]
    async fn handler_serves_text_format() {
        use http_body_util::BodyExt;

        let metrics = Arc::new(NodeMetrics::new());
        metrics.rate_limited_total.with_label_values(&["pin"]).inc();

        let response = metrics_handler(axum::extract::State(metrics))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("ussd_rate_limited_total{class=\"pin\"} 1"));
    }
}
