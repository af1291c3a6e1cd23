//! Probe and metrics endpoints
//!
//! `/healthz` answers as long as the process runs, `/readyz` once this
//! replica holds the lease and its watch loops are started, and `/metrics`
//! serves watch event counters and the instance phase gauge.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Labels for watch event metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct EventLabels {
    /// Resource kind of the watch stream
    pub kind: String,
    /// add, update or delete
    pub action: String,
}

impl prometheus_client::encoding::EncodeLabelSet for EventLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("action", self.action.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for instance phase metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl prometheus_client::encoding::EncodeLabelSet for PhaseLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Operator metrics, registered once per process
pub struct Metrics {
    /// Handled watch events
    pub events_total: Family<EventLabels, Counter>,
    /// Watch events whose handler returned an error
    pub event_errors_total: Family<EventLabels, Counter>,
    /// Time spent handling a watch event
    pub event_duration_seconds: Family<EventLabels, Histogram>,
    /// Observed instances by phase
    pub instances_total: Family<PhaseLabels, Gauge>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let events_total = Family::<EventLabels, Counter>::default();
        registry.register(
            "elasticsearch_operator_events",
            "Total number of handled watch events",
            events_total.clone(),
        );

        let event_errors_total = Family::<EventLabels, Counter>::default();
        registry.register(
            "elasticsearch_operator_event_errors",
            "Total number of watch events that failed to be handled",
            event_errors_total.clone(),
        );

        // Bounded waits can hold a handler for up to half an hour
        let event_duration_seconds =
            Family::<EventLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 20))
            });
        registry.register(
            "elasticsearch_operator_event_duration_seconds",
            "Duration of watch event handling in seconds",
            event_duration_seconds.clone(),
        );

        let instances_total = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "elasticsearch_operator_instances",
            "Number of observed Elasticsearch instances by phase",
            instances_total.clone(),
        );

        Self {
            events_total,
            event_errors_total,
            event_duration_seconds,
            instances_total,
            registry,
        }
    }

    fn labels(kind: &str, action: &str) -> EventLabels {
        EventLabels {
            kind: kind.to_string(),
            action: action.to_string(),
        }
    }

    /// Record a handled event
    pub fn record_event(&self, kind: &str, action: &str, duration_secs: f64) {
        let labels = Self::labels(kind, action);
        self.events_total.get_or_create(&labels).inc();
        self.event_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed event handler
    pub fn record_error(&self, kind: &str, action: &str) {
        self.event_errors_total
            .get_or_create(&Self::labels(kind, action))
            .inc();
    }

    /// Set the number of instances in a phase
    pub fn set_instances_by_phase(&self, phase: &str, count: i64) {
        let labels = PhaseLabels {
            phase: phase.to_string(),
        };
        self.instances_total.get_or_create(&labels).set(count);
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// State behind the probe endpoints
pub struct HealthState {
    /// Whether the watch loops are running
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
