use super::*;

use http::{HeaderMap, HeaderValue};
pub(super) use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;

/// Axum state for the admin service.
pub(super) struct AdminState {
    /// State for the health check endpoints
    pub health: HealthState,
    /// State for the metrics endpoint
    pub metrics: MetricsState,
}

/// Tracks the health of the reverse proxy for load balancers and container orchestration systems.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct HealthState {
    /// Indicates that the admin service is serving requests and the process has not entered an unrecoverable
    /// state.
    pub live: bool,
    /// Indicates that the gate was constructed and the reverse proxy has been launched.
    ///
    /// Once true, it will remain true for the lifetime of the process.
    pub started: bool,
    /// Indicates that the reverse proxy is ready to receive requests.
    ///
    /// Once true, it will remain true for the lifetime of the process.
    pub ready: bool,
}

/// The default probe handler sits at the apex of the health check resource and performs a liveness check.
///
/// See [`probe_handler`].
pub(super) async fn default_probe_handler(
    State(state): State<Arc<Mutex<AdminState>>>,
) -> (StatusCode, Json<HealthState>) {
    probe_handler(State(state), Path(String::from("live"))).await
}

/// The probe handler returns a JSON [`HealthState`] with a status code that depends on the probe type requested.
///
/// - live - Always returns an HTTP OK status if the endpoint is serving requests.
/// - started - Returns an HTTP OK status once the reverse proxy has been launched and a Service Unavailable
///     status otherwise.
/// - ready - Returns an HTTP OK status once the reverse proxy is ready to receive requests and a Service
///     Unavailable status otherwise.
pub(super) async fn probe_handler(
    State(state): State<Arc<Mutex<AdminState>>>,
    Path(probe): Path<String>,
) -> (StatusCode, Json<HealthState>) {
    let health = match state.lock() {
        Ok(state) => state.health,
        Err(poisoned) => poisoned.into_inner().health,
    };
    let status = match probe.as_str() {
        "live" => StatusCode::OK,
        "started" if health.started => StatusCode::OK,
        "ready" if health.ready => StatusCode::OK,
        "started" | "ready" => StatusCode::SERVICE_UNAVAILABLE,
        // hint that the wrong probe value was sent
        _ => StatusCode::NOT_FOUND,
    };
    (status, Json(health))
}

/// The metrics handler is a crawlable endpoint that returns Prometheus metrics.
pub(super) async fn metrics_handler(
    State(state): State<Arc<Mutex<AdminState>>>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let handle = match state.lock() {
        Ok(state) => state.metrics.prometheus_handle.clone(),
        Err(poisoned) => poisoned.into_inner().metrics.prometheus_handle.clone(),
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );

    // Histograms are buffered until upkeep drains them.
    handle.run_upkeep();
    let body: Vec<u8> = handle.render().into();

    (StatusCode::OK, headers, body)
}

/// State for the metrics endpoint
#[derive(Clone)]
pub(super) struct MetricsState {
    prometheus_handle: PrometheusHandle,
}

impl MetricsState {
    /// Creates a new [`MetricsState`] with a Prometheus recorder.
    pub(super) fn new(prometheus_handle: PrometheusHandle) -> Self {
        Self { prometheus_handle }
    }
}

impl fmt::Debug for MetricsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prometheus")
            .field(
                "prometheus_handle",
                &format_args!("PrometheusHandle {{ ... }}"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(started: bool, ready: bool) -> Arc<Mutex<AdminState>> {
        Arc::new(Mutex::new(AdminState {
            health: HealthState {
                live: true,
                started,
                ready,
            },
            metrics: MetricsState::new(PrometheusBuilder::new().build_recorder().handle()),
        }))
    }

    #[tokio::test]
    async fn test_probes_before_start() {
        let state = state(false, false);
        let (status, _) = default_probe_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = probe_handler(State(state.clone()), Path(String::from("started"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, Json(health)) =
            probe_handler(State(state.clone()), Path(String::from("ready"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!health.ready);
        let (status, _) = probe_handler(State(state), Path(String::from("bogus"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_probes_after_start() {
        let state = state(true, true);
        let (status, _) = probe_handler(State(state.clone()), Path(String::from("started"))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = probe_handler(State(state), Path(String::from("ready"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let (status, headers, _) = metrics_handler(State(state(true, true))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers
            .get(http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }
}
