use axum::routing::get;
use axum::Router;

use crate::metrics;

/// Builds the ambient HTTP surface: Prometheus metrics and a liveness
/// probe. Neither is part of the syncer's own interface; both are carried
/// because the object-store control loop needs somewhere for the
/// scheduler/kubelet to check in on it.
pub(crate) fn build() -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics))
        .route("/healthz", get(healthz))
}

/// healthz handler
#[allow(clippy::unused_async)] // require by axum
async fn healthz() -> &'static str {
    "healthy"
}
