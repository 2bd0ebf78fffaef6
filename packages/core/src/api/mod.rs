//! HTTP surface: health, metrics, probe administration and capacity.

pub mod health;
pub mod probes;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::metrics::AppMetrics;

pub use probes::ProbesApiState;

/// Assemble the full application router.
///
/// Every route is wrapped in the request metrics middleware; the path
/// label is the matched route template so ids never create new series.
pub fn create_router(state: Arc<ProbesApiState>, metrics: Arc<AppMetrics>) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics.clone());

    Router::new()
        .route("/health", get(health::health))
        .merge(metrics_router)
        .merge(probes::create_probes_router(state))
        .layer(middleware::from_fn_with_state(metrics, track_requests))
}

async fn render_metrics(State(metrics): State<Arc<AppMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Failed to render metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics error").into_response()
        }
    }
}

async fn track_requests(
    State(metrics): State<Arc<AppMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());
    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();

    response
}
