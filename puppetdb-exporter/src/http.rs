/**
 * EXPORT SURFACE - HTTP server scraped by Prometheus
 *
 * ROUTES :
 * - GET /            landing page linking to the telemetry path
 * - GET /metrics     latest snapshot in Prometheus text format (path configurable)
 * - GET /health      exporter self-observation (JSON)
 *
 * The metrics route answers 503 until a first snapshot has been published.
 * In on-scrape mode the request itself runs the aggregation cycle.
 */

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tracing::error;

use crate::exposition::{self, BuildInfo};
use crate::health::ExporterHealth;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub build: BuildInfo,
    pub telemetry_path: String,
}

pub fn build_router(app_state: AppState) -> Router {
    let telemetry_path = app_state.telemetry_path.clone();
    Router::new()
        .route("/", get(index))
        .route("/health", get(get_health))
        .route(&telemetry_path, get(get_metrics))
        .with_state(app_state)
}

// GET / (landing page)
async fn index(State(app): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>Prometheus PuppetDB Exporter v{version}</title></head>\n<body>\n\
         <h1>Prometheus PuppetDB Exporter {version}</h1>\n\
         <p><a href='{path}'>Metrics</a></p>\n</body>\n</html>\n",
        version = app.build.version,
        path = app.telemetry_path,
    ))
}

// GET /metrics (snapshot courant)
async fn get_metrics(State(app): State<AppState>) -> Response {
    let Some(published) = app.scheduler.snapshot_for_scrape().await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no snapshot computed yet\n").into_response();
    };

    match exposition::render(&published.snapshot, &app.build) {
        Ok(body) => ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, cycle = published.cycle, "failed to render metrics");
            let body = format!("failed to render metrics: {e}\n");
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

// GET /health
async fn get_health(State(app): State<AppState>) -> Json<ExporterHealth> {
    Json(app.scheduler.health().get_health(app.scheduler.store()))
}
