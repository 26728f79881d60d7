//! HTTP front end: exposition, health, config and supervisor status.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tracing::{debug, error, warn};

use mistex_core::{Exporter, MistSource, PrometheusSink, SupervisedSite};

const INDEX: &str = r#"<html>
<head><title>Mist Exporter</title></head>
<body>
<h1>Mist Exporter</h1>
<ul>
<li><a href="/metrics">Metrics</a></li>
<li><a href="/health">Health</a></li>
<li><a href="/config">Config</a></li>
<li><a href="/sites">Sites</a></li>
</ul>
</body>
</html>
"#;

pub struct AppState<S> {
    pub exporter: Exporter<S>,
    pub sink: Arc<PrometheusSink>,
    /// Effective configuration, API key masked.
    pub config_yaml: Arc<str>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            exporter: self.exporter.clone(),
            sink: Arc::clone(&self.sink),
            config_yaml: Arc::clone(&self.config_yaml),
        }
    }
}

pub fn router<S: MistSource>(state: AppState<S>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics::<S>))
        .route("/health", get(health::<S>))
        .route("/config", get(config::<S>))
        .route("/sites", get(sites::<S>))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

/// Run one scrape, then render the whole registry. An aborted scrape is
/// reported through `mist_scrape_success`; streamed metrics are still
/// served with 200.
async fn metrics<S: MistSource>(State(state): State<AppState<S>>) -> Response {
    match state.exporter.collect().await {
        Ok(report) => {
            debug!(
                sites = report.sites,
                failed = report.failed,
                abandoned = report.abandoned,
                "scrape served"
            );
            state.sink.record_scrape(true);
        }
        Err(e) => {
            warn!(error = %e, "scrape aborted");
            state.sink.record_scrape(false);
        }
    }

    match state.sink.render() {
        Ok(body) => ([(header::CONTENT_TYPE, state.sink.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health<S: MistSource>(State(state): State<AppState<S>>) -> (StatusCode, &'static str) {
    if state.exporter.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn config<S: MistSource>(State(state): State<AppState<S>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/yaml; charset=utf-8")],
        state.config_yaml.to_string(),
    )
        .into_response()
}

async fn sites<S: MistSource>(State(state): State<AppState<S>>) -> Json<Vec<SupervisedSite>> {
    Json(state.exporter.supervised_sites())
}
