//! HTTP request handlers.

use super::AppState;
use crate::metrics::PrometheusSink;
use crate::probe::RoundOutcome;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};

const INDEX_TEMPLATE: &str = r#"<html>
<head><title>Uptime Exporter</title></head>
<body>
<h1>Uptime Exporter</h1>
<p><a href='{{metrics_path}}'>Metrics</a></p>
<p><a href='/health'>Health</a></p>
</body>
</html>"#;

pub async fn handle_index(State(state): State<AppState>) -> impl IntoResponse {
    Html(INDEX_TEMPLATE.replace("{{metrics_path}}", &state.config.telemetry_path))
}

pub async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Run one probe round and expose its results.
pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    // Subscribe before checking the flag so a shutdown cannot slip in between.
    let stop = state.shutdown.subscribe();
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    // One scrape at a time
    let _permit = match state.scrape_permits.try_acquire() {
        Ok(permit) => permit,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "Another scrape is already in progress",
            )
                .into_response()
        }
    };

    let mut sink = match PrometheusSink::new() {
        Ok(sink) => sink,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let round = tokio::time::timeout(
        state.config.scrape_timeout,
        state.prober.probe_until(&mut sink, stop),
    )
    .await;

    match round {
        Ok(RoundOutcome::Completed(count)) => tracing::debug!("Scrape probed {} endpoints", count),
        Ok(RoundOutcome::Cancelled) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response()
        }
        Err(_) => {
            tracing::error!(
                "Scrape round exceeded {:?}; no metrics returned",
                state.config.scrape_timeout
            );
            return (StatusCode::SERVICE_UNAVAILABLE, "Scrape timed out").into_response();
        }
    }

    match sink.render() {
        Ok(body) => ([(header::CONTENT_TYPE, sink.content_type())], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
