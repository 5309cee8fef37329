//! JSON API and pages served on the loopback interface.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use super::pages::{DASHBOARD_HTML, WIZARD_HTML};
use super::{ControllerState, Phase, RequestError};
use crate::config::ConfigSnapshot;
use crate::monitor::{LogEntry, LogLevel, StepStatus, Variable};

type AppState = State<Arc<ControllerState>>;

pub fn router(state: Arc<ControllerState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/config", post(submit_config))
        .route("/api/config-only", post(save_config_only))
        .route("/api/prefilled-config", get(prefilled_config))
        .route("/api/steps", get(steps))
        .route("/api/logs", get(logs))
        .route("/api/variables", get(variables))
        .route("/api/error", get(last_error))
        .route("/api/phase", get(phase))
        .route("/api/validation-error", post(validation_error))
        .route("/api/reconfigure", post(reconfigure))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(require_loopback_host))
        .with_state(state)
}

/// Rejects requests whose Host header names anything but the loopback
/// interface, which keeps DNS-rebound pages away from the API.
async fn require_loopback_host(request: Request, next: Next) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    match host {
        Some(host) if !is_loopback_host(&host) => {
            warn!(host = %host, "Rejected request with non-loopback Host header");
            (StatusCode::FORBIDDEN, "forbidden").into_response()
        }
        _ => next.run(request).await,
    }
}

fn is_loopback_host(host: &str) -> bool {
    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or_default()
    } else {
        host.rsplit_once(':').map_or(host, |(name, _)| name)
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            RequestError::Invalid(_) => StatusCode::BAD_REQUEST,
            RequestError::WrongPhase(_) => StatusCode::CONFLICT,
            RequestError::Persist(_) | RequestError::Archive(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let errors = match &self {
            RequestError::Invalid(errors) => errors.clone(),
            _ => Vec::new(),
        };
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "errors": errors,
        });
        (status, Json(body)).into_response()
    }
}

async fn index(State(state): AppState) -> Html<&'static str> {
    match state.phase() {
        Phase::CollectingConfig => Html(WIZARD_HTML),
        _ => Html(DASHBOARD_HTML),
    }
}

async fn submit_config(
    State(state): AppState,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Value>, RequestError> {
    let file = state.settings().config_file.clone();
    state.submit(ConfigSnapshot::from_map(body), true).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Configuration saved, installation started",
        "file": file,
    })))
}

async fn save_config_only(
    State(state): AppState,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Value>, RequestError> {
    let file = state.settings().config_file.clone();
    state.submit(ConfigSnapshot::from_map(body), false).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Configuration saved successfully. You can start the installation when ready.",
        "file": file,
    })))
}

async fn prefilled_config(State(state): AppState) -> Json<Value> {
    let prefilled = state.prefilled();
    debug!(entries = prefilled.len(), "Serving pre-filled configuration");
    Json(json!({
        "config": prefilled.to_prefill(),
        "oneShot": state.is_one_shot(),
        "hasPrefilled": !prefilled.is_empty(),
    }))
}

async fn steps(State(state): AppState) -> Json<BTreeMap<String, StepStatus>> {
    let steps = state
        .monitor()
        .steps()
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect();
    Json(steps)
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
    level: Option<String>,
    source: Option<String>,
}

async fn logs(State(state): AppState, Query(params): Query<LogQuery>) -> Json<Vec<LogEntry>> {
    let level = params.level.as_deref().and_then(LogLevel::parse);
    let mut entries: Vec<LogEntry> = state
        .monitor()
        .logs()
        .into_iter()
        .filter(|entry| level.map_or(true, |level| entry.level == level))
        .filter(|entry| {
            params
                .source
                .as_deref()
                .map_or(true, |source| entry.source == source)
        })
        .collect();

    if let Some(limit) = params.limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    Json(entries)
}

async fn variables(State(state): AppState) -> Json<BTreeMap<String, Variable>> {
    Json(state.monitor().variables())
}

async fn last_error(State(state): AppState) -> Json<Value> {
    let body = match state.last_error() {
        Some(err) => json!({ "error": err.message, "errorType": err.category }),
        None => json!({ "error": "", "errorType": "" }),
    };
    Json(body)
}

async fn phase(State(state): AppState) -> Json<Value> {
    Json(json!({
        "phase": state.phase(),
        "oneShot": state.is_one_shot(),
        "validationErrors": state.validation_errors(),
    }))
}

#[derive(Debug, Deserialize)]
struct ValidationReport {
    #[serde(default)]
    errors: Vec<String>,
}

async fn validation_error(
    State(state): AppState,
    Json(report): Json<ValidationReport>,
) -> Result<Json<Value>, RequestError> {
    state.report_validation_errors(report.errors)?;
    Ok(Json(json!({ "status": "error_logged" })))
}

async fn reconfigure(State(state): AppState) -> Result<Json<Value>, RequestError> {
    let archived = state.reconfigure()?;
    Ok(Json(json!({
        "success": true,
        "archived": archived.map(|p| p.display().to_string()),
    })))
}
