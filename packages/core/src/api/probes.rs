//! Load probe administration endpoints.
//!
//! Routes:
//! - `POST   /probes`            register a probe definition
//! - `GET    /probes`            list definitions in selection order
//! - `GET    /probes/active`     the resolved active probe
//! - `GET    /probes/:id`        one definition
//! - `PATCH  /probes/:id`        partial update
//! - `DELETE /probes/:id`        hard delete
//! - `POST   /probes/:id/try`    run the probe function once (admin only)
//! - `GET    /capacity`          latest admission capacity
//!
//! The manual trigger requires an `X-Api-Key` header equal to the
//! configured admin key. Without a configured key it is always refused.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::probe::literal::parse_arguments;
use crate::probe::{Capability, ProbeDefinition, ProbeDraft, ProbeInvoker, ResolvedProbe, TriggerError};
use crate::repository::ProbeRepository;
use crate::scheduler::{CapacityLedger, CapacitySnapshot};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for the probe routes.
pub struct ProbesApiState {
    pub repository: Arc<ProbeRepository>,
    pub invoker: Arc<ProbeInvoker>,
    pub ledger: Arc<RwLock<CapacityLedger>>,
    pub admin_key: Option<String>,
}

type ApiError = (StatusCode, Json<Value>);

pub fn create_probes_router(state: Arc<ProbesApiState>) -> Router {
    Router::new()
        .route("/probes", post(create_probe).get(list_probes))
        .route("/probes/active", get(active_probe))
        .route(
            "/probes/:id",
            get(get_probe).patch(update_probe).delete(delete_probe),
        )
        .route("/probes/:id/try", post(try_probe))
        .route("/capacity", get(capacity))
        .with_state(state)
}

// ---- Request / response shapes ----

#[derive(Debug, Deserialize)]
pub struct CreateProbeRequest {
    pub name: String,
    pub target_function: String,
    pub active: Option<bool>,
    pub priority: Option<i64>,
    pub call_arguments: Option<String>,
    pub pre_delay_seconds: Option<i64>,
    pub post_delay_seconds: Option<i64>,
    pub scale_factor: Option<f64>,
    pub debug_logging: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProbeRequest {
    pub name: Option<String>,
    pub target_function: Option<String>,
    pub active: Option<bool>,
    pub priority: Option<i64>,
    pub call_arguments: Option<String>,
    pub pre_delay_seconds: Option<i64>,
    pub post_delay_seconds: Option<i64>,
    pub scale_factor: Option<f64>,
    pub debug_logging: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CreateProbeResponse {
    pub id: i64,
}

// ---- Helpers ----

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() })))
}

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Load probe not found" })))
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    tracing::error!("Probe store failure: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

fn apply_update(draft: &mut ProbeDraft, body: UpdateProbeRequest) {
    if let Some(name) = body.name {
        draft.name = name;
    }
    if let Some(target_function) = body.target_function {
        draft.target_function = target_function;
    }
    if let Some(active) = body.active {
        draft.active = active;
    }
    if body.priority.is_some() {
        draft.priority = body.priority;
    }
    if let Some(call_arguments) = body.call_arguments {
        draft.call_arguments = call_arguments;
    }
    if let Some(pre_delay_seconds) = body.pre_delay_seconds {
        draft.pre_delay_seconds = pre_delay_seconds;
    }
    if let Some(post_delay_seconds) = body.post_delay_seconds {
        draft.post_delay_seconds = post_delay_seconds;
    }
    if let Some(scale_factor) = body.scale_factor {
        draft.scale_factor = scale_factor;
    }
    if let Some(debug_logging) = body.debug_logging {
        draft.debug_logging = debug_logging;
    }
}

/// Reject drafts the admission loop could never evaluate.
fn validate(draft: &ProbeDraft) -> Result<(), String> {
    if draft.name.trim().is_empty() {
        return Err("name must not be empty".into());
    }
    if draft.target_function.trim().is_empty() {
        return Err("target_function must not be empty".into());
    }
    if draft.pre_delay_seconds < 0 || draft.post_delay_seconds < 0 {
        return Err("delays must be zero or positive".into());
    }
    if !draft.scale_factor.is_finite() {
        return Err("scale_factor must be a finite number".into());
    }
    parse_arguments(&draft.call_arguments).map_err(|e| e.to_string())?;
    Ok(())
}

fn capability(headers: &HeaderMap, admin_key: Option<&str>) -> Capability {
    let presented = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    match (admin_key, presented) {
        (Some(expected), Some(presented)) if expected == presented => Capability::Administrator,
        _ => Capability::Standard,
    }
}

// ---- Handlers ----

/// `POST /probes`
pub async fn create_probe(
    State(state): State<Arc<ProbesApiState>>,
    Json(body): Json<CreateProbeRequest>,
) -> Result<(StatusCode, Json<CreateProbeResponse>), ApiError> {
    let mut draft = ProbeDraft::new(body.name, body.target_function);
    apply_update(
        &mut draft,
        UpdateProbeRequest {
            name: None,
            target_function: None,
            active: body.active,
            priority: body.priority,
            call_arguments: body.call_arguments,
            pre_delay_seconds: body.pre_delay_seconds,
            post_delay_seconds: body.post_delay_seconds,
            scale_factor: body.scale_factor,
            debug_logging: body.debug_logging,
        },
    );
    validate(&draft).map_err(bad_request)?;

    let id = state.repository.create(&draft).await.map_err(internal)?;
    tracing::info!(id, name = %draft.name, "Load probe created");

    Ok((StatusCode::CREATED, Json(CreateProbeResponse { id })))
}

/// `GET /probes`
pub async fn list_probes(
    State(state): State<Arc<ProbesApiState>>,
) -> Result<Json<Vec<ProbeDefinition>>, ApiError> {
    let probes = state.repository.list().await.map_err(internal)?;
    Ok(Json(probes))
}

/// `GET /probes/active`
pub async fn active_probe(
    State(state): State<Arc<ProbesApiState>>,
) -> Result<Json<ResolvedProbe>, ApiError> {
    match state.repository.active_resolved().await.map_err(internal)? {
        Some(resolved) => Ok(Json(resolved.as_ref().clone())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No active load probe" })),
        )),
    }
}

/// `GET /probes/:id`
pub async fn get_probe(
    State(state): State<Arc<ProbesApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<ProbeDefinition>, ApiError> {
    state
        .repository
        .get(id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(not_found)
}

/// `PATCH /probes/:id`
pub async fn update_probe(
    State(state): State<Arc<ProbesApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateProbeRequest>,
) -> Result<StatusCode, ApiError> {
    let current = state
        .repository
        .get(id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    let mut draft = ProbeDraft::from(&current);
    apply_update(&mut draft, body);
    validate(&draft).map_err(bad_request)?;

    if state.repository.update(id, &draft).await.map_err(internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

/// `DELETE /probes/:id`
pub async fn delete_probe(
    State(state): State<Arc<ProbesApiState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.repository.delete(id).await.map_err(internal)? {
        tracing::info!(id, "Load probe deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

/// `POST /probes/:id/try`
pub async fn try_probe(
    State(state): State<Arc<ProbesApiState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let capability = capability(&headers, state.admin_key.as_deref());
    if capability != Capability::Administrator {
        return Err(trigger_failure(TriggerError::Unauthorized));
    }

    let definition = state
        .repository
        .get(id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    let mut conn = state.repository.pool().acquire().await.map_err(internal)?;

    match state.invoker.try_call(&mut conn, &definition, capability).await {
        Ok(value) => {
            tracing::info!(probe = %definition.name, %value, "Manual probe trigger returned");
            Ok(Json(json!({
                "outcome": "returned",
                "message": format!("Function returned {}", value),
                "value": value,
            })))
        }
        Err(err) => Err(trigger_failure(err)),
    }
}

fn trigger_failure(err: TriggerError) -> ApiError {
    match err {
        TriggerError::Unauthorized => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": err.to_string() })),
        ),
        TriggerError::Raised(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "outcome": "raised", "error": err.to_string() })),
        ),
        TriggerError::NoResult => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "outcome": "no_result", "error": err.to_string() })),
        ),
        TriggerError::Configuration(_) => bad_request(err.to_string()),
    }
}

/// `GET /capacity`
pub async fn capacity(State(state): State<Arc<ProbesApiState>>) -> Json<CapacitySnapshot> {
    Json(state.ledger.read().await.snapshot())
}
