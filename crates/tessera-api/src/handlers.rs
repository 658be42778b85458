//! Route handler functions for all API endpoints.
//!
//! Public handlers take the caller from [`CallerId`]; internal handlers are
//! reached only behind the bearer-token middleware.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tessera_action::{AgentOutcome, DuplicateChoice, StatusChange, SweepReport};
use tessera_core::events::ActionCreatedEvent;
use tessera_core::types::{
    Action, ActionFilter, ActionPreview, ActionStatus, ActionType, ApprovalReplyEvent,
    NewAction, Payload, PreviewStatus, MAX_BATCH_IDS,
};

use crate::auth::CallerId;
use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Comma-separated statuses.
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub action_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<Uuid>,
}

/// Body of `PATCH /actions/{id}`: exactly one of the two fields.
#[derive(Debug, Deserialize)]
pub struct PatchActionRequest {
    pub status: Option<ActionStatus>,
    #[serde(rename = "type")]
    pub action_type: Option<ActionType>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDuplicateRequest {
    pub choice: DuplicateChoice,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutPreviewRequest {
    pub status: PreviewStatus,
    #[serde(default)]
    pub fields: Payload,
    pub generated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub database: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionListResponse {
    pub actions: Vec<Action>,
    pub count: usize,
}

impl From<Vec<Action>> for ActionListResponse {
    fn from(actions: Vec<Action>) -> Self {
        Self {
            count: actions.len(),
            actions,
        }
    }
}

/// An outcome label plus the action as it is now.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutcomeResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl OutcomeResponse {
    fn new(outcome: &str, action: Option<Action>) -> Self {
        Self {
            outcome: outcome.to_string(),
            action,
        }
    }
}

fn parse_filter(params: &ListParams) -> Result<ActionFilter, ApiError> {
    let statuses = match params.status.as_deref() {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<ActionStatus>().map_err(ApiError::BadRequest))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let action_type = params
        .action_type
        .as_deref()
        .map(|t| t.parse::<ActionType>().map_err(ApiError::BadRequest))
        .transpose()?;
    Ok(ActionFilter {
        statuses,
        action_type,
        limit: params.limit,
    })
}

// =============================================================================
// Public endpoints
// =============================================================================

/// GET /health - store reachability and version.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.orchestrator.database().ping() {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            "unreachable"
        }
    };
    Json(HealthResponse {
        status: if database == "ok" { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        database: database.to_string(),
    })
}

/// GET /actions - the caller's actions, newest first.
pub async fn list_actions(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Query(params): Query<ListParams>,
) -> Result<Json<ActionListResponse>, ApiError> {
    let filter = parse_filter(&params)?;
    let actions = state.orchestrator.actions().list(&user_id, &filter)?;
    Ok(Json(actions.into()))
}

/// GET /actions/{id}
pub async fn get_action(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<Action>, ApiError> {
    Ok(Json(state.orchestrator.actions().get(&user_id, id)?))
}

/// POST /actions/batch - up to 50 ids; foreign and unknown ids are dropped.
pub async fn batch_actions(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(req): Json<BatchRequest>,
) -> Result<Json<ActionListResponse>, ApiError> {
    if req.ids.len() > MAX_BATCH_IDS {
        return Err(ApiError::BadRequest(format!(
            "At most {} ids per batch",
            MAX_BATCH_IDS
        )));
    }
    let actions = state.orchestrator.actions().batch_get(&user_id, &req.ids)?;
    Ok(Json(actions.into()))
}

/// DELETE /actions/{id}
pub async fn delete_action(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.actions().delete(&user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /actions/{id} - manual status change or type change.
pub async fn patch_action(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
    Json(req): Json<PatchActionRequest>,
) -> Result<Json<StatusChange>, ApiError> {
    let actions = state.orchestrator.actions();
    match (req.status, req.action_type) {
        (Some(status), None) => Ok(Json(actions.set_status(&user_id, id, status).await?)),
        (None, Some(action_type)) => {
            let action = actions.update_type(&user_id, id, action_type)?;
            Ok(Json(StatusChange {
                action,
                applied: true,
            }))
        }
        _ => Err(ApiError::BadRequest(
            "Provide exactly one of \"status\" or \"type\"".to_string(),
        )),
    }
}

/// POST /actions/{id}/execute - execute an action awaiting approval.
pub async fn execute_action(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let actions = state.orchestrator.actions();
    let outcome = actions.execute(&user_id, id).await?;
    let action = actions.get(&user_id, id)?;
    Ok(Json(OutcomeResponse::new(outcome.label(), Some(action))))
}

/// POST /actions/{id}/resolve-duplicate
pub async fn resolve_duplicate(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveDuplicateRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state
        .orchestrator
        .duplicates()
        .resolve(&user_id, id, req.choice)
        .await?;
    let action = state.orchestrator.actions().get(&user_id, id)?;
    Ok(Json(OutcomeResponse::new(outcome.label(), Some(action))))
}

/// GET /actions/{id}/preview - `null` until the producer has written one.
pub async fn get_preview(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<ActionPreview>>, ApiError> {
    Ok(Json(state.orchestrator.previews().get(&user_id, id)?))
}

// =============================================================================
// Internal endpoints
// =============================================================================

/// POST /internal/actions - create a pending action.
pub async fn create_action(
    State(state): State<AppState>,
    Json(new): Json<NewAction>,
) -> Result<(StatusCode, Json<Action>), ApiError> {
    let action = state.orchestrator.actions().create(new).await?;
    Ok((StatusCode::CREATED, Json(action)))
}

/// POST /internal/events/action-created
pub async fn action_created(
    State(state): State<AppState>,
    Json(event): Json<ActionCreatedEvent>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state
        .orchestrator
        .dispatcher()
        .on_action_created(&event, None)
        .await?;
    Ok(Json(OutcomeResponse::new(outcome.label(), None)))
}

/// POST /internal/events/action-created/{type}
pub async fn action_created_for_type(
    State(state): State<AppState>,
    Path(action_type): Path<String>,
    Json(event): Json<ActionCreatedEvent>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let action_type = action_type
        .parse::<ActionType>()
        .map_err(ApiError::BadRequest)?;
    let outcome = state
        .orchestrator
        .dispatcher()
        .on_action_created(&event, Some(action_type))
        .await?;
    Ok(Json(OutcomeResponse::new(outcome.label(), None)))
}

/// POST /internal/sweep/retry-pending
pub async fn retry_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.orchestrator.sweeper().sweep().await?))
}

/// POST /internal/events/approval-reply
pub async fn approval_reply(
    State(state): State<AppState>,
    Json(event): Json<ApprovalReplyEvent>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state.orchestrator.approvals().process(&event).await?;
    Ok(Json(OutcomeResponse::new(outcome.label(), None)))
}

/// PUT /internal/actions/{id}/preview - preview producer.
pub async fn put_preview(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PutPreviewRequest>,
) -> Result<StatusCode, ApiError> {
    let preview = ActionPreview {
        action_id: id,
        status: req.status,
        fields: req.fields,
        generated_at: req.generated_at.unwrap_or_else(Utc::now),
    };
    state.orchestrator.previews().put(&preview)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /internal/actions/{id}/result - outcome for a published action.
pub async fn record_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(outcome): Json<AgentOutcome>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state.orchestrator.actions().record_result(id, outcome).await?;
    let action = state
        .orchestrator
        .store()
        .get(id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(OutcomeResponse::new(outcome.label(), action)))
}
