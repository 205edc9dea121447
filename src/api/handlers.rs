use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::engine::CancellationAck;
use crate::protocol::AckOutcome;
use crate::types::{CancellationIntent, Element, ElementId};

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub workflow_name: String,
}

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub agent_id: String,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub agent_id: String,
    #[serde(default = "default_succeeded")]
    pub succeeded: bool,
}

fn default_succeeded() -> bool {
    true
}

#[derive(Serialize)]
pub struct AcknowledgeResponse {
    pub element: Element,
    pub already_acknowledged: bool,
}

impl From<AckOutcome> for AcknowledgeResponse {
    fn from(outcome: AckOutcome) -> Self {
        match outcome {
            AckOutcome::Acknowledged(element) => Self {
                element,
                already_acknowledged: false,
            },
            AckOutcome::AlreadyAcknowledged(element) => Self {
                element,
                already_acknowledged: true,
            },
        }
    }
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn enqueue_element(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<Element>, ApiError> {
    if request.workflow_name.trim().is_empty() {
        return Err(ApiError::BadRequest("workflow_name must not be blank".to_string()));
    }

    let element = Element::new(request.workflow_name);
    state.elements.put(&element).await?;
    log::debug!("Enqueued element {} for {}", element.id, element.workflow_name);
    Ok(Json(element))
}

pub async fn get_element(
    State(state): State<AppState>,
    Path(id): Path<ElementId>,
) -> Result<Json<Element>, ApiError> {
    let element = state
        .elements
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Element {}", id)))?;
    Ok(Json(element))
}

pub async fn request_cancellation(
    State(state): State<AppState>,
    Path(workflow_name): Path<String>,
) -> Result<Json<CancellationAck>, ApiError> {
    let ack = state
        .cancellation
        .request_workflow_cancellation(&workflow_name)
        .await?;
    Ok(Json(ack))
}

pub async fn get_cancellation(
    State(state): State<AppState>,
    Path(workflow_name): Path<String>,
) -> Result<Json<CancellationIntent>, ApiError> {
    let intent = state
        .cancellation
        .get_intent(&workflow_name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Cancellation of {}", workflow_name)))?;
    Ok(Json(intent))
}

pub async fn claim_element(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Option<Element>>, ApiError> {
    Ok(Json(state.agents.claim(&agent_id).await?))
}

pub async fn poll_cancellations(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<Element>>, ApiError> {
    Ok(Json(state.agents.poll_cancellations(&agent_id).await?))
}

pub async fn acknowledge_cancellation(
    State(state): State<AppState>,
    Path(id): Path<ElementId>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<AcknowledgeResponse>, ApiError> {
    let outcome = state.agents.acknowledge(id, &request.agent_id).await?;
    Ok(Json(AcknowledgeResponse::from(outcome)))
}

pub async fn complete_element(
    State(state): State<AppState>,
    Path(id): Path<ElementId>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Element>, ApiError> {
    let element = state
        .agents
        .complete(id, &request.agent_id, request.succeeded)
        .await?;
    Ok(Json(element))
}
