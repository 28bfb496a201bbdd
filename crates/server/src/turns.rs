use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use coachline_agent::classifier::HistoryTurn;
use coachline_agent::resolver::ContactCandidate;
use coachline_agent::{AgentRuntime, TurnOutcome, TurnRequest};
use coachline_core::context::ConversationContext;
use coachline_core::errors::{ApplicationError, DomainError, InterfaceError};
use coachline_core::intent::IntentDescriptor;
use coachline_db::{ContextRepository, ProfileRepository, RepositoryError};

#[derive(Clone)]
pub struct TurnState {
    runtime: AgentRuntime,
    contexts: Arc<dyn ContextRepository>,
    profiles: Arc<dyn ProfileRepository>,
}

impl TurnState {
    pub fn new(
        runtime: AgentRuntime,
        contexts: Arc<dyn ContextRepository>,
        profiles: Arc<dyn ProfileRepository>,
    ) -> Self {
        Self { runtime, contexts, profiles }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub prior_context: Vec<String>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,
    #[serde(default)]
    pub coach_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReply {
    pub summary: String,
    pub intent: IntentDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<ContactCandidate>>,
    pub outcome: TurnOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<&'static str>,
    pub context: Vec<String>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

pub fn router(state: TurnState) -> Router {
    Router::new().route("/api/v1/turns", post(post_turn)).with_state(state)
}

pub async fn post_turn(
    State(state): State<TurnState>,
    Json(body): Json<TurnBody>,
) -> Result<(StatusCode, Json<TurnReply>), (StatusCode, Json<ErrorReply>)> {
    let correlation_id = Uuid::new_v4().to_string();
    run_turn(&state, body, &correlation_id)
        .await
        .map(|reply| (StatusCode::OK, Json(reply)))
        .map_err(|error| error_reply(error.into_interface(correlation_id.as_str())))
}

async fn run_turn(
    state: &TurnState,
    body: TurnBody,
    correlation_id: &str,
) -> Result<TurnReply, ApplicationError> {
    let user_id = body.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(DomainError::InvariantViolation("userId is required".to_string()).into());
    }

    let context = if body.prior_context.is_empty() {
        state
            .contexts
            .find_latest(&user_id)
            .await
            .map_err(persistence)?
            .map(|stored| stored.context())
            .unwrap_or_default()
    } else {
        ConversationContext::unpack(&body.prior_context)
    };
    let profile = state.profiles.find_by_user(&user_id).await.map_err(persistence)?;

    let response = state
        .runtime
        .handle_turn(
            TurnRequest {
                user_id: user_id.clone(),
                prompt: body.prompt,
                context,
                history: body.conversation_history,
                coach_id: body.coach_id,
                correlation_id: correlation_id.to_string(),
                today: Utc::now().date_naive(),
            },
            profile.as_ref(),
        )
        .await?;

    state.contexts.upsert(&user_id, &response.context).await.map_err(persistence)?;
    info!(
        event_name = "api.turn.persisted",
        correlation_id = %correlation_id,
        user_id = %user_id,
        outcome = response.outcome.as_str(),
        "turn context persisted"
    );

    Ok(TurnReply {
        summary: response.summary,
        intent: response.intent,
        data: response.data,
        candidates: response.candidates,
        outcome: response.outcome,
        reason_code: response.reason_code,
        context: response.context.pack().unwrap_or_default(),
        correlation_id: correlation_id.to_string(),
    })
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn error_reply(error: InterfaceError) -> (StatusCode, Json<ErrorReply>) {
    let (status, code) = match &error {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    error!(
        event_name = "api.turn.failed",
        correlation_id = %error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "turn request failed"
    );

    let message = match &error {
        InterfaceError::BadRequest { message, .. } => message.clone(),
        _ => error.user_message().to_string(),
    };
    (
        status,
        Json(ErrorReply {
            error: code,
            message,
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
