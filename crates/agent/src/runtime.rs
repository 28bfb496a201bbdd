use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use coachline_core::config::AppConfig;
use coachline_core::context::ConversationContext;
use coachline_core::endpoints::{rule_for, CrmAction, CrmOperation};
use coachline_core::errors::{ApplicationError, DomainError, ValidationError};
use coachline_core::intent::{IntentDescriptor, IntentKind, WindowDefaults};
use coachline_core::profile::{credentials_for, CrmCredentials, CrmProfile};

use crate::classifier::{HistoryTurn, IntentClassifier};
use crate::dispatch::{CrmCall, CrmDispatcher, CrmTransport, DispatchError, DispatchResult};
use crate::llm::LlmClient;
use crate::resolver::{
    apply_to_context, contact_candidates, extract_contact, is_deictic_search, ContactCandidate,
    ContactResolver, Resolution,
};
use crate::summarizer::{FollowUpKind, Summarizer, SummaryInput, DEFAULT_FOLLOW_UP_ORDER};

const CRM_NOT_CONNECTED_MESSAGE: &str = "Your CRM isn't connected yet. Connect it in your \
profile settings and I can look up your contacts and their activity.";

/// Tunables for one turn. Defaults match the stock assistant behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnPolicy {
    /// Extra contact searches allowed for the client-error search quirk.
    pub search_quirk_retries: u8,
    pub follow_up_order: Vec<FollowUpKind>,
    pub history_turns: usize,
    pub page_size: u32,
    pub windows: WindowDefaults,
    pub llm_timeout: Duration,
    pub crm_timeout: Duration,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            search_quirk_retries: 1,
            follow_up_order: DEFAULT_FOLLOW_UP_ORDER.to_vec(),
            history_turns: 3,
            page_size: 10,
            windows: WindowDefaults::default(),
            llm_timeout: Duration::from_secs(30),
            crm_timeout: Duration::from_secs(20),
        }
    }
}

impl TurnPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            search_quirk_retries: config.crm.search_quirk_retries,
            history_turns: config.assistant.history_turns,
            page_size: config.assistant.page_size,
            windows: WindowDefaults {
                activity_days: config.assistant.activity_window_days,
                stats_days: config.assistant.stats_window_days,
            },
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            crm_timeout: Duration::from_secs(config.crm.timeout_secs),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub user_id: String,
    pub prompt: String,
    pub context: ConversationContext,
    pub history: Vec<HistoryTurn>,
    pub coach_id: Option<String>,
    pub correlation_id: String,
    pub today: NaiveDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    NeedsContact,
    CrmNotConnected,
    Degraded,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::NeedsContact => "needs_contact",
            Self::CrmNotConnected => "crm_not_connected",
            Self::Degraded => "degraded",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TurnResponse {
    pub summary: String,
    pub intent: IntentDescriptor,
    pub data: Option<Value>,
    pub candidates: Option<Vec<ContactCandidate>>,
    pub outcome: TurnOutcome,
    pub reason_code: Option<&'static str>,
    /// Context to persist. Only returned once the turn is complete.
    pub context: ConversationContext,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("invalid turn request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("no contact matches the request")]
    Unresolved { search: Option<String> },
}

impl TurnError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Dispatch(DispatchError::Validation(_)) => "validation_failed",
            Self::Dispatch(DispatchError::Upstream { .. }) => "crm_upstream_error",
            Self::Dispatch(DispatchError::Timeout(_)) => "crm_timeout",
            Self::Dispatch(DispatchError::Transport(_) | DispatchError::Decode(_)) => {
                "crm_unavailable"
            }
            Self::Unresolved { .. } => "contact_unresolved",
        }
    }

    /// What the user sees when the turn degrades.
    pub fn user_message(&self) -> String {
        match self {
            Self::Dispatch(DispatchError::Validation(error)) => {
                let fields = error.fields();
                if fields.is_empty() {
                    "That request isn't something I can send to the CRM yet.".to_string()
                } else {
                    format!("I need {} to do that.", fields.join(", "))
                }
            }
            Self::Dispatch(DispatchError::Upstream { .. }) => {
                "The CRM didn't return any results for that. Please try again in a moment."
                    .to_string()
            }
            Self::Dispatch(DispatchError::Timeout(_)) => {
                "The CRM took too long to respond. Please try again.".to_string()
            }
            Self::Dispatch(_) => "I couldn't reach the CRM just now. Please try again.".to_string(),
            Self::InvalidRequest(message) => message.clone(),
            Self::Unresolved { search: Some(search) } => {
                format!("I couldn't find a contact matching \"{search}\". Which contact do you mean?")
            }
            Self::Unresolved { search: None } => {
                "Which contact do you mean? Tell me a name or a company.".to_string()
            }
        }
    }
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::InvalidRequest(message) => {
                Self::Domain(DomainError::InvariantViolation(message))
            }
            TurnError::Dispatch(DispatchError::Validation(error)) => {
                Self::Domain(DomainError::Validation(error))
            }
            TurnError::Dispatch(error) => Self::Integration(error.to_string()),
            error @ TurnError::Unresolved { .. } => Self::Integration(error.to_string()),
        }
    }
}

struct Executed {
    result: DispatchResult,
    candidates: Option<Vec<ContactCandidate>>,
}

/// One conversational turn, end to end. Persistence stays with the caller.
#[derive(Clone)]
pub struct AgentRuntime {
    classifier: IntentClassifier,
    resolver: ContactResolver,
    dispatcher: CrmDispatcher,
    summarizer: Summarizer,
    policy: TurnPolicy,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        transport: Arc<dyn CrmTransport>,
        policy: TurnPolicy,
    ) -> Self {
        let dispatcher = CrmDispatcher::new(transport, policy.crm_timeout);
        Self {
            classifier: IntentClassifier::new(
                llm.clone(),
                policy.llm_timeout,
                policy.windows,
                policy.history_turns,
            ),
            resolver: ContactResolver::new(dispatcher.clone(), policy.search_quirk_retries),
            summarizer: Summarizer::new(llm, policy.llm_timeout, policy.follow_up_order.clone()),
            dispatcher,
            policy,
        }
    }

    pub fn policy(&self) -> &TurnPolicy {
        &self.policy
    }

    pub async fn handle_turn(
        &self,
        request: TurnRequest,
        profile: Option<&CrmProfile>,
    ) -> Result<TurnResponse, TurnError> {
        if request.user_id.trim().is_empty() {
            return Err(TurnError::InvalidRequest("userId is required".to_string()));
        }
        if request.prompt.trim().is_empty() {
            return Err(TurnError::InvalidRequest("prompt is required".to_string()));
        }

        let started = Instant::now();
        info!(
            event_name = "turn.started",
            correlation_id = %request.correlation_id,
            user_id = %request.user_id,
            coach_id = request.coach_id.as_deref().unwrap_or_default(),
            has_pending_follow_up = request.context.next_follow_up.is_some(),
            "turn started"
        );

        let mut context = request.context.clone();
        let classification = self
            .classifier
            .classify(&request.prompt, &context, &request.history, request.today)
            .await;
        let intent = classification.intent;
        info!(
            event_name = "turn.classified",
            correlation_id = %request.correlation_id,
            intent_type = intent.kind.label(),
            source = classification.source.as_str(),
            "intent classified"
        );
        let greeting_name = profile.and_then(CrmProfile::greeting_name);

        if intent.is_general() {
            let summary = self
                .summarizer
                .summarize(
                    SummaryInput {
                        prompt: &request.prompt,
                        intent: &intent,
                        result: None,
                        greeting_name,
                    },
                    &mut context,
                )
                .await;
            let response = TurnResponse {
                summary: summary.text,
                intent,
                data: None,
                candidates: None,
                outcome: TurnOutcome::Answered,
                reason_code: None,
                context,
            };
            return Ok(self.finish(&request, started, response));
        }

        let credentials = match credentials_for(&request.user_id, profile) {
            Ok(credentials) => credentials,
            Err(error) => {
                warn!(
                    event_name = "turn.crm_not_connected",
                    correlation_id = %request.correlation_id,
                    reason = %error,
                    "crm profile unusable"
                );
                let response = TurnResponse {
                    summary: CRM_NOT_CONNECTED_MESSAGE.to_string(),
                    intent,
                    data: None,
                    candidates: None,
                    outcome: TurnOutcome::CrmNotConnected,
                    reason_code: Some("crm_not_connected"),
                    context: request.context.clone(),
                };
                return Ok(self.finish(&request, started, response));
            }
        };

        let response = match self.execute(&request, &intent, &credentials, &mut context).await {
            Ok(executed) => {
                let summary = self
                    .summarizer
                    .summarize(
                        SummaryInput {
                            prompt: &request.prompt,
                            intent: &intent,
                            result: Some(&executed.result),
                            greeting_name,
                        },
                        &mut context,
                    )
                    .await;
                TurnResponse {
                    summary: summary.text,
                    data: serde_json::to_value(&executed.result).ok(),
                    intent,
                    candidates: executed.candidates,
                    outcome: TurnOutcome::Answered,
                    reason_code: None,
                    context,
                }
            }
            Err(error @ TurnError::Unresolved { .. }) => {
                let mut context = request.context.clone();
                context.advance_follow_up(None);
                TurnResponse {
                    summary: error.user_message(),
                    intent,
                    data: None,
                    candidates: None,
                    outcome: TurnOutcome::NeedsContact,
                    reason_code: Some(error.reason_code()),
                    context,
                }
            }
            Err(error) => {
                warn!(
                    event_name = "turn.degraded",
                    correlation_id = %request.correlation_id,
                    reason_code = error.reason_code(),
                    error = %error,
                    "turn degraded"
                );
                TurnResponse {
                    summary: error.user_message(),
                    intent,
                    data: None,
                    candidates: None,
                    outcome: TurnOutcome::Degraded,
                    reason_code: Some(error.reason_code()),
                    context: request.context.clone(),
                }
            }
        };
        Ok(self.finish(&request, started, response))
    }

    fn finish(&self, request: &TurnRequest, started: Instant, response: TurnResponse) -> TurnResponse {
        info!(
            event_name = "turn.completed",
            correlation_id = %request.correlation_id,
            outcome = response.outcome.as_str(),
            intent_type = response.intent.kind.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );
        response
    }

    async fn execute(
        &self,
        request: &TurnRequest,
        intent: &IntentDescriptor,
        credentials: &CrmCredentials,
        context: &mut ConversationContext,
    ) -> Result<Executed, TurnError> {
        let (action, operation) = match intent.kind {
            IntentKind::Crm { action, operation } => (action, operation),
            IntentKind::Activity => (CrmAction::Activity, CrmOperation::List),
            IntentKind::Stats => (CrmAction::ActivitySummary, CrmOperation::List),
            IntentKind::General => {
                return Err(TurnError::InvalidRequest("nothing to send to the CRM".to_string()))
            }
        };
        let rule = rule_for(action, operation).ok_or_else(|| {
            DispatchError::Validation(ValidationError::UnsupportedAction {
                action: action.to_string(),
                operation: operation.as_str().to_string(),
            })
        })?;

        let mut call = CrmCall::new(rule);
        call.params = intent.params.clone();
        call.date_range = intent.date_range;
        if operation == CrmOperation::List {
            call.limit = Some(intent.limit.unwrap_or(self.policy.page_size));
            if let Some(page) = intent.page {
                call.params.entry("page").or_insert_with(|| Value::from(page));
            }
        }

        if action == CrmAction::ContactSearch {
            self.bind_search(intent, context, &mut call)?;
        } else if intent.kind.needs_contact() || !intent.subject.is_empty() {
            let resolution = self
                .resolver
                .resolve_contact_id(intent, credentials, context, &request.prompt)
                .await?;
            match resolution {
                Resolution::Resolved(contact) => {
                    if rule.needs_contact_id() {
                        call.contact_id = Some(contact.contact_id.clone());
                    }
                    if operation == CrmOperation::Create {
                        call.params
                            .entry("contact_id")
                            .or_insert_with(|| Value::from(contact.contact_id.clone()));
                    }
                    if matches!(intent.kind, IntentKind::Activity | IntentKind::Stats) {
                        if let Some(phone_id) = contact.phone_id {
                            call.params.entry("phone_id").or_insert(Value::from(phone_id));
                        }
                    }
                }
                Resolution::Unresolved { search } if intent.kind.needs_contact() => {
                    return Err(TurnError::Unresolved { search });
                }
                Resolution::Unresolved { .. } => {}
            }
        }

        if matches!(intent.kind, IntentKind::Activity) {
            call.params.insert("include_calls".to_string(), Value::Bool(intent.data_types.calls));
            call.params
                .insert("include_messages".to_string(), Value::Bool(intent.data_types.messages));
        }

        let result = self.dispatcher.dispatch(call, credentials).await?;

        let candidates = (action == CrmAction::ContactSearch).then(|| {
            let candidates = contact_candidates(result.items());
            if let [only] = result.items() {
                if let Some(contact) = extract_contact(only) {
                    apply_to_context(contact, context);
                }
            }
            candidates
        });
        Ok(Executed { result, candidates })
    }

    fn bind_search(
        &self,
        intent: &IntentDescriptor,
        context: &ConversationContext,
        call: &mut CrmCall,
    ) -> Result<(), TurnError> {
        if let Some(contact_id) = intent.subject.contact_id.as_deref() {
            call.params.insert("contact_id".to_string(), Value::from(contact_id));
            return Ok(());
        }
        match intent.subject.search_candidate() {
            Some(term) if !is_deictic_search(term) => {
                call.params.insert("search".to_string(), Value::from(term));
                call.params.insert("selectSearchFields".to_string(), Value::from("1,2,3"));
                Ok(())
            }
            Some(_) => match context.contact_id.as_deref() {
                Some(contact_id) => {
                    call.params.insert("contact_id".to_string(), Value::from(contact_id));
                    Ok(())
                }
                None => Err(TurnError::Unresolved { search: None }),
            },
            None => Err(TurnError::Unresolved { search: None }),
        }
    }
}
