//! Prompt to intent.
//!
//! A keyword pass produces a coarse hint that is embedded in the oracle
//! prompt; the oracle answer decides. Post-processing then binds "this
//! contact", hands bare affirmatives to the follow-up analyzer and forces
//! coaching questions to `general`.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use coachline_core::context::ConversationContext;
use coachline_core::endpoints::CrmAction;
use coachline_core::intent::{IntentDescriptor, RawIntent, WindowDefaults, THIS_CONTACT};

use crate::followup::{is_bare_affirmative, FollowUpAnalyzer};
use crate::llm::{complete_json, LlmClient};

pub(crate) const CLASSIFIER_ROLE: &str =
    "You convert a sales rep's message into one CRM intent JSON object.";

/// Phrases that always mean the user wants coaching, not CRM data.
const COACHING_TRIGGERS: &[&str] = &[
    "how do i",
    "how should i",
    "how can i improve",
    "what should i say",
    "give me tips",
    "any tips",
    "coach me",
    "advice on",
    "best way to",
    "handle objection",
    "handling objection",
    "role play",
    "roleplay",
    "sales script",
];

/// One earlier exchange, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryTurn {
    #[serde(alias = "prompt")]
    pub user: String,
    #[serde(alias = "summary", alias = "reply")]
    pub assistant: Option<String>,
}

/// Coarse category guessed from keywords alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CategoryHint {
    Crm(Option<CrmAction>),
    Activity,
    Stats,
    General,
}

impl CategoryHint {
    fn describe(&self) -> String {
        match self {
            Self::Crm(Some(action)) => format!("crm ({action})"),
            Self::Crm(None) => "crm".to_string(),
            Self::Activity => "activity".to_string(),
            Self::Stats => "stats".to_string(),
            Self::General => "general".to_string(),
        }
    }
}

pub fn pre_classify(prompt: &str) -> CategoryHint {
    let lowered = prompt.to_ascii_lowercase();
    let has = |words: &[&str]| contains_any(&lowered, words);

    if has(&["summary", "stats", "statistics", "how many", "totals"][..]) {
        return CategoryHint::Stats;
    }
    if has(&["call", "sms", "text message", "texts", "activity", "recording", "voicemail"][..]) {
        return CategoryHint::Activity;
    }
    let action = [
        (&["task", "to-do", "todo"][..], CrmAction::Tasks),
        (&["appointment", "meeting", "calendar"][..], CrmAction::Appointments),
        (&["note"][..], CrmAction::Notes),
        (&["opportunit", "deal", "pipeline"][..], CrmAction::Opportunities),
        (&["event form", "eventform"][..], CrmAction::EventForm),
        (&["find", "search", "look up", "lookup", "contact"][..], CrmAction::ContactSearch),
    ]
    .into_iter()
    .find(|(words, _)| has(*words))
    .map(|(_, action)| action);

    match action {
        Some(action) => CategoryHint::Crm(Some(action)),
        None => CategoryHint::General,
    }
}

fn contains_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|word| haystack.contains(word))
}

pub fn is_coaching_request(prompt: &str) -> bool {
    contains_any(&prompt.to_ascii_lowercase(), COACHING_TRIGGERS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassificationSource {
    Oracle,
    FollowUp,
    Coaching,
    /// The oracle failed or answered nonsense.
    Fallback,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::FollowUp => "follow_up",
            Self::Coaching => "coaching",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub intent: IntentDescriptor,
    pub source: ClassificationSource,
}

#[derive(Clone)]
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    windows: WindowDefaults,
    history_turns: usize,
    follow_up: FollowUpAnalyzer,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        timeout: Duration,
        windows: WindowDefaults,
        history_turns: usize,
    ) -> Self {
        let follow_up = FollowUpAnalyzer::new(llm.clone(), timeout, windows);
        Self { llm, timeout, windows, history_turns: history_turns.min(3), follow_up }
    }

    pub async fn classify(
        &self,
        prompt: &str,
        context: &ConversationContext,
        history: &[HistoryTurn],
        today: NaiveDate,
    ) -> Classification {
        let pending = context
            .next_follow_up
            .as_deref()
            .map(str::trim)
            .filter(|question| !question.is_empty());

        let mut classification = match pending {
            Some(question) if is_bare_affirmative(prompt) => Classification {
                intent: self.follow_up.analyze(question, today).await,
                source: ClassificationSource::FollowUp,
            },
            _ => {
                let mut classification = self.ask_oracle(prompt, history, today).await;
                if let Some(contact_id) = context.contact_id.as_deref() {
                    classification.intent.subject.bind_this_contact(contact_id);
                }
                classification
            }
        };

        if is_coaching_request(prompt) && !classification.intent.is_general() {
            debug!(event_name = "intent.coaching_override", "coaching trigger forced general");
            classification = Classification {
                intent: IntentDescriptor::general(),
                source: ClassificationSource::Coaching,
            };
        }
        classification
    }

    async fn ask_oracle(
        &self,
        prompt: &str,
        history: &[HistoryTurn],
        today: NaiveDate,
    ) -> Classification {
        let hint = pre_classify(prompt);
        let instructions = self.instructions(today, hint);
        let task = self.task(prompt, history);

        let parsed = complete_json(self.llm.as_ref(), &task, &instructions, self.timeout)
            .await
            .map_err(|error| error.to_string())
            .and_then(|answer| {
                serde_json::from_value::<RawIntent>(answer).map_err(|error| error.to_string())
            })
            .and_then(|raw| {
                IntentDescriptor::from_raw(raw, today, self.windows)
                    .map_err(|error| error.to_string())
            });

        match parsed {
            Ok(intent) => Classification { intent, source: ClassificationSource::Oracle },
            Err(reason) => {
                warn!(
                    event_name = "intent.oracle_fallback",
                    hint = %hint.describe(),
                    reason = %reason,
                    "classification failed, defaulting to general"
                );
                Classification {
                    intent: IntentDescriptor::general(),
                    source: ClassificationSource::Fallback,
                }
            }
        }
    }

    fn instructions(&self, today: NaiveDate, hint: CategoryHint) -> String {
        format!(
            "{CLASSIFIER_ROLE}
Today is {today}.
Keyword hint (may be wrong): {hint}.

Return exactly one JSON object in one of these shapes:
{{\"type\":\"crm\",\"action\":\"contactSearch|appointments|opportunities|eventform|notes|tasks\",\"operation\":\"list|create\",\"search\":\"...\",\"contactId\":\"...\",\"startDate\":\"YYYY-MM-DD\",\"endDate\":\"YYYY-MM-DD\",\"limit\":10,\"page\":1,\"params\":{{}}}}
{{\"type\":\"activity\",\"contact\":\"...\",\"days\":{activity},\"includeCalls\":true,\"includeMessages\":true}}
{{\"type\":\"stats\",\"contact\":\"...\",\"days\":{stats}}}
{{\"type\":\"general\"}}

Rules:
- Calls, SMS and call recordings are \"activity\"; default to the last {activity} days.
- Activity summaries and totals are \"stats\"; default to the last {stats} days.
- When the user says \"this contact\", \"that contact\", \"this lead\" or \"my account\", set contact to \"{THIS_CONTACT}\" and do not invent a name.
- Only copy names, companies and ids the user actually wrote.
- Put fields for create operations into params.
- Coaching questions and small talk are \"general\".",
            hint = hint.describe(),
            activity = self.windows.activity_days,
            stats = self.windows.stats_days,
        )
    }

    fn task(&self, prompt: &str, history: &[HistoryTurn]) -> String {
        let skip = history.len().saturating_sub(self.history_turns);
        let mut task = String::new();
        for turn in history.iter().skip(skip) {
            task.push_str("User: ");
            task.push_str(turn.user.trim());
            task.push('\n');
            if let Some(reply) = turn.assistant.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                task.push_str("Assistant: ");
                task.push_str(reply);
                task.push('\n');
            }
        }
        task.push_str("User: ");
        task.push_str(prompt.trim());
        task
    }
}
