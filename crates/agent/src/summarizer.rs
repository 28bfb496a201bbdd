//! Reply rendering and follow-up selection.
//!
//! The facts section is rendered deterministically from the dispatch result
//! and only mentions fields the CRM returned. The oracle may rephrase those
//! facts but never adds a question: every reply ends with exactly one
//! follow-up, chosen by priority and never equal to the previous one.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use coachline_core::context::ConversationContext;
use coachline_core::endpoints::{CrmAction, CrmOperation};
use coachline_core::intent::{text, DataTypeFlags, IntentDescriptor, IntentKind};

use crate::dispatch::DispatchResult;
use crate::llm::{complete_json, LlmClient};

pub(crate) const SUMMARY_ROLE: &str =
    "You rewrite CRM facts as a short, friendly update for a sales rep.";
pub(crate) const COACH_ROLE: &str = "You are a concise, practical sales coach.";

const COACHING_FALLBACK: &str = "I can help with coaching and with your CRM: contacts, tasks, \
appointments, notes, opportunities, and call and SMS activity.";

const DISPLAY_KEYS: &[&str] = &[
    "name",
    "full_name",
    "fullName",
    "first_name",
    "last_name",
    "company_name",
    "companyName",
    "title",
    "subject",
    "body",
    "description",
    "status",
    "stage",
    "due_date",
    "dueDate",
    "start_time",
    "startTime",
    "date",
    "amount",
    "value",
];

const TIMEFRAME_OPTIONS: &[i64] = &[7, 30, 90];

/// Follow-up categories, in the order they are considered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpKind {
    Pagination,
    Timeframe,
    TypeSwitch,
    Generic,
}

pub const DEFAULT_FOLLOW_UP_ORDER: [FollowUpKind; 4] = [
    FollowUpKind::Pagination,
    FollowUpKind::Timeframe,
    FollowUpKind::TypeSwitch,
    FollowUpKind::Generic,
];

#[derive(Clone, Copy, Debug)]
pub struct SummaryInput<'a> {
    pub prompt: &'a str,
    pub intent: &'a IntentDescriptor,
    pub result: Option<&'a DispatchResult>,
    pub greeting_name: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
    pub follow_up: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSummary {
    #[serde(alias = "answer", alias = "text")]
    summary: Option<String>,
}

#[derive(Clone)]
pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    order: Vec<FollowUpKind>,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration, order: Vec<FollowUpKind>) -> Self {
        Self { llm, timeout, order }
    }

    /// Renders the reply and moves the follow-up state forward.
    pub async fn summarize(
        &self,
        input: SummaryInput<'_>,
        context: &mut ConversationContext,
    ) -> Summary {
        let body = if input.intent.is_general() {
            self.oracle_text(COACH_ROLE, input.prompt)
                .await
                .unwrap_or_else(|| COACHING_FALLBACK.to_string())
        } else {
            let facts = render_facts(input.intent, input.result);
            match self.oracle_text(SUMMARY_ROLE, &facts).await {
                Some(prose) => prose,
                None => facts,
            }
        };

        let question =
            choose_follow_up(&self.order, input.intent, input.result, context.next_follow_up.as_deref());
        let text = compose(input.greeting_name, &body, &question);
        let follow_up = extract_follow_up(&text);
        context.advance_follow_up(follow_up.clone());
        Summary { text, follow_up }
    }

    async fn oracle_text(&self, role: &str, prompt: &str) -> Option<String> {
        if prompt.trim().is_empty() {
            return None;
        }
        let instructions = format!(
            "{role}\nUse only what the message below states. Do not greet the user and do not ask \
             any question.\nAnswer with one JSON object: {{\"summary\": \"...\"}}."
        );
        let answer = match complete_json(self.llm.as_ref(), prompt, &instructions, self.timeout).await {
            Ok(answer) => answer,
            Err(error) => {
                debug!(event_name = "summary.oracle_skipped", reason = %error, "using rendered text");
                return None;
            }
        };
        let summary = serde_json::from_value::<RawSummary>(answer)
            .ok()
            .and_then(|raw| raw.summary)
            .map(|summary| summary.trim().to_string())
            .filter(|summary| !summary.is_empty());
        match summary {
            Some(summary) if !summary.contains('?') => Some(summary),
            Some(_) => {
                debug!(event_name = "summary.oracle_rejected", "oracle text asked a question");
                None
            }
            None => None,
        }
    }
}

fn compose(greeting_name: Option<&str>, body: &str, question: &str) -> String {
    let greeting = match greeting_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("Hi {name},"),
        None => "Hi there,".to_string(),
    };
    let mut text = greeting;
    if !body.trim().is_empty() {
        text.push_str("\n\n");
        text.push_str(body.trim());
    }
    text.push_str("\n\n");
    text.push_str(question);
    text
}

/// The trailing question of a reply, if it ends in one.
pub fn extract_follow_up(reply: &str) -> Option<String> {
    static TERMINAL: OnceLock<Option<Regex>> = OnceLock::new();
    TERMINAL
        .get_or_init(|| Regex::new(r"([^.!?\n]+\?)\s*$").ok())
        .as_ref()?
        .captures(reply)
        .and_then(|captures| captures.get(1))
        .map(|question| question.as_str().trim().to_string())
        .filter(|question| question.len() > 1)
}

fn label(kind: &IntentKind) -> &'static str {
    match kind {
        IntentKind::Crm { action, .. } => match action {
            CrmAction::ContactSearch => "contacts",
            CrmAction::Appointments => "appointments",
            CrmAction::Opportunities => "opportunities",
            CrmAction::EventForm => "event forms",
            CrmAction::Notes => "notes",
            CrmAction::Tasks => "tasks",
            CrmAction::Activity => "activity records",
            CrmAction::ActivitySummary => "activity summaries",
        },
        IntentKind::Activity => "activity records",
        IntentKind::Stats => "activity summaries",
        IntentKind::General => "results",
    }
}

fn same_question(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

/// Highest-priority candidate that differs from `previous`.
pub fn choose_follow_up(
    order: &[FollowUpKind],
    intent: &IntentDescriptor,
    result: Option<&DispatchResult>,
    previous: Option<&str>,
) -> String {
    let generic = follow_up_candidates(FollowUpKind::Generic, intent, result);
    order
        .iter()
        .flat_map(|kind| follow_up_candidates(*kind, intent, result))
        .chain(generic)
        .find(|candidate| !previous.map(|previous| same_question(previous, candidate)).unwrap_or(false))
        .unwrap_or_else(|| "Is there anything else I can help with?".to_string())
}

fn next_page(intent: &IntentDescriptor, result: &DispatchResult) -> Option<u32> {
    if let Some(pagination) = result.pagination {
        return pagination.next_page();
    }
    match (result.total, result.returned) {
        (Some(total), Some(returned)) if returned > 0 && total > returned as u64 => {
            Some(intent.page.unwrap_or(1).saturating_add(1))
        }
        _ => None,
    }
}

fn data_type_phrase(flags: DataTypeFlags) -> &'static str {
    match (flags.calls, flags.messages) {
        (true, false) => "call",
        (false, true) => "SMS",
        _ => "call and SMS",
    }
}

pub fn follow_up_candidates(
    kind: FollowUpKind,
    intent: &IntentDescriptor,
    result: Option<&DispatchResult>,
) -> Vec<String> {
    let label = label(&intent.kind);
    match kind {
        FollowUpKind::Pagination => result
            .and_then(|result| next_page(intent, result))
            .map(|page| vec![format!("Would you like to see page {page} of these {label}?")])
            .unwrap_or_default(),
        FollowUpKind::Timeframe => {
            let current = intent.date_range.map(|range| range.days());
            let options = TIMEFRAME_OPTIONS.iter().filter(|days| Some(**days) != current);
            match intent.kind {
                IntentKind::Activity => {
                    let types = data_type_phrase(intent.data_types);
                    options
                        .map(|days| {
                            format!("Would you like to see a {days}-day {types} report for this contact?")
                        })
                        .collect()
                }
                IntentKind::Stats => options
                    .map(|days| format!("Would you like an activity summary for the last {days} days?"))
                    .collect(),
                IntentKind::Crm { .. } | IntentKind::General => Vec::new(),
            }
        }
        FollowUpKind::TypeSwitch => match intent.kind {
            IntentKind::Activity => {
                vec!["Would you like an activity summary for this contact?".to_string()]
            }
            IntentKind::Stats => vec![
                "Would you like to see the recent call and SMS report for this contact?".to_string(),
            ],
            IntentKind::Crm { action, operation } => {
                let next = match (action, operation) {
                    (_, CrmOperation::Create) => label,
                    (CrmAction::ContactSearch, _) | (CrmAction::Opportunities, _) => "tasks",
                    (CrmAction::Tasks, _) | (CrmAction::EventForm, _) => "appointments",
                    (CrmAction::Appointments, _) => "notes",
                    (CrmAction::Notes, _) => "opportunities",
                    (CrmAction::Activity, _) | (CrmAction::ActivitySummary, _) => "tasks",
                };
                vec![
                    format!("Would you like to see the {next} for this contact?"),
                    "Would you like to see a 7-day call and SMS report for this contact?".to_string(),
                ]
            }
            IntentKind::General => Vec::new(),
        },
        FollowUpKind::Generic => match intent.kind {
            IntentKind::General => vec![
                "Would you like me to look up a contact's recent activity?".to_string(),
                "Is there a contact you would like me to look up?".to_string(),
            ],
            _ => vec![
                "Is there anything else you would like to check for this contact?".to_string(),
                "Would you like to look up another contact?".to_string(),
            ],
        },
    }
}

/// Deterministic facts. Mentions only what the CRM returned.
pub fn render_facts(intent: &IntentDescriptor, result: Option<&DispatchResult>) -> String {
    let Some(result) = result else {
        return String::new();
    };
    if let Value::String(body) = &result.raw {
        let body = body.trim();
        if body.is_empty() {
            return "The CRM returned an empty response.".to_string();
        }
        return format!("The CRM replied: {}", body.chars().take(500).collect::<String>());
    }

    match intent.kind {
        IntentKind::Crm { operation: CrmOperation::Create, .. } => render_created(intent, result),
        IntentKind::Activity => render_activity(intent, result),
        IntentKind::Stats => render_stats(&result.raw),
        IntentKind::Crm { .. } | IntentKind::General => render_list(intent, result),
    }
}

fn render_created(intent: &IntentDescriptor, result: &DispatchResult) -> String {
    let mut line = format!("Saved to {}.", label(&intent.kind));
    let reference = result
        .raw
        .as_object()
        .and_then(|object| ["id", "task_id", "note_id", "appointment_id"].iter().find_map(|key| text(object.get(*key))));
    if let Some(reference) = reference {
        line.push_str(&format!(" Reference: {reference}."));
    }
    line
}

fn render_list(intent: &IntentDescriptor, result: &DispatchResult) -> String {
    let label = label(&intent.kind);
    let items: Vec<&Value> = match (&result.list, &result.raw) {
        (Some(list), _) => list.iter().collect(),
        (None, raw @ Value::Object(_)) => vec![raw],
        _ => Vec::new(),
    };
    if items.is_empty() {
        return format!("No {label} found.");
    }

    let header = match (result.total, result.returned) {
        (Some(total), Some(returned)) if total > returned as u64 => {
            format!("Showing {returned} of {total} {label}:")
        }
        _ => format!("Found {} {label}:", items.len()),
    };
    let mut lines = vec![header];
    lines.extend(items.into_iter().filter_map(Value::as_object).map(|record| format!("- {}", describe(record))));
    lines.join("\n")
}

fn describe(record: &Map<String, Value>) -> String {
    let shown = DISPLAY_KEYS
        .iter()
        .filter_map(|key| text(record.get(*key)).map(|value| format!("{}: {value}", humanize(key))))
        .collect::<Vec<_>>();
    if !shown.is_empty() {
        return shown.join(" | ");
    }
    record
        .iter()
        .filter_map(|(key, value)| text(Some(value)).map(|value| format!("{}: {value}", humanize(key))))
        .take(4)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn humanize(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (index, ch) in key.chars().enumerate() {
        if ch == '_' {
            out.push(' ');
        } else if ch.is_ascii_uppercase() && index > 0 {
            out.push(' ');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Channel {
    Call,
    Message,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Incoming,
    Outgoing,
    Missed,
    Unknown,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Missed => "missed",
            Self::Unknown => "",
        }
    }
}

fn lowered(record: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| text(record.get(*key)))
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn channel(record: &Map<String, Value>) -> Channel {
    let kind = lowered(record, &["type", "kind", "channel", "activity_type", "activityType"]);
    if ["sms", "message", "text"].iter().any(|word| kind.contains(word)) {
        Channel::Message
    } else {
        Channel::Call
    }
}

fn direction(record: &Map<String, Value>) -> Direction {
    let status = lowered(record, &["status", "call_status", "callStatus", "disposition"]);
    if ["missed", "no-answer", "no answer", "unanswered"].iter().any(|word| status.contains(word)) {
        return Direction::Missed;
    }
    let direction = lowered(record, &["direction", "call_direction", "callDirection"]);
    if direction.starts_with("in") {
        Direction::Incoming
    } else if direction.starts_with("out") {
        Direction::Outgoing
    } else {
        Direction::Unknown
    }
}

fn has_recording(record: &Map<String, Value>) -> bool {
    ["recording_url", "recordingUrl", "recording"].iter().any(|key| match record.get(*key) {
        Some(Value::Bool(flag)) => *flag,
        other => text(other).is_some(),
    })
}

#[derive(Default)]
struct Tally {
    incoming: usize,
    outgoing: usize,
    missed: usize,
}

impl Tally {
    fn count(&mut self, direction: Direction) {
        match direction {
            Direction::Incoming => self.incoming += 1,
            Direction::Outgoing => self.outgoing += 1,
            Direction::Missed => self.missed += 1,
            Direction::Unknown => {}
        }
    }
}

fn render_activity(intent: &IntentDescriptor, result: &DispatchResult) -> String {
    let flags = intent.data_types;
    let records = result
        .items()
        .iter()
        .filter_map(Value::as_object)
        .map(|record| (record, channel(record), direction(record)))
        .filter(|(_, channel, _)| match channel {
            Channel::Call => flags.calls,
            Channel::Message => flags.messages,
        })
        .collect::<Vec<_>>();

    let mut lines = Vec::new();
    if let Some(range) = intent.date_range {
        lines.push(format!("Activity from {} to {}:", range.start, range.end));
    }
    if records.is_empty() {
        lines.push(format!("No {} activity in this window.", data_type_phrase(flags)));
        return lines.join("\n");
    }

    let mut calls = Tally::default();
    let mut messages = Tally::default();
    for (_, channel, direction) in &records {
        match channel {
            Channel::Call => calls.count(*direction),
            Channel::Message => messages.count(*direction),
        }
    }
    if flags.calls {
        lines.push(format!(
            "Calls: {} incoming, {} outgoing, {} missed.",
            calls.incoming, calls.outgoing, calls.missed
        ));
    }
    if flags.messages {
        lines.push(format!("Messages: {} incoming, {} outgoing.", messages.incoming, messages.outgoing));
    }

    for (record, channel, direction) in records {
        let mut line = String::from("-");
        if let Some(when) = ["date", "created_at", "createdAt", "timestamp", "start_time"]
            .iter()
            .find_map(|key| text(record.get(*key)))
        {
            line.push(' ');
            line.push_str(&when);
        }
        if direction != Direction::Unknown {
            line.push(' ');
            line.push_str(direction.as_str());
        }
        match channel {
            Channel::Call => {
                line.push_str(" call");
                if let Some(duration) = text(record.get("duration")) {
                    line.push_str(&format!(" ({duration}s)"));
                }
                line.push_str(if has_recording(record) {
                    " [recording available]"
                } else {
                    " [no recording]"
                });
            }
            Channel::Message => line.push_str(" message"),
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn render_stats(raw: &Value) -> String {
    let object = raw
        .as_object()
        .map(|object| object.get("data").and_then(Value::as_object).unwrap_or(object));
    let lines = object
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| match value {
                    Value::Number(_) | Value::String(_) | Value::Bool(_) => {
                        let rendered = match value {
                            Value::Bool(flag) => Some(flag.to_string()),
                            other => text(Some(other)),
                        };
                        rendered.map(|rendered| format!("- {}: {rendered}", humanize(key)))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if lines.is_empty() {
        return "No activity summary is available for this window.".to_string();
    }
    let mut out = vec!["Activity summary:".to_string()];
    out.extend(lines);
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::json;

    use coachline_core::context::ConversationContext;
    use coachline_core::endpoints::{CrmAction, CrmOperation};
    use coachline_core::intent::{DateRange, IntentDescriptor, IntentKind};

    use super::{
        extract_follow_up, render_facts, Summarizer, SummaryInput, COACH_ROLE,
        DEFAULT_FOLLOW_UP_ORDER, SUMMARY_ROLE,
    };
    use crate::dispatch::DispatchResult;
    use crate::testing::ScriptedLlm;

    fn summarizer(llm: ScriptedLlm) -> Summarizer {
        Summarizer::new(Arc::new(llm), Duration::from_secs(2), DEFAULT_FOLLOW_UP_ORDER.to_vec())
    }

    fn tasks_intent() -> IntentDescriptor {
        IntentDescriptor::new(IntentKind::Crm {
            action: CrmAction::Tasks,
            operation: CrmOperation::List,
        })
    }

    fn activity_intent(days: u32) -> IntentDescriptor {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).expect("valid date");
        IntentDescriptor {
            date_range: Some(DateRange::last_days(today, days)),
            ..IntentDescriptor::new(IntentKind::Activity)
        }
    }

    fn input<'a>(
        intent: &'a IntentDescriptor,
        result: Option<&'a DispatchResult>,
    ) -> SummaryInput<'a> {
        SummaryInput { prompt: "show me", intent, result, greeting_name: Some("Dana") }
    }

    #[tokio::test]
    async fn pending_pagination_asks_for_the_next_page() {
        let result = DispatchResult::from_raw(
            json!({"data": [{"title": "Send proposal"}], "hasNextPage": true, "totalPages": 5, "page": 2}),
            None,
        );
        let intent = tasks_intent();
        let mut context = ConversationContext::default();

        let summary = summarizer(ScriptedLlm::failing())
            .summarize(input(&intent, Some(&result)), &mut context)
            .await;

        assert_eq!(
            summary.follow_up.as_deref(),
            Some("Would you like to see page 3 of these tasks?")
        );
        assert!(summary.text.starts_with("Hi Dana,"));
        assert!(summary.text.contains("title: Send proposal"));
        assert_eq!(context.next_follow_up, summary.follow_up);
    }

    #[tokio::test]
    async fn pagination_fields_without_a_list_still_ask_for_the_next_page() {
        let result =
            DispatchResult::from_raw(json!({"hasNextPage": true, "totalPages": 5, "page": 2}), None);
        assert!(result.list.is_none());
        let intent = tasks_intent();
        let mut context = ConversationContext::default();

        let summary = summarizer(ScriptedLlm::failing())
            .summarize(input(&intent, Some(&result)), &mut context)
            .await;

        assert_eq!(
            summary.follow_up.as_deref(),
            Some("Would you like to see page 3 of these tasks?")
        );
    }

    #[tokio::test]
    async fn consecutive_replies_never_repeat_the_question() {
        let intent = activity_intent(7);
        let result = DispatchResult::from_raw(json!({"data": []}), None);
        let summarizer = summarizer(ScriptedLlm::failing());
        let mut context = ConversationContext::default();

        let first = summarizer.summarize(input(&intent, Some(&result)), &mut context).await;
        let second = summarizer.summarize(input(&intent, Some(&result)), &mut context).await;

        let first = first.follow_up.expect("first question");
        let second = second.follow_up.expect("second question");
        assert_ne!(first, second);
        assert_eq!(context.last_follow_up.as_deref(), Some(first.as_str()));
        assert_eq!(context.next_follow_up.as_deref(), Some(second.as_str()));
        assert_eq!(first, "Would you like to see a 30-day call and SMS report for this contact?");
    }

    #[tokio::test]
    async fn every_reply_ends_in_exactly_one_question() {
        let llm = ScriptedLlm::default()
            .route(SUMMARY_ROLE, r#"{"summary":"You have one open task: send the proposal."}"#);
        let intent = tasks_intent();
        let result = DispatchResult::from_raw(json!({"data": [{"title": "Send proposal"}]}), None);
        let mut context = ConversationContext::default();

        let summary = summarizer(llm).summarize(input(&intent, Some(&result)), &mut context).await;

        assert!(summary.text.contains("You have one open task"));
        assert_eq!(summary.text.matches('?').count(), 1);
        assert!(summary.text.ends_with('?'));
    }

    #[tokio::test]
    async fn oracle_prose_with_a_question_is_rejected() {
        let llm = ScriptedLlm::default()
            .route(SUMMARY_ROLE, r#"{"summary":"One task. Want me to close it?"}"#);
        let intent = tasks_intent();
        let result = DispatchResult::from_raw(json!({"data": [{"title": "Send proposal"}]}), None);
        let mut context = ConversationContext::default();

        let summary = summarizer(llm).summarize(input(&intent, Some(&result)), &mut context).await;

        assert!(!summary.text.contains("Want me to close it"));
        assert!(summary.text.contains("Found 1 tasks:"));
    }

    #[tokio::test]
    async fn general_intents_get_coaching_or_the_fixed_fallback() {
        let intent = IntentDescriptor::general();
        let mut context = ConversationContext::default();
        let coached = summarizer(
            ScriptedLlm::default()
                .route(COACH_ROLE, r#"{"summary":"Lead with the customer's goal, then the price."}"#),
        )
        .summarize(input(&intent, None), &mut context)
        .await;
        assert!(coached.text.contains("Lead with the customer's goal"));

        let fallback = summarizer(ScriptedLlm::failing())
            .summarize(input(&intent, None), &mut ConversationContext::default())
            .await;
        assert!(fallback.text.contains("I can help with coaching"));
        assert!(fallback.follow_up.is_some());
    }

    #[test]
    fn activity_counts_directions_and_marks_recordings() {
        let intent = activity_intent(7);
        let result = DispatchResult::from_raw(
            json!({"data": [
                {"type": "call", "direction": "inbound", "date": "2026-03-10", "recording_url": "https://r/1"},
                {"type": "call", "direction": "outbound", "date": "2026-03-11"},
                {"type": "call", "direction": "inbound", "status": "missed"},
                {"type": "sms", "direction": "outbound"},
            ]}),
            None,
        );

        let facts = render_facts(&intent, Some(&result));

        assert!(facts.contains("Calls: 1 incoming, 1 outgoing, 1 missed."));
        assert!(facts.contains("Messages: 0 incoming, 1 outgoing."));
        assert!(facts.contains("- 2026-03-10 incoming call [recording available]"));
        assert!(facts.contains("- 2026-03-11 outgoing call [no recording]"));
    }

    #[test]
    fn facts_only_mention_returned_fields() {
        let result = DispatchResult::from_raw(json!({"data": [{"title": "Call back"}]}), None);
        let facts = render_facts(&tasks_intent(), Some(&result));
        assert_eq!(facts, "Found 1 tasks:\n- title: Call back");

        let empty = DispatchResult::from_raw(json!({"results": []}), None);
        assert_eq!(render_facts(&tasks_intent(), Some(&empty)), "No tasks found.");

        let trimmed = DispatchResult::from_raw(json!({"data": [{"title": "a"}, {"title": "b"}]}), Some(1));
        assert!(render_facts(&tasks_intent(), Some(&trimmed)).starts_with("Showing 1 of 2 tasks:"));
    }

    #[test]
    fn stats_render_scalar_fields() {
        let intent = IntentDescriptor::new(IntentKind::Stats);
        let result =
            DispatchResult::from_raw(json!({"data": {"totalCalls": 12, "missed_calls": 2, "breakdown": []}}), None);
        let facts = render_facts(&intent, Some(&result));
        assert!(facts.contains("- total calls: 12"));
        assert!(facts.contains("- missed calls: 2"));
        assert!(!facts.contains("breakdown"));
    }

    #[test]
    fn follow_up_extraction_takes_the_terminal_question() {
        assert_eq!(
            extract_follow_up("Hi,\n\nDone. Anything else? Would you like to see page 2?\n"),
            Some("Would you like to see page 2?".to_string())
        );
        assert_eq!(extract_follow_up("No question here."), None);
    }
}
