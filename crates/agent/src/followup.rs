//! Re-reads a pending follow-up question when the user just says "yes".
//!
//! Two oracle calls run side by side: one decides what kind of request the
//! question proposes, the other how far back it looks. Neither failure aborts
//! the turn; the timeframe falls back to the same phrase table the prompt is
//! rendered from, the type falls back to an activity report.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use coachline_core::endpoints::{CrmAction, CrmOperation};
use coachline_core::intent::{
    number, DataTypeFlags, DateRange, IntentDescriptor, IntentKind, WindowDefaults, MAX_WINDOW_DAYS,
    THIS_CONTACT,
};

use crate::llm::{complete_json, LlmClient};

pub(crate) const TYPE_ROLE: &str = "You classify a pending follow-up question.";
pub(crate) const TIMEFRAME_ROLE: &str = "You extract the timeframe of a follow-up question.";

const AFFIRMATIVES: &[&str] = &["yes", "ok", "yep", "sure", "do it", "yeah", "yup"];

/// Timeframe phrases, most specific first.
const TIMEFRAME_PHRASES: &[(&str, u32)] = &[
    ("yesterday", 1),
    ("today", 1),
    ("two weeks", 14),
    ("last week", 7),
    ("past week", 7),
    ("this week", 7),
    ("last month", 30),
    ("past month", 30),
    ("this month", 30),
    ("quarter", 90),
    ("six months", 180),
    ("6 months", 180),
    ("half year", 180),
    ("year", 365),
];

const TYPE_RULES: &[(&str, &str)] = &[
    ("call, SMS, text message or report phrasing", "activity"),
    ("activity log, activity summary or statistics phrasing", "stats"),
    ("contact search phrasing", "crm with action contactSearch"),
    ("task phrasing", "crm with action tasks"),
    ("appointment or meeting phrasing", "crm with action appointments"),
    ("note phrasing", "crm with action notes"),
    ("opportunity or deal phrasing", "crm with action opportunities"),
];

/// `yes`, `ok`, `yep`, `sure`, `do it`, `yeah`, `yup`, ignoring case and
/// trailing punctuation.
pub fn is_bare_affirmative(input: &str) -> bool {
    let trimmed = input
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_ascii_lowercase();
    AFFIRMATIVES.contains(&trimmed.as_str())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeframe {
    /// Zero keeps the caller's default window.
    pub days: u32,
    pub data_types: DataTypeFlags,
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Deterministic reading of a question's timeframe and data types.
pub fn timeframe_from_phrases(question: &str) -> Timeframe {
    static SPAN: OnceLock<Option<Regex>> = OnceLock::new();
    let lowered = question.to_ascii_lowercase();

    let counted = cached(&SPAN, r"\b(\d{1,3})[\s-]*(day|days|week|weeks|month|months)\b")
        .and_then(|regex| regex.captures(&lowered))
        .and_then(|captures| {
            let count = captures.get(1)?.as_str().parse::<u32>().ok()?;
            let unit = match captures.get(2)?.as_str() {
                "week" | "weeks" => 7,
                "month" | "months" => 30,
                _ => 1,
            };
            Some(count.saturating_mul(unit))
        });
    let days = counted
        .or_else(|| {
            TIMEFRAME_PHRASES
                .iter()
                .find(|(phrase, _)| lowered.contains(phrase))
                .map(|(_, days)| *days)
        })
        .unwrap_or(0);

    let calls = ["call", "phone"].iter().any(|word| lowered.contains(word));
    let messages = ["sms", "text", "message"].iter().any(|word| lowered.contains(word));
    Timeframe { days, data_types: DataTypeFlags::normalized(calls, messages) }
}

/// Page number from "page 3" style questions.
pub fn requested_page(question: &str) -> Option<u32> {
    static PAGE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&PAGE, r"(?i)\bpage\s+(\d{1,5})\b")
        .and_then(|regex| regex.captures(question))
        .and_then(|captures| captures.get(1)?.as_str().parse().ok())
        .filter(|page| *page > 0)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawType {
    #[serde(rename = "type", alias = "intent")]
    intent_type: Option<String>,
    action: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTimeframe {
    days: Option<Value>,
    #[serde(alias = "includeCalls")]
    include_calls: Option<bool>,
    #[serde(alias = "includeMessages", alias = "includeSms")]
    include_messages: Option<bool>,
}

#[derive(Clone)]
pub struct FollowUpAnalyzer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    windows: WindowDefaults,
}

impl FollowUpAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration, windows: WindowDefaults) -> Self {
        Self { llm, timeout, windows }
    }

    /// Builds the intent the pending `question` proposed.
    pub async fn analyze(&self, question: &str, today: NaiveDate) -> IntentDescriptor {
        let type_context = type_instructions();
        let timeframe_context = timeframe_instructions();
        let prompt = format!("Follow-up question: \"{question}\"");

        let (kind, timeframe) = tokio::join!(
            complete_json(self.llm.as_ref(), &prompt, &type_context, self.timeout),
            complete_json(self.llm.as_ref(), &prompt, &timeframe_context, self.timeout),
        );

        let kind = kind.map_err(|error| error.to_string()).and_then(parse_kind).unwrap_or_else(
            |reason| {
                warn!(
                    event_name = "followup.type.fallback",
                    reason = %reason,
                    "follow-up type analysis failed, assuming activity"
                );
                IntentKind::Activity
            },
        );
        let timeframe = match timeframe {
            Ok(answer) => parse_timeframe(answer),
            Err(error) => {
                debug!(
                    event_name = "followup.timeframe.fallback",
                    reason = %error,
                    "timeframe analysis failed, using phrase table"
                );
                timeframe_from_phrases(question)
            }
        };

        let mut intent = IntentDescriptor::new(kind);
        intent.subject.contact = Some(THIS_CONTACT.to_string());
        intent.data_types = timeframe.data_types;
        intent.date_range = if timeframe.days > 0 {
            Some(DateRange::last_days(today, timeframe.days))
        } else {
            self.windows.for_kind(&kind).map(|days| DateRange::last_days(today, days))
        };
        intent.page = requested_page(question);
        debug!(
            event_name = "followup.reclassified",
            intent_type = kind.label(),
            days = timeframe.days,
            page = intent.page.unwrap_or_default(),
            "pending follow-up reclassified"
        );
        intent
    }
}

fn parse_kind(answer: Value) -> Result<IntentKind, String> {
    let raw: RawType = serde_json::from_value(answer).map_err(|error| error.to_string())?;
    match raw.intent_type.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("activity") => Ok(IntentKind::Activity),
        Some("stats") => Ok(IntentKind::Stats),
        Some("crm") => raw
            .action
            .as_deref()
            .and_then(CrmAction::parse)
            .map(|action| IntentKind::Crm { action, operation: CrmOperation::List })
            .ok_or_else(|| "crm follow-up without a known action".to_string()),
        other => Err(format!("unexpected follow-up type {other:?}")),
    }
}

fn parse_timeframe(answer: Value) -> Timeframe {
    let raw: RawTimeframe = serde_json::from_value(answer).unwrap_or_default();
    let days = number(raw.days.as_ref())
        .filter(|days| days.is_finite() && *days >= 0.0 && *days <= f64::from(MAX_WINDOW_DAYS))
        .map(|days| days.round() as u32)
        .unwrap_or(0);
    Timeframe {
        days,
        data_types: DataTypeFlags::normalized(
            raw.include_calls.unwrap_or(true),
            raw.include_messages.unwrap_or(true),
        ),
    }
}

fn type_instructions() -> String {
    let rules = TYPE_RULES
        .iter()
        .map(|(phrasing, answer)| format!("- {phrasing} -> {answer}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{TYPE_ROLE}\nDecide what the question offers to show.\n{rules}\n\
         Answer with one JSON object: {{\"type\": \"activity\"|\"stats\"|\"crm\", \"action\": \"...\"}}. \
         Include action only for crm."
    )
}

fn timeframe_instructions() -> String {
    let phrases = TIMEFRAME_PHRASES
        .iter()
        .map(|(phrase, days)| format!("- \"{phrase}\" = {days}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{TIMEFRAME_ROLE}\nMap phrases to a day count:\n{phrases}\n- \"N-day\" or \"N days\" = N\n\
         Use 0 when no timeframe is stated.\n\
         Set includeCalls / includeMessages from call and SMS wording; both true when neither is named.\n\
         Answer with one JSON object: {{\"days\": number, \"includeCalls\": bool, \"includeMessages\": bool}}."
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;

    use coachline_core::endpoints::{CrmAction, CrmOperation};
    use coachline_core::intent::{DataTypeFlags, IntentKind, WindowDefaults, THIS_CONTACT};

    use super::{
        is_bare_affirmative, requested_page, timeframe_from_phrases, FollowUpAnalyzer,
        TIMEFRAME_ROLE, TYPE_ROLE,
    };
    use crate::testing::ScriptedLlm;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).expect("valid date")
    }

    fn analyzer(llm: ScriptedLlm) -> (Arc<ScriptedLlm>, FollowUpAnalyzer) {
        let llm = Arc::new(llm);
        let analyzer =
            FollowUpAnalyzer::new(llm.clone(), Duration::from_secs(2), WindowDefaults::default());
        (llm, analyzer)
    }

    #[test]
    fn affirmatives_ignore_case_and_trailing_punctuation() {
        for input in ["yes", "Yes!", " OK. ", "do it", "Yup!!", "sure?"] {
            assert!(is_bare_affirmative(input), "{input}");
        }
        for input in ["yes please show notes", "no", "", "okay then"] {
            assert!(!is_bare_affirmative(input), "{input}");
        }
    }

    #[test]
    fn phrase_table_reads_spans_and_flags() {
        let report = timeframe_from_phrases("Would you like to see a 30-day call and SMS report?");
        assert_eq!(report.days, 30);
        assert_eq!(report.data_types, DataTypeFlags { calls: true, messages: true });

        let calls = timeframe_from_phrases("Want the calls from last quarter?");
        assert_eq!(calls.days, 90);
        assert_eq!(calls.data_types, DataTypeFlags { calls: true, messages: false });

        assert_eq!(timeframe_from_phrases("Shall I check 2 weeks of texts?").days, 14);
        assert_eq!(timeframe_from_phrases("Want to see the tasks?").days, 0);
    }

    #[test]
    fn page_numbers_are_read_from_pagination_questions() {
        assert_eq!(requested_page("Would you like to see page 3 of these tasks?"), Some(3));
        assert_eq!(requested_page("Would you like to see more?"), None);
    }

    #[tokio::test]
    async fn thirty_day_report_question_becomes_activity_for_this_contact() {
        let (llm, analyzer) = analyzer(
            ScriptedLlm::default()
                .route(TYPE_ROLE, r#"{"type":"activity"}"#)
                .route(TIMEFRAME_ROLE, r#"{"days":30,"includeCalls":true,"includeMessages":true}"#),
        );

        let intent = analyzer
            .analyze("Would you like to see a 30-day call and SMS report?", today())
            .await;

        assert_eq!(intent.kind, IntentKind::Activity);
        assert_eq!(intent.subject.contact.as_deref(), Some(THIS_CONTACT));
        let range = intent.date_range.expect("window");
        assert_eq!(range.end, today());
        assert_eq!(range.days(), 30);
        assert_eq!(llm.calls().len(), 2);
    }

    #[tokio::test]
    async fn oracle_failures_fall_back_to_activity_and_phrase_table() {
        let (_, analyzer) = analyzer(ScriptedLlm::failing());

        let intent = analyzer
            .analyze("Would you like to see a 30-day call and SMS report?", today())
            .await;

        assert_eq!(intent.kind, IntentKind::Activity);
        assert_eq!(intent.subject.contact.as_deref(), Some(THIS_CONTACT));
        assert_eq!(intent.date_range.map(|range| range.days()), Some(30));
    }

    #[tokio::test]
    async fn crm_follow_up_keeps_action_and_page() {
        let (_, analyzer) = analyzer(
            ScriptedLlm::default()
                .route(TYPE_ROLE, r#"{"type":"crm","action":"tasks"}"#)
                .route(TIMEFRAME_ROLE, r#"{"days":0}"#),
        );

        let intent =
            analyzer.analyze("Would you like to see page 3 of these tasks?", today()).await;

        assert_eq!(
            intent.kind,
            IntentKind::Crm { action: CrmAction::Tasks, operation: CrmOperation::List }
        );
        assert_eq!(intent.page, Some(3));
        assert_eq!(intent.date_range, None);
    }

    #[tokio::test]
    async fn zero_days_keeps_the_default_stats_window() {
        let (_, analyzer) = analyzer(
            ScriptedLlm::default()
                .route(TYPE_ROLE, r#"{"type":"stats"}"#)
                .route(TIMEFRAME_ROLE, r#"{"days":0,"includeCalls":true,"includeMessages":true}"#),
        );

        let intent =
            analyzer.analyze("Would you like an activity summary for this contact?", today()).await;

        assert_eq!(intent.kind, IntentKind::Stats);
        assert_eq!(intent.date_range.map(|range| range.days()), Some(30));
    }
}
