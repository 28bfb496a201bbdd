//! Structured intent produced by classification.
//!
//! The oracle answers with loosely shaped JSON. `RawIntent` accepts anything
//! resembling one of the four documented shapes; `IntentDescriptor::from_raw`
//! turns it into a closed type or rejects it, so business logic never sees an
//! untyped map.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::endpoints::{parse_date, CrmAction, CrmOperation};

/// Longest window an oracle answer may ask for.
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// The literal the classifier and follow-up analyzer use for "the contact in
/// context".
pub const THIS_CONTACT: &str = "this contact";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentKind {
    Crm { action: CrmAction, operation: CrmOperation },
    Activity,
    Stats,
    General,
}

impl IntentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Crm { .. } => "crm",
            Self::Activity => "activity",
            Self::Stats => "stats",
            Self::General => "general",
        }
    }

    /// Whether dispatch needs a resolved contact first.
    pub fn needs_contact(&self) -> bool {
        match self {
            Self::Activity | Self::Stats => true,
            Self::Crm { action, operation } => match (action, operation) {
                (CrmAction::ContactSearch, _) => false,
                (_, CrmOperation::List) => true,
                (CrmAction::EventForm, CrmOperation::Create) => false,
                (_, CrmOperation::Create) => true,
            },
            Self::General => false,
        }
    }
}

/// Who the request is about, as the user phrased it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

impl SubjectRef {
    /// First non-blank of `search`, `contact`, `name`, `company`.
    pub fn search_candidate(&self) -> Option<&str> {
        [&self.search, &self.contact, &self.name, &self.company]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.search_candidate().is_none()
            && self.contact_id.as_deref().map(str::trim).unwrap_or_default().is_empty()
    }

    /// Replaces every `"this contact"` literal with the given id.
    /// Returns whether anything was replaced.
    pub fn bind_this_contact(&mut self, contact_id: &str) -> bool {
        let mut replaced = false;
        for field in [&mut self.search, &mut self.contact, &mut self.name, &mut self.company] {
            if field.as_deref().map(is_this_contact).unwrap_or(false) {
                *field = None;
                replaced = true;
            }
        }
        if replaced {
            self.contact_id = Some(contact_id.to_string());
        }
        replaced
    }
}

pub fn is_this_contact(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(THIS_CONTACT)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days`-long window ending on `today`, clamped to the earliest
    /// representable date.
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let start = today
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DataTypeFlags {
    pub calls: bool,
    pub messages: bool,
}

impl Default for DataTypeFlags {
    fn default() -> Self {
        Self { calls: true, messages: true }
    }
}

impl DataTypeFlags {
    /// Neither flag set means the caller did not narrow anything.
    pub fn normalized(calls: bool, messages: bool) -> Self {
        if !calls && !messages {
            Self::default()
        } else {
            Self { calls, messages }
        }
    }
}

/// Default windows for activity-style intents that did not name one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowDefaults {
    pub activity_days: u32,
    pub stats_days: u32,
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self { activity_days: 7, stats_days: 30 }
    }
}

impl WindowDefaults {
    pub fn for_kind(&self, kind: &IntentKind) -> Option<u32> {
        match kind {
            IntentKind::Activity => Some(self.activity_days),
            IntentKind::Stats => Some(self.stats_days),
            IntentKind::Crm { .. } | IntentKind::General => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentDescriptor {
    pub kind: IntentKind,
    pub subject: SubjectRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    pub data_types: DataTypeFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl IntentDescriptor {
    pub fn new(kind: IntentKind) -> Self {
        Self {
            kind,
            subject: SubjectRef::default(),
            date_range: None,
            data_types: DataTypeFlags::default(),
            page: None,
            limit: None,
            params: Map::new(),
        }
    }

    pub fn general() -> Self {
        Self::new(IntentKind::General)
    }

    pub fn is_general(&self) -> bool {
        matches!(self.kind, IntentKind::General)
    }

    /// Converts an oracle answer into a closed intent.
    pub fn from_raw(
        raw: RawIntent,
        today: NaiveDate,
        defaults: WindowDefaults,
    ) -> Result<Self, IntentParseError> {
        let raw_type = raw.intent_type.as_deref().map(str::trim).unwrap_or_default();
        let kind = match raw_type.to_ascii_lowercase().as_str() {
            "crm" => {
                let action_text = raw.action.as_deref().unwrap_or_default();
                let action = CrmAction::parse(action_text)
                    .ok_or_else(|| IntentParseError::MissingAction(action_text.to_string()))?;
                let operation = raw
                    .operation
                    .as_deref()
                    .and_then(CrmOperation::parse)
                    .unwrap_or_default();
                IntentKind::Crm { action, operation }
            }
            "activity" => IntentKind::Activity,
            "stats" | "statistics" | "summary" => IntentKind::Stats,
            "general" => IntentKind::General,
            "" => return Err(IntentParseError::MissingType),
            other => return Err(IntentParseError::UnknownType(other.to_string())),
        };

        if matches!(kind, IntentKind::General) {
            return Ok(Self::general());
        }

        let subject = SubjectRef {
            search: text(raw.search.as_ref()),
            contact: text(raw.contact.as_ref()),
            name: text(raw.name.as_ref()),
            company: text(raw.company.as_ref()),
            contact_id: text(raw.contact_id.as_ref()),
        };

        let explicit_range = match (
            raw.start_date.as_deref().and_then(parse_date),
            raw.end_date.as_deref().and_then(parse_date),
        ) {
            (Some(start), Some(end)) if start <= end => Some(DateRange { start, end }),
            (Some(start), None) if start <= today => Some(DateRange { start, end: today }),
            _ => None,
        };
        let date_range = explicit_range
            .or_else(|| {
                number(raw.days.as_ref())
                    .and_then(positive_u32)
                    .map(|days| DateRange::last_days(today, days.min(MAX_WINDOW_DAYS)))
            })
            .or_else(|| defaults.for_kind(&kind).map(|days| DateRange::last_days(today, days)));

        let data_types = DataTypeFlags::normalized(
            raw.include_calls.unwrap_or(true),
            raw.include_messages.unwrap_or(true),
        );

        Ok(Self {
            kind,
            subject,
            date_range,
            data_types,
            page: number(raw.page.as_ref()).and_then(positive_u32),
            limit: number(raw.limit.as_ref()).and_then(positive_u32),
            params: raw.params.unwrap_or_default(),
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntentParseError {
    #[error("intent has no type")]
    MissingType,
    #[error("unknown intent type `{0}`")]
    UnknownType(String),
    #[error("crm intent has no recognizable action (`{0}`)")]
    MissingAction(String),
}

/// Loose view of an oracle classification answer.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawIntent {
    #[serde(rename = "type", alias = "intent")]
    pub intent_type: Option<String>,
    pub action: Option<String>,
    pub operation: Option<String>,
    #[serde(alias = "searchTerm", alias = "search_term", alias = "query")]
    pub search: Option<Value>,
    pub contact: Option<Value>,
    pub name: Option<Value>,
    pub company: Option<Value>,
    #[serde(alias = "contactId")]
    pub contact_id: Option<Value>,
    #[serde(alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(alias = "endDate")]
    pub end_date: Option<String>,
    pub days: Option<Value>,
    #[serde(alias = "includeCalls")]
    pub include_calls: Option<bool>,
    #[serde(alias = "includeMessages", alias = "includeSms")]
    pub include_messages: Option<bool>,
    pub page: Option<Value>,
    pub limit: Option<Value>,
    pub params: Option<Map<String, Value>>,
}

/// Scalar JSON rendered as trimmed text; blanks and non-scalars are absent.
pub fn text(value: Option<&Value>) -> Option<String> {
    let rendered = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!rendered.is_empty()).then_some(rendered)
}

/// Numbers, or strings holding numbers.
pub fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn positive_u32(value: f64) -> Option<u32> {
    (value.is_finite() && value >= 1.0 && value <= f64::from(u32::MAX)).then(|| value as u32)
}
