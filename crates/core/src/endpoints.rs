//! Static CRM endpoint rules and request validation.
//!
//! Every logical CRM action maps to one rule per operation. A rule knows its
//! path template, HTTP method, required fields, and the date format the CRM
//! expects for that action. Date formats differ between actions, so
//! formatting always goes through the rule.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;

pub const CONTACT_PLACEHOLDER: &str = "{contactId}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrmAction {
    #[serde(rename = "contactSearch")]
    ContactSearch,
    #[serde(rename = "appointments")]
    Appointments,
    #[serde(rename = "opportunities")]
    Opportunities,
    #[serde(rename = "eventform")]
    EventForm,
    #[serde(rename = "notes")]
    Notes,
    #[serde(rename = "tasks")]
    Tasks,
    #[serde(rename = "activity")]
    Activity,
    #[serde(rename = "activitySummary")]
    ActivitySummary,
}

impl std::fmt::Display for CrmAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl CrmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactSearch => "contactSearch",
            Self::Appointments => "appointments",
            Self::Opportunities => "opportunities",
            Self::EventForm => "eventform",
            Self::Notes => "notes",
            Self::Tasks => "tasks",
            Self::Activity => "activity",
            Self::ActivitySummary => "activitySummary",
        }
    }

    /// Parses an action a user (or the oracle) can ask for directly.
    /// Activity reads are reached through their own intent types instead.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "contactsearch" | "contact_search" | "search" | "contacts" | "contact" => {
                Some(Self::ContactSearch)
            }
            "appointments" | "appointment" | "meetings" | "meeting" | "calendar" => {
                Some(Self::Appointments)
            }
            "opportunities" | "opportunity" | "deals" | "deal" | "pipeline" => {
                Some(Self::Opportunities)
            }
            "eventform" | "event_form" | "events" | "event" => Some(Self::EventForm),
            "notes" | "note" => Some(Self::Notes),
            "tasks" | "task" | "todo" | "todos" => Some(Self::Tasks),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmOperation {
    #[default]
    List,
    Create,
}

impl CrmOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Create => "create",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "list" | "get" | "read" | "show" | "search" | "find" => Some(Self::List),
            "create" | "add" | "post" | "new" | "log" | "schedule" => Some(Self::Create),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    /// `2026-10-19`
    YearMonthDay,
    /// `19-10-2026`
    DayMonthYear,
}

impl DateFormat {
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::YearMonthDay => "%Y-%m-%d",
            Self::DayMonthYear => "%d-%m-%Y",
        }
    }

    pub fn format(&self, date: NaiveDate) -> String {
        date.format(self.pattern()).to_string()
    }
}

/// Reads a date written in either supported format, or the date part of an
/// RFC 3339 timestamp.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    [DateFormat::YearMonthDay, DateFormat::DayMonthYear]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format.pattern()).ok())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointRule {
    pub action: CrmAction,
    pub operation: CrmOperation,
    pub path_template: &'static str,
    pub method: HttpMethod,
    pub required_all: &'static [&'static str],
    pub required_one_of: &'static [&'static str],
    pub date_format: DateFormat,
    /// Params holding dates that must be rendered in `date_format`.
    pub date_fields: &'static [&'static str],
    /// Params receiving an intent's date window, as `(start, end)`.
    pub range_fields: Option<(&'static str, &'static str)>,
}

impl EndpointRule {
    pub fn needs_contact_id(&self) -> bool {
        self.path_template.contains(CONTACT_PLACEHOLDER)
    }

    pub fn build_path(&self, contact_id: Option<&str>) -> Result<String, ValidationError> {
        if !self.needs_contact_id() {
            return Ok(self.path_template.to_string());
        }
        let contact_id = contact_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ValidationError::MissingContactId {
                action: self.action.to_string(),
            })?;
        Ok(self.path_template.replace(CONTACT_PLACEHOLDER, contact_id))
    }

    pub fn matches(&self, path: &str, method: HttpMethod) -> bool {
        if self.method != method {
            return false;
        }
        let path = path.split('?').next().unwrap_or(path);
        let template_segments = self.path_template.trim_matches('/').split('/');
        let path_segments = path.trim_matches('/').split('/');
        if template_segments.clone().count() != path_segments.clone().count() {
            return false;
        }
        template_segments.zip(path_segments).all(|(template, segment)| {
            if template.starts_with('{') && template.ends_with('}') {
                !segment.trim().is_empty()
            } else {
                template == segment
            }
        })
    }

    /// Writes the window into this rule's range params, in this rule's format.
    pub fn apply_date_range(&self, params: &mut Map<String, Value>, start: NaiveDate, end: NaiveDate) {
        if let Some((start_field, end_field)) = self.range_fields {
            params.insert(start_field.to_string(), Value::String(self.date_format.format(start)));
            params.insert(end_field.to_string(), Value::String(self.date_format.format(end)));
        }
    }

    /// Re-renders any recognizable date in this rule's date params.
    pub fn format_dates(&self, params: &mut Map<String, Value>) {
        for field in self.date_fields {
            let Some(Value::String(raw)) = params.get(*field) else {
                continue;
            };
            if let Some(date) = parse_date(raw) {
                params.insert((*field).to_string(), Value::String(self.date_format.format(date)));
            }
        }
    }
}

const YMD_RANGE: Option<(&str, &str)> = Some(("start_date", "end_date"));

static RULES: &[EndpointRule] = &[
    EndpointRule {
        action: CrmAction::ContactSearch,
        operation: CrmOperation::List,
        path_template: "/contacts/search",
        method: HttpMethod::Get,
        required_all: &[],
        required_one_of: &["search", "contact_id"],
        date_format: DateFormat::YearMonthDay,
        date_fields: &[],
        range_fields: None,
    },
    EndpointRule {
        action: CrmAction::Appointments,
        operation: CrmOperation::List,
        path_template: "/contacts/{contactId}/appointments",
        method: HttpMethod::Get,
        required_all: &[],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["start_date", "end_date"],
        range_fields: YMD_RANGE,
    },
    EndpointRule {
        action: CrmAction::Appointments,
        operation: CrmOperation::Create,
        path_template: "/appointments",
        method: HttpMethod::Post,
        required_all: &["contact_id", "start_date"],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["start_date", "end_date"],
        range_fields: None,
    },
    EndpointRule {
        action: CrmAction::Opportunities,
        operation: CrmOperation::List,
        path_template: "/contacts/{contactId}/opportunities",
        method: HttpMethod::Get,
        required_all: &[],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["start_date", "end_date"],
        range_fields: None,
    },
    EndpointRule {
        action: CrmAction::Opportunities,
        operation: CrmOperation::Create,
        path_template: "/opportunities",
        method: HttpMethod::Post,
        required_all: &["contact_id", "name"],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["close_date"],
        range_fields: None,
    },
    EndpointRule {
        action: CrmAction::EventForm,
        operation: CrmOperation::List,
        path_template: "/contacts/{contactId}/eventform",
        method: HttpMethod::Get,
        required_all: &[],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["start_date", "end_date"],
        range_fields: YMD_RANGE,
    },
    EndpointRule {
        action: CrmAction::EventForm,
        operation: CrmOperation::Create,
        path_template: "/eventform",
        method: HttpMethod::Post,
        required_all: &["event_type"],
        required_one_of: &["contact_id", "phone_id"],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["event_date"],
        range_fields: None,
    },
    EndpointRule {
        action: CrmAction::Notes,
        operation: CrmOperation::List,
        path_template: "/contacts/{contactId}/notes",
        method: HttpMethod::Get,
        required_all: &[],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["start_date", "end_date"],
        range_fields: YMD_RANGE,
    },
    EndpointRule {
        action: CrmAction::Notes,
        operation: CrmOperation::Create,
        path_template: "/notes",
        method: HttpMethod::Post,
        required_all: &["contact_id", "note"],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &[],
        range_fields: None,
    },
    EndpointRule {
        action: CrmAction::Tasks,
        operation: CrmOperation::List,
        path_template: "/contacts/{contactId}/tasks",
        method: HttpMethod::Get,
        required_all: &[],
        required_one_of: &[],
        date_format: DateFormat::DayMonthYear,
        date_fields: &["due_from", "due_to"],
        range_fields: Some(("due_from", "due_to")),
    },
    EndpointRule {
        action: CrmAction::Tasks,
        operation: CrmOperation::Create,
        path_template: "/tasks",
        method: HttpMethod::Post,
        required_all: &["contact_id"],
        required_one_of: &[],
        date_format: DateFormat::DayMonthYear,
        date_fields: &["due_date"],
        range_fields: None,
    },
    EndpointRule {
        action: CrmAction::Activity,
        operation: CrmOperation::List,
        path_template: "/contacts/{contactId}/activity",
        method: HttpMethod::Get,
        required_all: &["start_date", "end_date"],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["start_date", "end_date"],
        range_fields: YMD_RANGE,
    },
    EndpointRule {
        action: CrmAction::ActivitySummary,
        operation: CrmOperation::List,
        path_template: "/contacts/{contactId}/activity/summary",
        method: HttpMethod::Get,
        required_all: &["start_date", "end_date"],
        required_one_of: &[],
        date_format: DateFormat::YearMonthDay,
        date_fields: &["start_date", "end_date"],
        range_fields: YMD_RANGE,
    },
];

pub fn rules() -> &'static [EndpointRule] {
    RULES
}

pub fn rule_for(action: CrmAction, operation: CrmOperation) -> Option<&'static EndpointRule> {
    RULES.iter().find(|rule| rule.action == action && rule.operation == operation)
}

pub fn find_rule(path: &str, method: HttpMethod) -> Option<&'static EndpointRule> {
    RULES.iter().find(|rule| rule.matches(path, method))
}

/// Checks `params` against the rule matching `path` + `method`.
///
/// Explicit requirement lists replace the rule-derived ones. A path with no
/// matching rule and no explicit lists passes.
pub fn validate_required(
    path: &str,
    method: HttpMethod,
    params: &Map<String, Value>,
    explicit_required_all: Option<&[&str]>,
    explicit_required_one_of: Option<&[&str]>,
) -> Result<(), ValidationError> {
    let rule = find_rule(path, method);
    let required_all = explicit_required_all.or(rule.map(|rule| rule.required_all)).unwrap_or(&[]);
    let required_one_of =
        explicit_required_one_of.or(rule.map(|rule| rule.required_one_of)).unwrap_or(&[]);

    let missing = required_all
        .iter()
        .filter(|field| !is_present(params.get(**field)))
        .map(|field| (*field).to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields { fields: missing });
    }

    if !required_one_of.is_empty()
        && !required_one_of.iter().any(|field| is_present(params.get(*field)))
    {
        return Err(ValidationError::MissingOneOf {
            fields: required_one_of.iter().map(|field| (*field).to_string()).collect(),
        });
    }

    Ok(())
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}
