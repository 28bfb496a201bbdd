//! Executes validated CRM calls and normalizes what comes back.
//!
//! Validation and per-action date formatting happen in [`CrmDispatcher::prepare`],
//! before the transport sees anything. The transport only moves bytes; where
//! credentials travel (query for GET, headers otherwise) is decided here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use coachline_core::endpoints::{validate_required, EndpointRule, HttpMethod};
use coachline_core::errors::ValidationError;
use coachline_core::intent::DateRange;
use coachline_core::profile::CrmCredentials;

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const API_SECRET_HEADER: &str = "X-Api-Secret";

#[derive(Clone, Debug)]
pub struct CrmRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Map<String, Value>,
    pub credentials: CrmCredentials,
}

impl CrmRequest {
    /// Query string pairs, credentials included, for GET requests.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        if self.method != HttpMethod::Get {
            return Vec::new();
        }
        let mut pairs = self
            .params
            .iter()
            .filter_map(|(key, value)| query_value(value).map(|value| (key.clone(), value)))
            .collect::<Vec<_>>();
        pairs.push(("api_key".to_string(), self.credentials.api_key.expose_secret().to_string()));
        pairs.push((
            "api_secret".to_string(),
            self.credentials.api_secret.expose_secret().to_string(),
        ));
        pairs
    }

    pub fn json_body(&self) -> Option<Value> {
        (self.method != HttpMethod::Get).then(|| Value::Object(self.params.clone()))
    }

    pub fn auth_headers(&self) -> Vec<(&'static str, String)> {
        if self.method == HttpMethod::Get {
            return Vec::new();
        }
        vec![
            (API_KEY_HEADER, self.credentials.api_key.expose_secret().to_string()),
            (API_SECRET_HEADER, self.credentials.api_secret.expose_secret().to_string()),
        ]
    }
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(items) => {
            let joined = items.iter().filter_map(query_value).collect::<Vec<_>>().join(",");
            (!joined.is_empty()).then_some(joined)
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrmResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait CrmTransport: Send + Sync {
    async fn send(&self, request: CrmRequest) -> Result<CrmResponse, TransportError>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("crm responded with status {status}")]
    Upstream { status: u16, body: String },
    #[error("crm transport failed: {0}")]
    Transport(String),
    #[error("crm response could not be decoded: {0}")]
    Decode(String),
    #[error("crm call timed out after {0:?}")]
    Timeout(Duration),
}

impl DispatchError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Upstream { status, .. } if (400..500).contains(status))
    }

    /// The upstream body, when it is JSON.
    pub fn upstream_json(&self) -> Option<Value> {
        match self {
            Self::Upstream { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: Option<u32>,
    pub total_pages: Option<u32>,
    pub has_next_page: bool,
}

impl Pagination {
    pub fn next_page(&self) -> Option<u32> {
        self.has_next_page.then(|| self.page.unwrap_or(1).saturating_add(1))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub raw: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl DispatchResult {
    /// Normalizes a raw payload. A positive `limit` trims the list while
    /// `total` keeps the untrimmed count.
    pub fn from_raw(raw: Value, limit: Option<u32>) -> Self {
        let list = match &raw {
            Value::Array(items) => Some(items.clone()),
            Value::Object(object) => ["data", "results"]
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_array).cloned()),
            _ => None,
        };

        let (list, total, returned) = match list {
            Some(mut items) => {
                let reported_total = raw.as_object().and_then(reported_total);
                let total = reported_total.unwrap_or(items.len() as u64);
                if let Some(limit) = limit.filter(|limit| *limit > 0) {
                    items.truncate(limit as usize);
                }
                let returned = items.len();
                (Some(items), Some(total), Some(returned))
            }
            None => (None, None, None),
        };

        let pagination = raw.as_object().and_then(parse_pagination);
        Self { raw, list, total, returned, pagination }
    }

    pub fn items(&self) -> &[Value] {
        self.list.as_deref().unwrap_or_default()
    }
}

fn reported_total(object: &Map<String, Value>) -> Option<u64> {
    ["total", "totalCount", "total_count"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_u64))
}

fn parse_pagination(object: &Map<String, Value>) -> Option<Pagination> {
    let nested = ["pagination", "meta"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_object));

    let page = lookup(object, nested, &["page", "currentPage", "current_page"]).and_then(as_u32);
    let total_pages =
        lookup(object, nested, &["totalPages", "total_pages", "pages"]).and_then(as_u32);
    let explicit_next =
        lookup(object, nested, &["hasNextPage", "has_next_page", "hasMore", "has_more"])
            .and_then(Value::as_bool);

    if page.is_none() && total_pages.is_none() && explicit_next.is_none() {
        return None;
    }

    let has_next_page = explicit_next.unwrap_or_else(|| match (page, total_pages) {
        (Some(page), Some(total_pages)) => page < total_pages,
        _ => false,
    });
    Some(Pagination { page, total_pages, has_next_page })
}

fn lookup<'a>(
    object: &'a Map<String, Value>,
    nested: Option<&'a Map<String, Value>>,
    keys: &[&str],
) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| nested.and_then(|nested| nested.get(*key)).or_else(|| object.get(*key)))
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|value| u32::try_from(value).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// One logical CRM call before validation.
#[derive(Clone, Debug)]
pub struct CrmCall {
    pub rule: &'static EndpointRule,
    pub contact_id: Option<String>,
    pub params: Map<String, Value>,
    pub date_range: Option<DateRange>,
    pub limit: Option<u32>,
}

impl CrmCall {
    pub fn new(rule: &'static EndpointRule) -> Self {
        Self { rule, contact_id: None, params: Map::new(), date_range: None, limit: None }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Clone)]
pub struct CrmDispatcher {
    transport: Arc<dyn CrmTransport>,
    timeout: Duration,
}

impl CrmDispatcher {
    pub fn new(transport: Arc<dyn CrmTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Builds the wire request, failing before any network traffic when the
    /// call does not satisfy its rule.
    pub fn prepare(
        &self,
        call: CrmCall,
        credentials: &CrmCredentials,
    ) -> Result<CrmRequest, DispatchError> {
        let rule = call.rule;
        let path = rule.build_path(call.contact_id.as_deref())?;

        let mut params = call.params;
        if let Some(range) = call.date_range {
            rule.apply_date_range(&mut params, range.start, range.end);
        }
        rule.format_dates(&mut params);
        if rule.method == HttpMethod::Get {
            if let Some(limit) = call.limit.filter(|limit| *limit > 0) {
                params.entry("limit").or_insert_with(|| Value::from(limit));
            }
        }

        validate_required(&path, rule.method, &params, None, None)?;

        Ok(CrmRequest { method: rule.method, path, params, credentials: credentials.clone() })
    }

    pub async fn dispatch(
        &self,
        call: CrmCall,
        credentials: &CrmCredentials,
    ) -> Result<DispatchResult, DispatchError> {
        let limit = call.limit;
        let action = call.rule.action;
        let request = self.prepare(call, credentials)?;
        debug!(
            event_name = "crm.dispatch.request",
            action = action.as_str(),
            method = request.method.as_str(),
            path = %request.path,
            "dispatching crm request"
        );

        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| DispatchError::Timeout(self.timeout))?
            .map_err(|error| match error {
                TransportError::Timeout => DispatchError::Timeout(self.timeout),
                TransportError::Failed(message) => DispatchError::Transport(message),
            })?;

        if !(200..300).contains(&response.status) {
            warn!(
                event_name = "crm.dispatch.upstream_error",
                action = action.as_str(),
                status = response.status,
                body = %truncate(&response.body, 512),
                "crm returned a non-success status"
            );
            return Err(DispatchError::Upstream { status: response.status, body: response.body });
        }

        let raw = decode_body(&response)?;
        let result = DispatchResult::from_raw(raw, limit);
        debug!(
            event_name = "crm.dispatch.completed",
            action = action.as_str(),
            status = response.status,
            returned = result.returned.unwrap_or_default(),
            "crm request completed"
        );
        Ok(result)
    }
}

fn decode_body(response: &CrmResponse) -> Result<Value, DispatchError> {
    let declared_json = response
        .content_type
        .as_deref()
        .map(|content_type| content_type.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    let trimmed = response.body.trim();

    if declared_json {
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(trimmed).map_err(|error| DispatchError::Decode(error.to_string()));
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Ok(value);
        }
    }
    Ok(Value::String(response.body.clone()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::{json, Value};

    use coachline_core::endpoints::{rule_for, CrmAction, CrmOperation, HttpMethod};
    use coachline_core::errors::ValidationError;
    use coachline_core::intent::DateRange;

    use super::{CrmCall, CrmDispatcher, DispatchError, DispatchResult, TransportError};
    use crate::testing::{credentials, json_response, RecordingTransport};

    fn dispatcher(transport: Arc<RecordingTransport>) -> CrmDispatcher {
        CrmDispatcher::new(transport, Duration::from_secs(5))
    }

    fn call(action: CrmAction, operation: CrmOperation) -> CrmCall {
        CrmCall::new(rule_for(action, operation).expect("rule exists"))
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_the_transport() {
        let transport = Arc::new(RecordingTransport::new(vec![]));
        let error = dispatcher(transport.clone())
            .dispatch(call(CrmAction::Tasks, CrmOperation::Create), &credentials())
            .await
            .expect_err("missing contact_id must fail");

        assert!(matches!(
            error,
            DispatchError::Validation(ValidationError::MissingFields { ref fields })
                if fields == &vec!["contact_id".to_string()]
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn get_requests_carry_credentials_in_the_query() {
        let transport = Arc::new(RecordingTransport::new(vec![json_response(200, json!({"data": []}))]));
        let mut tasks = call(CrmAction::Tasks, CrmOperation::List);
        tasks.contact_id = Some("C1".to_string());
        tasks.date_range = Some(DateRange {
            start: NaiveDate::from_ymd_opt(2026, 10, 1).expect("date"),
            end: NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"),
        });

        dispatcher(transport.clone()).dispatch(tasks, &credentials()).await.expect("dispatch");

        let request = transport.requests().pop().expect("one request");
        assert_eq!(request.path, "/contacts/C1/tasks");
        let query = request.query_pairs();
        assert!(query.contains(&("due_from".to_string(), "01-10-2026".to_string())));
        assert!(query.contains(&("due_to".to_string(), "19-10-2026".to_string())));
        assert!(query.contains(&("api_key".to_string(), "key-1".to_string())));
        assert!(request.auth_headers().is_empty());
        assert!(request.json_body().is_none());
    }

    #[tokio::test]
    async fn post_requests_send_json_body_and_header_credentials() {
        let transport = Arc::new(RecordingTransport::new(vec![json_response(201, json!({"id": "T9"}))]));
        let create = call(CrmAction::Tasks, CrmOperation::Create)
            .param("contact_id", "C1")
            .param("due_date", "2026-11-02");

        let result =
            dispatcher(transport.clone()).dispatch(create, &credentials()).await.expect("dispatch");
        assert_eq!(result.raw, json!({"id": "T9"}));

        let request = transport.requests().pop().expect("one request");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.json_body(), Some(json!({"contact_id": "C1", "due_date": "02-11-2026"})));
        assert!(request.query_pairs().is_empty());
        assert_eq!(request.auth_headers()[0].0, "X-Api-Key");
    }

    #[tokio::test]
    async fn non_success_status_is_a_hard_error_with_body() {
        let transport =
            Arc::new(RecordingTransport::new(vec![json_response(503, json!({"error": "down"}))]));
        let mut notes = call(CrmAction::Notes, CrmOperation::List);
        notes.contact_id = Some("C1".to_string());

        let error = dispatcher(transport).dispatch(notes, &credentials()).await.expect_err("503");
        assert!(matches!(error, DispatchError::Upstream { status: 503, ref body } if body.contains("down")));
        assert!(!error.is_client_error());
    }

    #[tokio::test]
    async fn transport_failures_map_to_dispatch_errors() {
        let transport = Arc::new(RecordingTransport::new(vec![]));
        transport.push_error(TransportError::Timeout);
        transport.push_error(TransportError::Failed("connection refused".to_string()));
        let dispatcher = dispatcher(transport.clone());
        let mut notes = call(CrmAction::Notes, CrmOperation::List);
        notes.contact_id = Some("C1".to_string());

        let timed_out =
            dispatcher.dispatch(notes.clone(), &credentials()).await.expect_err("timeout");
        assert!(matches!(timed_out, DispatchError::Timeout(limit) if limit == Duration::from_secs(5)));

        let refused = dispatcher.dispatch(notes, &credentials()).await.expect_err("failed");
        assert!(matches!(refused, DispatchError::Transport(ref message) if message.contains("refused")));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn limit_trims_list_but_preserves_total() {
        let raw = json!({"results": [{"id": 1}, {"id": 2}, {"id": 3}]});
        let result = DispatchResult::from_raw(raw, Some(2));
        assert_eq!(result.items().len(), 2);
        assert_eq!(result.total, Some(3));
        assert_eq!(result.returned, Some(2));

        let bare = DispatchResult::from_raw(json!([{"id": 1}]), None);
        assert_eq!(bare.returned, Some(1));

        let single = DispatchResult::from_raw(json!({"id": 1}), Some(2));
        assert!(single.list.is_none());
        assert!(single.total.is_none());
    }

    #[test]
    fn pagination_is_read_from_top_level_or_nested_meta() {
        let top = DispatchResult::from_raw(
            json!({"data": [], "hasNextPage": true, "totalPages": 5, "page": 2}),
            None,
        );
        let pagination = top.pagination.expect("pagination");
        assert_eq!(pagination.next_page(), Some(3));

        let nested = DispatchResult::from_raw(
            json!({"data": [], "total": 40, "meta": {"current_page": 4, "total_pages": 4}}),
            None,
        );
        assert_eq!(nested.total, Some(40));
        assert_eq!(nested.pagination.and_then(|p| p.next_page()), None);
    }

    #[tokio::test]
    async fn plain_text_bodies_pass_through() {
        let transport = Arc::new(RecordingTransport::new(vec![super::CrmResponse {
            status: 200,
            content_type: Some("text/plain".to_string()),
            body: "queued".to_string(),
        }]));
        let create = call(CrmAction::Notes, CrmOperation::Create)
            .param("contact_id", "C1")
            .param("note", "Called back");

        let result = dispatcher(transport).dispatch(create, &credentials()).await.expect("dispatch");
        assert_eq!(result.raw, Value::String("queued".to_string()));
        assert!(result.list.is_none());
    }
}
