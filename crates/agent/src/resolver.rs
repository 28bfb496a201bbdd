//! Turns "this contact", a name or a company into concrete CRM identifiers.
//!
//! Context is consulted before the network. A CRM search runs only when the
//! reference is a real search term, and its known client-error quirk (a 4xx
//! that still carries candidates) is retried at most once.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use coachline_core::context::ConversationContext;
use coachline_core::endpoints::{rule_for, CrmAction, CrmOperation};
use coachline_core::intent::{is_this_contact, text, IntentDescriptor};
use coachline_core::profile::CrmCredentials;

use crate::dispatch::{CrmCall, CrmDispatcher, DispatchError};

const SELECT_SEARCH_FIELDS: &str = "1,2,3";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionSource {
    Intent,
    Context,
    Search,
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedContact {
    pub contact_id: String,
    pub phone_id: Option<String>,
    pub company_name: Option<String>,
    pub source: ResolutionSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedContact),
    /// Nothing to resolve against; ask the user who they mean.
    Unresolved { search: Option<String> },
}

impl Resolution {
    pub fn contact(&self) -> Option<&ResolvedContact> {
        match self {
            Self::Resolved(contact) => Some(contact),
            Self::Unresolved { .. } => None,
        }
    }
}

/// A contact row as offered back to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactCandidate {
    pub contact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// "this/that/my/current contact|account|lead|company" anywhere in a prompt.
pub fn mentions_current_contact(prompt: &str) -> bool {
    static BROAD: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&BROAD, r"(?i)\b(this|that|my|current)\s+(contact|account|lead|company)\b")
        .map(|regex| regex.is_match(prompt))
        .unwrap_or(false)
}

/// "this/that contact|account|lead|company" used as a search term.
pub fn is_deictic_search(search: &str) -> bool {
    static NARROW: OnceLock<Option<Regex>> = OnceLock::new();
    is_this_contact(search)
        || cached(&NARROW, r"(?i)\b(this|that)\s+(contact|account|lead|company)\b")
            .map(|regex| regex.is_match(search))
            .unwrap_or(false)
}

#[derive(Clone)]
pub struct ContactResolver {
    dispatcher: CrmDispatcher,
    search_retries: u8,
}

impl ContactResolver {
    pub fn new(dispatcher: CrmDispatcher, search_retries: u8) -> Self {
        Self { dispatcher, search_retries: search_retries.min(1) }
    }

    pub async fn resolve_contact_id(
        &self,
        intent: &IntentDescriptor,
        credentials: &CrmCredentials,
        context: &mut ConversationContext,
        raw_prompt: &str,
    ) -> Result<Resolution, DispatchError> {
        if let Some(contact_id) = non_blank(intent.subject.contact_id.as_deref()) {
            let resolved = ResolvedContact {
                contact_id: contact_id.to_string(),
                phone_id: None,
                company_name: None,
                source: ResolutionSource::Intent,
            };
            return Ok(Resolution::Resolved(apply_to_context(resolved, context)));
        }

        if mentions_current_contact(raw_prompt) {
            if let Some(resolved) = from_context(context) {
                debug!(event_name = "contact.resolve.context", "deictic prompt resolved from context");
                return Ok(Resolution::Resolved(resolved));
            }
        }

        let search = intent
            .subject
            .search_candidate()
            .map(str::to_string)
            .or_else(|| non_blank(context.company_name.as_deref()).map(str::to_string));
        let Some(search) = search else {
            return Ok(Resolution::Unresolved { search: None });
        };

        self.resolve_contact_and_phone_id(credentials, &search, context).await
    }

    pub async fn resolve_contact_and_phone_id(
        &self,
        credentials: &CrmCredentials,
        search: &str,
        context: &mut ConversationContext,
    ) -> Result<Resolution, DispatchError> {
        if is_deictic_search(search) {
            return Ok(match from_context(context) {
                Some(resolved) => Resolution::Resolved(resolved),
                None => Resolution::Unresolved { search: None },
            });
        }

        let first = self.search(credentials, SearchBy::Term(search)).await;
        let (payload, source) = match first {
            Ok(result) => match retry_candidate(&result.raw, false) {
                Some(candidate) if self.search_retries > 0 => {
                    (self.retry(credentials, &candidate).await?, ResolutionSource::Retry)
                }
                _ => (result.raw, ResolutionSource::Search),
            },
            Err(error) if error.is_client_error() && self.search_retries > 0 => {
                let candidate =
                    error.upstream_json().and_then(|body| retry_candidate(&body, true));
                match candidate {
                    Some(candidate) => {
                        (self.retry(credentials, &candidate).await?, ResolutionSource::Retry)
                    }
                    None => return Err(error),
                }
            }
            Err(error) => return Err(error),
        };

        match extract_contact(&payload) {
            Some(mut resolved) => {
                resolved.source = source;
                info!(
                    event_name = "contact.resolve.searched",
                    retried = matches!(source, ResolutionSource::Retry),
                    "contact resolved through crm search"
                );
                Ok(Resolution::Resolved(apply_to_context(resolved, context)))
            }
            None => Ok(Resolution::Unresolved { search: Some(search.to_string()) }),
        }
    }

    async fn retry(
        &self,
        credentials: &CrmCredentials,
        candidate: &str,
    ) -> Result<Value, DispatchError> {
        info!(
            event_name = "contact.resolve.retry",
            candidate_contact_id = candidate,
            "retrying contact search by candidate id"
        );
        Ok(self.search(credentials, SearchBy::ContactId(candidate)).await?.raw)
    }

    async fn search(
        &self,
        credentials: &CrmCredentials,
        by: SearchBy<'_>,
    ) -> Result<crate::dispatch::DispatchResult, DispatchError> {
        let rule = rule_for(CrmAction::ContactSearch, CrmOperation::List).ok_or_else(|| {
            DispatchError::Validation(coachline_core::errors::ValidationError::UnsupportedAction {
                action: CrmAction::ContactSearch.to_string(),
                operation: CrmOperation::List.as_str().to_string(),
            })
        })?;
        let mut call = match by {
            SearchBy::Term(term) => CrmCall::new(rule)
                .param("search", term)
                .param("selectSearchFields", SELECT_SEARCH_FIELDS),
            SearchBy::ContactId(contact_id) => CrmCall::new(rule).param("contact_id", contact_id),
        };
        call.limit = Some(1);
        self.dispatcher.dispatch(call, credentials).await
    }
}

enum SearchBy<'a> {
    Term(&'a str),
    ContactId(&'a str),
}

/// The quirk: a client-error status with a non-empty `search_field` list.
/// `status_signalled` is true when the HTTP status already was a 4xx.
fn retry_candidate(body: &Value, status_signalled: bool) -> Option<String> {
    let object = body.as_object()?;
    let client_error = status_signalled
        || object
            .get("clientStatusCode")
            .and_then(|code| code.as_u64().or_else(|| code.as_str()?.trim().parse().ok()))
            .map(|code| (400..=499).contains(&code))
            .unwrap_or(false);
    if !client_error {
        return None;
    }
    object.get("search_field")?.as_array()?.first().and_then(contact_id_of)
}

fn first_record(payload: &Value) -> Option<&Value> {
    match payload {
        Value::Array(items) => items.first(),
        Value::Object(object) => {
            match ["data", "results"].iter().find_map(|key| object.get(*key)) {
                Some(Value::Array(items)) => items.first(),
                Some(inner @ Value::Object(_)) => Some(inner),
                _ => Some(payload),
            }
        }
        _ => None,
    }
}

fn field(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text(record.get(*key)))
}

fn contact_id_of(record: &Value) -> Option<String> {
    field(record, &["contact_id", "contactId", "id"])
}

/// Reads identifiers from the first record of any supported payload shape.
pub fn extract_contact(payload: &Value) -> Option<ResolvedContact> {
    let record = first_record(payload)?;
    Some(ResolvedContact {
        contact_id: contact_id_of(record)?,
        phone_id: field(record, &["phone_id", "phoneId"]),
        company_name: field(record, &["company_name", "companyName", "company"]),
        source: ResolutionSource::Search,
    })
}

pub fn contact_candidates(items: &[Value]) -> Vec<ContactCandidate> {
    items
        .iter()
        .filter_map(|record| {
            let name = field(record, &["name", "full_name", "fullName", "contact_name"]).or_else(|| {
                let parts = [
                    field(record, &["first_name", "firstName"]),
                    field(record, &["last_name", "lastName"]),
                ];
                let joined = parts.into_iter().flatten().collect::<Vec<_>>().join(" ");
                (!joined.is_empty()).then_some(joined)
            });
            Some(ContactCandidate {
                contact_id: contact_id_of(record)?,
                name,
                phone_id: field(record, &["phone_id", "phoneId"]),
                company_name: field(record, &["company_name", "companyName", "company"]),
            })
        })
        .collect()
}

fn from_context(context: &ConversationContext) -> Option<ResolvedContact> {
    Some(ResolvedContact {
        contact_id: non_blank(context.contact_id.as_deref())?.to_string(),
        phone_id: context.phone_id.clone(),
        company_name: context.company_name.clone(),
        source: ResolutionSource::Context,
    })
}

/// Records a resolution in context. Switching contacts drops the previous
/// contact's phone and company.
pub fn apply_to_context(
    resolved: ResolvedContact,
    context: &mut ConversationContext,
) -> ResolvedContact {
    if context.contact_id.as_deref() != Some(resolved.contact_id.as_str()) {
        context.phone_id = None;
        context.company_name = None;
    }
    context.contact_id = Some(resolved.contact_id.clone());
    if resolved.phone_id.is_some() {
        context.phone_id = resolved.phone_id.clone();
    }
    if resolved.company_name.is_some() {
        context.company_name = resolved.company_name.clone();
    }
    ResolvedContact {
        phone_id: context.phone_id.clone(),
        company_name: context.company_name.clone(),
        ..resolved
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use coachline_core::context::ConversationContext;
    use coachline_core::endpoints::{CrmAction, CrmOperation};
    use coachline_core::intent::{IntentDescriptor, IntentKind, SubjectRef};

    use super::{
        contact_candidates, extract_contact, is_deictic_search, mentions_current_contact,
        ContactResolver, Resolution, ResolutionSource,
    };
    use crate::dispatch::{CrmDispatcher, DispatchError};
    use crate::testing::{credentials, json_response, RecordingTransport};

    fn resolver(transport: Arc<RecordingTransport>, retries: u8) -> ContactResolver {
        ContactResolver::new(CrmDispatcher::new(transport, Duration::from_secs(5)), retries)
    }

    fn tasks_intent(subject: SubjectRef) -> IntentDescriptor {
        IntentDescriptor {
            subject,
            ..IntentDescriptor::new(IntentKind::Crm {
                action: CrmAction::Tasks,
                operation: CrmOperation::List,
            })
        }
    }

    #[test]
    fn deictic_patterns() {
        assert!(mentions_current_contact("show tasks for this contact"));
        assert!(mentions_current_contact("What's on my account?"));
        assert!(!mentions_current_contact("contact Jane at Acme"));
        assert!(is_deictic_search("that lead"));
        assert!(is_deictic_search("This Contact"));
        assert!(!is_deictic_search("my company"));
    }

    #[tokio::test]
    async fn deictic_prompt_short_circuits_without_network() {
        let transport = Arc::new(RecordingTransport::new(vec![]));
        let mut context =
            ConversationContext { contact_id: Some("C1".to_string()), ..Default::default() };

        let resolution = resolver(transport.clone(), 1)
            .resolve_contact_id(
                &tasks_intent(SubjectRef::default()),
                &credentials(),
                &mut context,
                "show tasks for this contact",
            )
            .await
            .expect("resolve");

        assert_eq!(resolution.contact().map(|c| c.contact_id.as_str()), Some("C1"));
        assert_eq!(resolution.contact().map(|c| c.source), Some(ResolutionSource::Context));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn nothing_to_search_is_unresolved_not_an_error() {
        let transport = Arc::new(RecordingTransport::new(vec![]));
        let mut context = ConversationContext::default();

        let resolution = resolver(transport.clone(), 1)
            .resolve_contact_id(
                &tasks_intent(SubjectRef::default()),
                &credentials(),
                &mut context,
                "show tasks",
            )
            .await
            .expect("resolve");

        assert_eq!(resolution, Resolution::Unresolved { search: None });
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn deictic_search_without_context_is_never_sent() {
        let transport = Arc::new(RecordingTransport::new(vec![]));
        let mut context = ConversationContext::default();
        let subject = SubjectRef { contact: Some("this contact".to_string()), ..Default::default() };

        let resolution = resolver(transport.clone(), 1)
            .resolve_contact_id(&tasks_intent(subject), &credentials(), &mut context, "tasks?")
            .await
            .expect("resolve");

        assert_eq!(resolution, Resolution::Unresolved { search: None });
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn search_result_updates_context() {
        let transport = Arc::new(RecordingTransport::new(vec![json_response(
            200,
            json!({"data": [{"contactId": "C5", "phoneId": "P5", "companyName": "Acme Roofing"}]}),
        )]));
        let mut context = ConversationContext {
            contact_id: Some("C1".to_string()),
            phone_id: Some("P1".to_string()),
            ..Default::default()
        };
        let subject = SubjectRef { company: Some("Acme".to_string()), ..Default::default() };

        let resolution = resolver(transport.clone(), 1)
            .resolve_contact_id(&tasks_intent(subject), &credentials(), &mut context, "Acme tasks")
            .await
            .expect("resolve");

        assert_eq!(resolution.contact().map(|c| c.source), Some(ResolutionSource::Search));
        assert_eq!(context.contact_id.as_deref(), Some("C5"));
        assert_eq!(context.phone_id.as_deref(), Some("P5"));
        assert_eq!(context.company_name.as_deref(), Some("Acme Roofing"));

        let request = transport.requests().pop().expect("search request");
        assert_eq!(request.path, "/contacts/search");
        let query = request.query_pairs();
        assert!(query.contains(&("search".to_string(), "Acme".to_string())));
        assert!(query.contains(&("selectSearchFields".to_string(), "1,2,3".to_string())));
        assert!(query.contains(&("limit".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn client_status_quirk_retries_exactly_once_with_candidate_id() {
        let transport = Arc::new(RecordingTransport::new(vec![
            json_response(200, json!({"clientStatusCode": 400, "search_field": [{"contact_id": "C9"}]})),
            json_response(200, json!({"data": [{"contact_id": "C9", "phone_id": "P9"}]})),
        ]));
        let mut context = ConversationContext::default();

        let resolution = resolver(transport.clone(), 1)
            .resolve_contact_and_phone_id(&credentials(), "Jane Doe", &mut context)
            .await
            .expect("resolve");

        let contact = resolution.contact().expect("resolved");
        assert_eq!(contact.contact_id, "C9");
        assert_eq!(contact.phone_id.as_deref(), Some("P9"));
        assert_eq!(contact.source, ResolutionSource::Retry);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].query_pairs().contains(&("contact_id".to_string(), "C9".to_string())));
    }

    #[tokio::test]
    async fn http_4xx_with_candidates_also_retries_once() {
        let transport = Arc::new(RecordingTransport::new(vec![
            json_response(422, json!({"search_field": [{"contactId": "C9"}]})),
            json_response(422, json!({"search_field": [{"contactId": "C10"}]})),
        ]));
        let mut context = ConversationContext::default();

        let error = resolver(transport.clone(), 1)
            .resolve_contact_and_phone_id(&credentials(), "Jane", &mut context)
            .await
            .expect_err("second 4xx is returned as is");

        assert!(matches!(error, DispatchError::Upstream { status: 422, .. }));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn retries_disabled_returns_original_payload() {
        let transport = Arc::new(RecordingTransport::new(vec![json_response(
            200,
            json!({"clientStatusCode": 400, "search_field": [{"contact_id": "C9"}]}),
        )]));
        let mut context = ConversationContext::default();

        let resolution = resolver(transport.clone(), 0)
            .resolve_contact_and_phone_id(&credentials(), "Jane", &mut context)
            .await
            .expect("resolve");

        assert_eq!(resolution, Resolution::Unresolved { search: Some("Jane".to_string()) });
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn extraction_accepts_every_payload_shape() {
        for payload in [
            json!([{"contact_id": "C1"}]),
            json!({"data": [{"contactId": "C1"}]}),
            json!({"results": [{"id": "C1"}]}),
            json!({"contact_id": "C1"}),
            json!({"data": {"contact_id": "C1"}}),
        ] {
            assert_eq!(
                extract_contact(&payload).map(|contact| contact.contact_id),
                Some("C1".to_string()),
                "{payload}"
            );
        }
        let sparse = extract_contact(&json!({"data": [{"id": 42}]})).expect("numeric id");
        assert_eq!(sparse.contact_id, "42");
        assert_eq!(sparse.phone_id, None);
        assert_eq!(extract_contact(&json!({"data": []})), None);
    }

    #[test]
    fn candidates_join_first_and_last_names() {
        let candidates = contact_candidates(&[
            json!({"contact_id": "C1", "first_name": "Jane", "last_name": "Doe"}),
            json!({"name": "no id"}),
        ]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name.as_deref(), Some("Jane Doe"));
    }
}
