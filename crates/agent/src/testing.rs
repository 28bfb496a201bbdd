//! Deterministic collaborators for exercising the runtime without a model or
//! a CRM.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use coachline_core::profile::CrmCredentials;

use crate::dispatch::{CrmRequest, CrmResponse, CrmTransport, TransportError};
use crate::llm::LlmClient;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCompletion {
    pub prompt: String,
    pub context: String,
}

/// Answers from routes first (a needle found in the prompt or context), then
/// from a FIFO script. An exhausted script fails the call.
#[derive(Default)]
pub struct ScriptedLlm {
    routes: Vec<(String, String)>,
    script: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCompletion>>,
    always_fail: bool,
}

impl ScriptedLlm {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(answers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self { always_fail: true, ..Self::default() }
    }

    pub fn route(mut self, needle: impl Into<String>, answer: impl Into<String>) -> Self {
        self.routes.push((needle.into(), answer.into()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCompletion> {
        guard(&self.calls).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        guard(&self.calls)
            .push(RecordedCompletion { prompt: prompt.to_string(), context: context.to_string() });
        if self.always_fail {
            return Err(anyhow!("scripted oracle failure"));
        }
        if let Some((_, answer)) = self
            .routes
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()) || context.contains(needle.as_str()))
        {
            return Ok(answer.clone());
        }
        guard(&self.script).pop_front().ok_or_else(|| anyhow!("scripted oracle exhausted"))
    }
}

/// Replays canned responses in order and records every request it was sent.
#[derive(Default)]
pub struct RecordingTransport {
    responses: Mutex<VecDeque<Result<CrmResponse, TransportError>>>,
    requests: Mutex<Vec<CrmRequest>>,
}

impl RecordingTransport {
    pub fn new(responses: Vec<CrmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_error(&self, error: TransportError) {
        guard(&self.responses).push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<CrmRequest> {
        guard(&self.requests).clone()
    }
}

#[async_trait]
impl CrmTransport for RecordingTransport {
    async fn send(&self, request: CrmRequest) -> Result<CrmResponse, TransportError> {
        guard(&self.requests).push(request);
        guard(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Failed("no scripted response left".to_string())))
    }
}

pub fn json_response(status: u16, body: Value) -> CrmResponse {
    CrmResponse {
        status,
        content_type: Some("application/json".to_string()),
        body: body.to_string(),
    }
}

pub fn credentials() -> CrmCredentials {
    CrmCredentials {
        api_key: "key-1".to_string().into(),
        api_secret: "secret-1".to_string().into(),
    }
}
