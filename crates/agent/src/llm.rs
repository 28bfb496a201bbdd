use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// The language-model oracle. `context` carries the system instructions for
/// the call; `prompt` is the task itself. Implementations should ask the
/// model for a single JSON object.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String>;
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle call failed: {0}")]
    Call(String),
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle answer was not a JSON object: {0}")]
    Parse(String),
}

/// Calls the oracle under `timeout` and extracts the JSON object it returned.
pub async fn complete_json(
    llm: &dyn LlmClient,
    prompt: &str,
    context: &str,
    timeout: Duration,
) -> Result<Value, OracleError> {
    let answer = tokio::time::timeout(timeout, llm.complete(prompt, context))
        .await
        .map_err(|_| OracleError::Timeout(timeout))?
        .map_err(|error| OracleError::Call(error.to_string()))?;

    extract_json_object(&answer).ok_or_else(|| OracleError::Parse(preview(&answer)))
}

/// Finds the first balanced JSON object in `text`, tolerating code fences and
/// prose on either side.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let bytes = trimmed.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = trimmed[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(bytes, start) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&trimmed[start..=end])
            {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{complete_json, extract_json_object, OracleError};
    use crate::testing::ScriptedLlm;

    #[test]
    fn extracts_object_from_fenced_and_chatty_answers() {
        let fenced = "```json\n{\"type\": \"crm\", \"action\": \"tasks\"}\n```";
        assert_eq!(extract_json_object(fenced), Some(json!({"type": "crm", "action": "tasks"})));

        let chatty = "Sure! Here you go: {\"type\":\"general\",\"note\":\"a {brace} in text\"} hope it helps";
        assert_eq!(
            extract_json_object(chatty),
            Some(json!({"type": "general", "note": "a {brace} in text"}))
        );
    }

    #[test]
    fn skips_unbalanced_prefix_and_rejects_non_objects() {
        assert_eq!(extract_json_object("{oops {\"days\": 7}"), Some(json!({"days": 7})));
        assert_eq!(extract_json_object("[1, 2, 3]"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[tokio::test]
    async fn complete_json_maps_failures() {
        let llm = ScriptedLlm::new(["not json"]);
        let result = complete_json(&llm, "p", "c", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(OracleError::Parse(_))));

        let failing = ScriptedLlm::failing();
        let result = complete_json(&failing, "p", "c", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(OracleError::Call(_))));
    }
}
