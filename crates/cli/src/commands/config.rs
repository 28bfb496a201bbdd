use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use coachline_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, env_keys, value) in effective_values(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn effective_values(config: &AppConfig) -> Vec<Entry> {
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    vec![
        entry("database.url", &["COACHLINE_DATABASE_URL"], config.database.url.clone()),
        entry(
            "database.max_connections",
            &["COACHLINE_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            &["COACHLINE_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        entry("llm.provider", &["COACHLINE_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        entry("llm.model", &["COACHLINE_LLM_MODEL"], config.llm.model.clone()),
        entry(
            "llm.base_url",
            &["COACHLINE_LLM_BASE_URL"],
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        entry("llm.api_key", &["COACHLINE_LLM_API_KEY"], llm_api_key.to_string()),
        entry("llm.timeout_secs", &["COACHLINE_LLM_TIMEOUT_SECS"], config.llm.timeout_secs.to_string()),
        entry("llm.max_tokens", &["COACHLINE_LLM_MAX_TOKENS"], config.llm.max_tokens.to_string()),
        entry("crm.base_url", &["COACHLINE_CRM_BASE_URL"], config.crm.base_url.clone()),
        entry("crm.timeout_secs", &["COACHLINE_CRM_TIMEOUT_SECS"], config.crm.timeout_secs.to_string()),
        entry(
            "crm.search_quirk_retries",
            &["COACHLINE_CRM_SEARCH_QUIRK_RETRIES"],
            config.crm.search_quirk_retries.to_string(),
        ),
        entry(
            "assistant.activity_window_days",
            &["COACHLINE_ASSISTANT_ACTIVITY_WINDOW_DAYS"],
            config.assistant.activity_window_days.to_string(),
        ),
        entry(
            "assistant.stats_window_days",
            &["COACHLINE_ASSISTANT_STATS_WINDOW_DAYS"],
            config.assistant.stats_window_days.to_string(),
        ),
        entry(
            "assistant.history_turns",
            &["COACHLINE_ASSISTANT_HISTORY_TURNS"],
            config.assistant.history_turns.to_string(),
        ),
        entry(
            "assistant.page_size",
            &["COACHLINE_ASSISTANT_PAGE_SIZE"],
            config.assistant.page_size.to_string(),
        ),
        entry(
            "server.bind_address",
            &["COACHLINE_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        entry("server.port", &["COACHLINE_SERVER_PORT"], config.server.port.to_string()),
        entry(
            "server.graceful_shutdown_secs",
            &["COACHLINE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        entry(
            "logging.level",
            &["COACHLINE_LOGGING_LEVEL", "COACHLINE_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        entry(
            "logging.format",
            &["COACHLINE_LOGGING_FORMAT", "COACHLINE_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

type Entry = (&'static str, &'static [&'static str], String);

fn entry(key: &'static str, env_keys: &'static [&'static str], value: String) -> Entry {
    (key, env_keys, value)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("coachline.toml"), PathBuf::from("config/coachline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
