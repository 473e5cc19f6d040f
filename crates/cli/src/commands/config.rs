use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cadence_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let mut push = |key: &str, value: &str, env_key: &str| {
        lines.push(render_line(
            key,
            value,
            field_source(
                key,
                Some(env_key),
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        ));
    };

    push("database.url", &config.database.url, "CADENCE_DATABASE_URL");
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        "CADENCE_DATABASE_MAX_CONNECTIONS",
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        "CADENCE_DATABASE_TIMEOUT_SECS",
    );

    push("server.bind_address", &config.server.bind_address, "CADENCE_SERVER_BIND_ADDRESS");
    push("server.port", &config.server.port.to_string(), "CADENCE_SERVER_PORT");
    push(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
        "CADENCE_SERVER_HEALTH_CHECK_PORT",
    );

    let transport_base_url = if config.transport.base_url.is_empty() {
        "<unset>"
    } else {
        config.transport.base_url.as_str()
    };
    push("transport.base_url", transport_base_url, "CADENCE_TRANSPORT_BASE_URL");
    push(
        "transport.api_token",
        &redact_token(config.transport.api_token.expose_secret()),
        "CADENCE_TRANSPORT_API_TOKEN",
    );
    push(
        "transport.timeout_secs",
        &config.transport.timeout_secs.to_string(),
        "CADENCE_TRANSPORT_TIMEOUT_SECS",
    );

    push("crm.enabled", &config.crm.enabled.to_string(), "CADENCE_CRM_ENABLED");
    push(
        "crm.base_url",
        config.crm.base_url.as_deref().unwrap_or("<unset>"),
        "CADENCE_CRM_BASE_URL",
    );
    let crm_api_token = if config.crm.api_token.is_some() { "<redacted>" } else { "<unset>" };
    push("crm.api_token", crm_api_token, "CADENCE_CRM_API_TOKEN");

    push(
        "scheduler.drain_interval_secs",
        &config.scheduler.drain_interval_secs.to_string(),
        "CADENCE_SCHEDULER_DRAIN_INTERVAL_SECS",
    );
    push(
        "scheduler.inter_bubble_delay_ms",
        &config.scheduler.inter_bubble_delay_ms.to_string(),
        "CADENCE_SCHEDULER_INTER_BUBBLE_DELAY_MS",
    );

    push("logging.level", &config.logging.level, "CADENCE_LOGGING_LEVEL");
    push("logging.format", &format!("{:?}", config.logging.format), "CADENCE_LOGGING_FORMAT");

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("cadence.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/cadence.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
