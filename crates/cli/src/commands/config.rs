use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use adpilot_core::config::{AppConfig, LoadOptions};
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

    let mut field = |key: &str, value: String, env_var: Option<&str>| {
        lines.push(render_line(
            key,
            &value,
            field_source(key, env_var, config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    };

    field("database.url", config.database.url.clone(), Some("ADPILOT_DATABASE_URL"));
    field(
        "database.max_connections",
        config.database.max_connections.to_string(),
        Some("ADPILOT_DATABASE_MAX_CONNECTIONS"),
    );
    field(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        Some("ADPILOT_DATABASE_TIMEOUT_SECS"),
    );

    field(
        "ads_api.endpoint",
        config.ads_api.endpoint.clone().unwrap_or_else(|| "(unset)".to_string()),
        Some("ADPILOT_ADS_ENDPOINT"),
    );
    let token = config
        .ads_api
        .developer_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "(unset)".to_string());
    field("ads_api.developer_token", token, Some("ADPILOT_ADS_DEVELOPER_TOKEN"));
    field(
        "ads_api.timeout_secs",
        config.ads_api.timeout_secs.to_string(),
        Some("ADPILOT_ADS_TIMEOUT_SECS"),
    );
    field("ads_api.simulate", config.ads_api.simulate.to_string(), Some("ADPILOT_ADS_SIMULATE"));

    field("logging.level", config.logging.level.clone(), Some("ADPILOT_LOGGING_LEVEL"));
    field(
        "logging.format",
        format!("{:?}", config.logging.format).to_ascii_lowercase(),
        Some("ADPILOT_LOGGING_FORMAT"),
    );

    lines.join("\n")
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("  {key} = {value}  [{source}]")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("adpilot.toml"), PathBuf::from("config/adpilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key: &str,
    env_var: Option<&str>,
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if let Some(env_var) = env_var {
        let set = env::var(env_var).map(|value| !value.trim().is_empty()).unwrap_or(false);
        if set {
            return format!("env {env_var}");
        }
    }

    if let (Some(doc), Some(path)) = (file_doc, file_path) {
        if file_contains_key(doc, key) {
            return format!("file {}", path.display());
        }
    }

    "default".to_string()
}

fn file_contains_key(doc: &Value, dotted_key: &str) -> bool {
    let mut current = doc;
    for segment in dotted_key.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

fn redact_token(token: &str) -> String {
    if token.len() <= 4 {
        return "****".to_string();
    }
    format!("{}****", &token[..4])
}
