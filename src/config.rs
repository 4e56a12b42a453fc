use std::env;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Clone, Debug)]
pub struct TeamsConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub team_id: String,
    pub channel_id: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_api_hostname: String,
    pub default_model: String,
    pub reasoning_level: String,
    pub output_format: String,
    pub document_model: String,
    pub max_output_tokens: u32,
    pub request_timeout: Duration,
    pub attachment_api_url: Option<String>,
    // None disables notifications, alerts are only logged
    pub teams: Option<TeamsConfig>,
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    optional_var(name).unwrap_or_else(|| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Read the configuration from the process environment. Call
    /// `dotenvy::dotenv()` first if a `.env` file should be honored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let openai_api_key =
            optional_var("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let teams = match (
            optional_var("AZURE_TENANT_ID"),
            optional_var("AZURE_CLIENT_ID"),
            optional_var("AZURE_CLIENT_SECRET"),
            optional_var("TEAMS_TEAM_ID"),
            optional_var("TEAMS_CHANNEL_ID"),
        ) {
            (
                Some(tenant_id),
                Some(client_id),
                Some(client_secret),
                Some(team_id),
                Some(channel_id),
            ) => Some(TeamsConfig {
                tenant_id,
                client_id,
                client_secret,
                team_id,
                channel_id,
            }),
            _ => None,
        };

        Ok(Self {
            openai_api_key,
            openai_api_hostname: var_or("OPENAI_API_HOSTNAME", "https://api.openai.com"),
            default_model: var_or("DEFAULT_AI_MODEL", "gpt-4o-mini"),
            reasoning_level: var_or("REASONING_LEVEL", "medium"),
            output_format: var_or("OUTPUT_FORMAT", "json"),
            document_model: var_or("DOCUMENT_ANALYSIS_MODEL", "gpt-4.1"),
            max_output_tokens: parse_var("MAX_OUTPUT_TOKENS", 4096)?,
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 300)?),
            attachment_api_url: optional_var("GET_ATTACHMENT_API_URL"),
            teams,
        })
    }

    /// Configuration pointing at a local model backend, used by tests.
    pub fn for_backend(openai_api_hostname: &str) -> Self {
        Self {
            openai_api_key: String::from("test-key"),
            openai_api_hostname: openai_api_hostname.to_string(),
            default_model: String::from("gpt-4o-mini"),
            reasoning_level: String::from("medium"),
            output_format: String::from("json"),
            document_model: String::from("gpt-4.1"),
            max_output_tokens: 4096,
            request_timeout: Duration::from_secs(300),
            attachment_api_url: None,
            teams: None,
        }
    }
}
