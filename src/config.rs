//! Configuration types.
//!
//! Everything comes from environment variables with defaults; only the API
//! key is mandatory.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::orchestrator::EscalationTriggers;
use crate::orchestrator::DEFAULT_SYSTEM_TEMPLATE;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// Local libSQL database file.
    pub db_path: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    /// Directory of flow JSON files. Unset means the built-in flow only.
    pub flows_dir: Option<PathBuf>,
    /// System prompt template with `{{KEY}}` placeholders.
    pub system_template: String,
    pub escalation_triggers: EscalationTriggers,
    /// Provisioning webhook. Unset means log-only provisioning.
    pub provision_webhook: Option<String>,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("ANTHROPIC_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;

        let max_tokens: u32 = parse_or(&var, "AGENT_FACTORY_MAX_TOKENS", 1024)?;
        let timeout_secs: u64 = parse_or(&var, "AGENT_FACTORY_TIMEOUT_SECS", 60)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_FACTORY_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let llm = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: SecretString::from(api_key),
            model: var("AGENT_FACTORY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: var("AGENT_FACTORY_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            max_tokens,
            timeout: Duration::from_secs(timeout_secs),
        };

        let system_template = match (var("AGENT_FACTORY_SYSTEM_PROMPT"), var("AGENT_FACTORY_SYSTEM_PROMPT_FILE")) {
            (Some(inline), _) => inline,
            (None, Some(path)) => std::fs::read_to_string(&path)?,
            (None, None) => DEFAULT_SYSTEM_TEMPLATE.to_string(),
        };

        let escalation_triggers = match var("AGENT_FACTORY_ESCALATION_TRIGGERS") {
            Some(csv) => EscalationTriggers::from_csv(&csv),
            None => EscalationTriggers::defaults(),
        };

        Ok(Self {
            llm,
            db_path: var("AGENT_FACTORY_DB_PATH")
                .unwrap_or_else(|| "./data/agent-factory.db".to_string())
                .into(),
            port: parse_or(&var, "AGENT_FACTORY_PORT", 8080)?,
            flows_dir: var("AGENT_FACTORY_FLOWS_DIR").map(PathBuf::from),
            system_template,
            escalation_triggers,
            provision_webhook: var("AGENT_FACTORY_PROVISION_WEBHOOK"),
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
