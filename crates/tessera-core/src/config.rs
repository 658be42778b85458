use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TesseraError};
use crate::types::{ActionType, ApprovalRoute};

/// Top-level configuration for the Tessera orchestrator.
///
/// Loaded from `~/.tessera/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesseraConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Execution agent per action type, keyed by type name. Types without an
    /// entry stay pending.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl TesseraConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TesseraConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.dispatch.auto_execute_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TesseraError::Config(format!(
                "dispatch.auto_execute_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.dispatch.execution_timeout_secs == 0 {
            return Err(TesseraError::Config(
                "dispatch.execution_timeout_secs must be positive".into(),
            ));
        }
        if self.sweep.batch_limit == 0 {
            return Err(TesseraError::Config(
                "sweep.batch_limit must be positive".into(),
            ));
        }
        self.agent_configs()?;
        Ok(())
    }

    /// Configured execution agents with their parsed action types.
    pub fn agent_configs(&self) -> Result<Vec<(ActionType, &AgentConfig)>> {
        let mut agents = Vec::with_capacity(self.agents.len());
        for (name, agent) in &self.agents {
            let action_type: ActionType = name
                .parse()
                .map_err(|e: String| TesseraError::Config(format!("agents.{}: {}", name, e)))?;
            if agent.base_url.trim().is_empty() {
                return Err(TesseraError::Config(format!(
                    "agents.{}.base_url must not be empty",
                    name
                )));
            }
            agents.push((action_type, agent));
        }
        Ok(agents)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and the internal token.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.tessera/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Dispatch policy: which actions skip approval, and how long an agent may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum confidence for an auto-execute-eligible type to skip approval.
    pub auto_execute_threshold: f32,
    /// Action types eligible to skip approval.
    pub auto_execute_types: Vec<ActionType>,
    /// Upper bound on a single execution agent call.
    pub execution_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            auto_execute_threshold: 0.90,
            auto_execute_types: vec![ActionType::Link],
            execution_timeout_secs: 60,
        }
    }
}

/// Retry sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Pending and failed actions untouched for this long are swept.
    pub stale_after_secs: u64,
    /// Processing actions untouched for this long are considered stalled.
    pub stalled_after_secs: u64,
    /// Retry attempts for transient failures.
    pub max_retries: u32,
    /// Maximum actions examined per status per sweep.
    pub batch_limit: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            stalled_after_secs: 900,
            max_retries: 3,
            batch_limit: 100,
        }
    }
}

/// Execution agent endpoint for one action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub base_url: String,
    #[serde(default)]
    pub route: ApprovalRoute,
}

/// Outbound notification transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook receiving `{userId, message, correlationId}`. Log-only if unset.
    pub webhook_url: Option<String>,
}

/// Outbound creation-event transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Webhook receiving creation events. Log-only if unset.
    pub webhook_url: Option<String>,
}

/// LLM classifier for approval replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// OpenAI-compatible chat completions endpoint. Keyword matching if unset.
    pub endpoint: Option<String>,
    pub default_model: String,
    /// Models a user may select. Empty allows any.
    pub allowed_models: Vec<String>,
    /// Per-user credentials and model preference.
    pub users: BTreeMap<String, UserClassifierConfig>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            default_model: "gpt-4o-mini".to_string(),
            allowed_models: Vec::new(),
            users: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserClassifierConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
}
