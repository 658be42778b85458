//! Execution agent contract.
//!
//! An execution agent is the external service that performs the
//! type-specific work (creating the calendar event, saving the bookmark,
//! running the research job).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tessera_core::types::Action;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Completed,
    Failed,
}

/// What an agent reports back for one action.
///
/// `existing_resource_id` set means the resource already exists; the action
/// moves to `conflict` regardless of `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_resource_id: Option<String>,
}

impl AgentOutcome {
    pub fn completed(resource_url: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Completed,
            resource_url: Some(resource_url.into()),
            message: None,
            error_code: None,
            existing_resource_id: None,
        }
    }

    pub fn failed(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            resource_url: None,
            message: Some(message.into()),
            error_code: Some(error_code.into()),
            existing_resource_id: None,
        }
    }

    pub fn duplicate(existing_resource_id: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            resource_url: None,
            message: None,
            error_code: Some("DUPLICATE".to_string()),
            existing_resource_id: Some(existing_resource_id.into()),
        }
    }
}

#[async_trait]
pub trait ExecutionAgent: Send + Sync {
    /// Perform the work for an action the caller has claimed.
    async fn process_action(&self, action: &Action) -> Result<AgentOutcome, AgentError>;

    /// Overwrite a resource that already existed when the action ran.
    async fn update_existing(
        &self,
        _action: &Action,
        _existing_resource_id: &str,
    ) -> Result<AgentOutcome, AgentError> {
        Err(AgentError::Unsupported("updating existing resources".to_string()))
    }
}
