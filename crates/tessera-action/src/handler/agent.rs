//! Handler that delegates the work to an external execution agent.

use std::sync::Arc;

use async_trait::async_trait;

use tessera_core::types::{Action, ActionType, ApprovalRoute};

use crate::agent::{AgentOutcome, ExecutionAgent};
use crate::error::AgentError;
use crate::handler::ActionHandler;

/// One handler per action type, each backed by that type's agent.
pub struct AgentHandler {
    action_type: ActionType,
    route: ApprovalRoute,
    agent: Arc<dyn ExecutionAgent>,
}

impl AgentHandler {
    pub fn new(action_type: ActionType, route: ApprovalRoute, agent: Arc<dyn ExecutionAgent>) -> Self {
        Self {
            action_type,
            route,
            agent,
        }
    }
}

#[async_trait]
impl ActionHandler for AgentHandler {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    fn approval_route(&self) -> ApprovalRoute {
        self.route
    }

    fn describe(&self, action: &Action) -> String {
        match action.action_type {
            ActionType::Research => match action.payload_str("prompt") {
                Some(prompt) => format!("Research \"{}\": {}", action.title, prompt),
                None => format!("Research \"{}\"", action.title),
            },
            ActionType::Todo => format!("Add to-do \"{}\"", action.title),
            ActionType::Note => format!("Create note \"{}\"", action.title),
            ActionType::Link => match action.payload_str("url") {
                Some(url) => format!("Save link {}", url),
                None => format!("Save link \"{}\"", action.title),
            },
            ActionType::Calendar => match action.payload_str("start") {
                Some(start) => format!("Create calendar event \"{}\" at {}", action.title, start),
                None => format!("Create calendar event \"{}\"", action.title),
            },
            ActionType::Issue => match action.payload_str("repository") {
                Some(repo) => format!("Open issue \"{}\" in {}", action.title, repo),
                None => format!("Open issue \"{}\"", action.title),
            },
            ActionType::Reminder => match action.payload_str("remindAt") {
                Some(at) => format!("Remind you \"{}\" at {}", action.title, at),
                None => format!("Set reminder \"{}\"", action.title),
            },
        }
    }

    async fn execute(&self, action: &Action) -> Result<AgentOutcome, AgentError> {
        tracing::debug!(action_id = %action.id, action_type = %self.action_type, "Calling execution agent");
        self.agent.process_action(action).await
    }

    async fn update_existing(
        &self,
        action: &Action,
        existing_resource_id: &str,
    ) -> Result<AgentOutcome, AgentError> {
        tracing::debug!(
            action_id = %action.id,
            existing_resource_id = %existing_resource_id,
            "Calling execution agent update"
        );
        self.agent.update_existing(action, existing_resource_id).await
    }
}
