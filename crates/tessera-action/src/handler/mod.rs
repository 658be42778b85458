//! Action handler registry and trait definition.
//!
//! Defines the `ActionHandler` async trait and the registry the dispatcher
//! consults to find the handler for an action type. The registry is built
//! once at startup and never mutated afterwards.

pub mod agent;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tessera_core::types::{Action, ActionType, ApprovalRoute};

use crate::agent::AgentOutcome;
use crate::error::AgentError;

pub use agent::AgentHandler;

/// Type-specific behavior plugged into the dispatcher.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// How an approved action reaches its agent.
    fn approval_route(&self) -> ApprovalRoute {
        ApprovalRoute::Direct
    }

    /// One-line description shown in the approval request.
    fn describe(&self, action: &Action) -> String;

    async fn execute(&self, action: &Action) -> Result<AgentOutcome, AgentError>;

    async fn update_existing(
        &self,
        action: &Action,
        existing_resource_id: &str,
    ) -> Result<AgentOutcome, AgentError>;
}

/// Static map from action type to handler.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for its type.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let action_type = handler.action_type();
        if self.handlers.insert(action_type, handler).is_some() {
            tracing::warn!(action_type = %action_type, "Replaced existing action handler");
        }
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }

    pub fn is_registered(&self, action_type: ActionType) -> bool {
        self.handlers.contains_key(&action_type)
    }

    /// Registered types in declaration order.
    pub fn registered_types(&self) -> Vec<ActionType> {
        ActionType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAgent;

    #[test]
    fn test_register_and_lookup() {
        let agent = Arc::new(FakeAgent::completing());
        let mut registry = ActionRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(AgentHandler::new(
            ActionType::Link,
            ApprovalRoute::Direct,
            agent.clone(),
        )));
        registry.register(Arc::new(AgentHandler::new(
            ActionType::Research,
            ApprovalRoute::Publish,
            agent,
        )));

        assert_eq!(registry.len(), 2);
        assert!(registry.is_registered(ActionType::Link));
        assert!(!registry.is_registered(ActionType::Note));
        assert!(registry.get(ActionType::Note).is_none());
        assert_eq!(
            registry.get(ActionType::Research).unwrap().approval_route(),
            ApprovalRoute::Publish
        );
        assert_eq!(
            registry.registered_types(),
            vec![ActionType::Research, ActionType::Link]
        );
    }

    #[test]
    fn test_register_replaces_same_type() {
        let agent = Arc::new(FakeAgent::completing());
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(AgentHandler::new(
            ActionType::Todo,
            ApprovalRoute::Direct,
            agent.clone(),
        )));
        registry.register(Arc::new(AgentHandler::new(
            ActionType::Todo,
            ApprovalRoute::Publish,
            agent,
        )));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(ActionType::Todo).unwrap().approval_route(),
            ApprovalRoute::Publish
        );
    }
}
