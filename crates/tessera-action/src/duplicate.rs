//! Resolution of "resource already exists" conflicts.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tessera_core::types::{ActionStatus, Payload};
use tessera_storage::{ActionStore, TransitionOutcome};

use crate::dispatcher::{Dispatcher, ExecutionOutcome};
use crate::error::ActionError;
use crate::notify::{messages, send_best_effort, NotificationSender};

/// The user's answer to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateChoice {
    /// Keep the existing resource and drop this action.
    Skip,
    /// Overwrite the existing resource.
    Update,
}

impl DuplicateChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateChoice::Skip => "skip",
            DuplicateChoice::Update => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Skipped,
    Updated(ExecutionOutcome),
    /// The action is not (or no longer) in conflict.
    StatusMismatch { current: ActionStatus },
}

impl ResolutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionOutcome::Skipped => "skipped",
            ResolutionOutcome::Updated(outcome) => outcome.label(),
            ResolutionOutcome::StatusMismatch { .. } => "status_mismatch",
        }
    }
}

pub struct DuplicateResolver {
    store: Arc<ActionStore>,
    dispatcher: Arc<Dispatcher>,
    notifier: Arc<dyn NotificationSender>,
}

impl DuplicateResolver {
    pub fn new(
        store: Arc<ActionStore>,
        dispatcher: Arc<Dispatcher>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            notifier,
        }
    }

    pub async fn resolve(
        &self,
        user_id: &str,
        action_id: Uuid,
        choice: DuplicateChoice,
    ) -> Result<ResolutionOutcome, ActionError> {
        let action = self.store.get_owned(user_id, action_id)?;

        let mut patch = Payload::new();
        patch.insert("resolution".into(), json!(choice.as_str()));
        patch.insert("resolvedAt".into(), json!(Utc::now().to_rfc3339()));

        match choice {
            DuplicateChoice::Skip => {
                match self.store.update_status_if_with(
                    action.id,
                    ActionStatus::Conflict,
                    ActionStatus::Rejected,
                    Some(&patch),
                )? {
                    TransitionOutcome::Updated(skipped) => {
                        info!(action_id = %skipped.id, "Duplicate skipped");
                        send_best_effort(
                            self.notifier.as_ref(),
                            &skipped.user_id,
                            &messages::rejected(&skipped),
                            None,
                        )
                        .await;
                        Ok(ResolutionOutcome::Skipped)
                    }
                    TransitionOutcome::StatusMismatch { current } => {
                        info!(action_id = %action.id, status = %current, "Duplicate already resolved");
                        Ok(ResolutionOutcome::StatusMismatch { current })
                    }
                    TransitionOutcome::NotFound => Err(ActionError::NotFound(action.id)),
                }
            }
            DuplicateChoice::Update => {
                if action.status != ActionStatus::Conflict {
                    info!(action_id = %action.id, status = %action.status, "Duplicate already resolved");
                    return Ok(ResolutionOutcome::StatusMismatch {
                        current: action.status,
                    });
                }
                let existing = action
                    .payload_str("existingResourceId")
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ActionError::Validation("Action has no existing resource to update".into())
                    })?;
                if !self.dispatcher.is_registered(action.action_type) {
                    return Err(ActionError::UnregisteredHandler(action.action_type));
                }

                match self.store.update_status_if_with(
                    action.id,
                    ActionStatus::Conflict,
                    ActionStatus::Processing,
                    Some(&patch),
                )? {
                    TransitionOutcome::Updated(claimed) => {
                        info!(action_id = %claimed.id, existing_resource_id = %existing, "Updating existing resource");
                        let outcome = self.dispatcher.execute_update(claimed, &existing).await?;
                        Ok(ResolutionOutcome::Updated(outcome))
                    }
                    TransitionOutcome::StatusMismatch { current } => {
                        info!(action_id = %action.id, status = %current, "Duplicate already resolved");
                        Ok(ResolutionOutcome::StatusMismatch { current })
                    }
                    TransitionOutcome::NotFound => Err(ActionError::NotFound(action.id)),
                }
            }
        }
    }
}
