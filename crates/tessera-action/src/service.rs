//! User-facing action operations.
//!
//! Every method takes the caller's user id; another user's action is
//! `Forbidden`, never silently hidden.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tessera_core::events::ActionCreatedEvent;
use tessera_core::types::{Action, ActionFilter, ActionStatus, ActionType, NewAction, Payload};
use tessera_storage::{ActionStore, TransitionOutcome};

use crate::agent::AgentOutcome;
use crate::dispatcher::{Dispatcher, ExecutionOutcome};
use crate::error::ActionError;
use crate::publish::{publish_best_effort, EventPublisher};

/// Result of a manual status change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub action: Action,
    /// False when the action had already moved on and nothing was written.
    pub applied: bool,
}

pub struct ActionService {
    store: Arc<ActionStore>,
    dispatcher: Arc<Dispatcher>,
    publisher: Arc<dyn EventPublisher>,
}

impl ActionService {
    pub fn new(
        store: Arc<ActionStore>,
        dispatcher: Arc<Dispatcher>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            publisher,
        }
    }

    /// Store a new pending action and announce it.
    pub async fn create(&self, new: NewAction) -> Result<Action, ActionError> {
        let action = self.store.create(new)?;
        publish_best_effort(
            self.publisher.as_ref(),
            &ActionCreatedEvent::from_action(&action),
        )
        .await;
        info!(action_id = %action.id, action_type = %action.action_type, "Action created");
        Ok(action)
    }

    pub fn list(&self, user_id: &str, filter: &ActionFilter) -> Result<Vec<Action>, ActionError> {
        Ok(self.store.list_by_user(user_id, filter)?)
    }

    pub fn get(&self, user_id: &str, id: Uuid) -> Result<Action, ActionError> {
        Ok(self.store.get_owned(user_id, id)?)
    }

    pub fn batch_get(&self, user_id: &str, ids: &[Uuid]) -> Result<Vec<Action>, ActionError> {
        Ok(self.store.batch_get(user_id, ids)?)
    }

    pub fn delete(&self, user_id: &str, id: Uuid) -> Result<(), ActionError> {
        Ok(self.store.delete(user_id, id)?)
    }

    pub fn update_type(
        &self,
        user_id: &str,
        id: Uuid,
        action_type: ActionType,
    ) -> Result<Action, ActionError> {
        let action = self.store.get_owned(user_id, id)?;
        Ok(self.store.update_type(action.id, action_type)?)
    }

    /// Apply a manual status change: approve (`processing`), `rejected` or
    /// `archived`.
    pub async fn set_status(
        &self,
        user_id: &str,
        id: Uuid,
        next: ActionStatus,
    ) -> Result<StatusChange, ActionError> {
        if !next.is_user_settable() {
            return Err(ActionError::Validation(format!(
                "Status {} cannot be set directly",
                next
            )));
        }
        let action = self.store.get_owned(user_id, id)?;
        if action.status == next {
            return Ok(StatusChange {
                action,
                applied: false,
            });
        }

        let mut patch = Payload::new();
        match next {
            ActionStatus::Processing => {
                if action.status == ActionStatus::Conflict {
                    return Err(ActionError::InvalidOperation(
                        "Resolve a conflict with resolve-duplicate".into(),
                    ));
                }
                if !self.dispatcher.is_registered(action.action_type) {
                    return Err(ActionError::UnregisteredHandler(action.action_type));
                }
                patch.insert("approvedAt".into(), json!(Utc::now().to_rfc3339()));
                patch.insert("approvalSource".into(), json!("manual"));
            }
            ActionStatus::Rejected => {
                patch.insert("rejectedAt".into(), json!(Utc::now().to_rfc3339()));
                patch.insert("rejectionSource".into(), json!("manual"));
            }
            _ => {
                patch.insert("archivedAt".into(), json!(Utc::now().to_rfc3339()));
            }
        }

        match self
            .store
            .update_status_if_with(action.id, action.status, next, Some(&patch))?
        {
            TransitionOutcome::Updated(updated) => {
                info!(action_id = %updated.id, from = %action.status, to = %next, "Manual status change");
                if next == ActionStatus::Processing {
                    let dispatch = self.dispatcher.route_approved(updated.clone()).await?;
                    info!(action_id = %updated.id, outcome = dispatch.label(), "Manually approved action dispatched");
                }
                Ok(StatusChange {
                    action: self.store.get_owned(user_id, id)?,
                    applied: true,
                })
            }
            TransitionOutcome::StatusMismatch { current } => {
                info!(action_id = %action.id, status = %current, "Manual status change lost a race");
                Ok(StatusChange {
                    action: self.store.get_owned(user_id, id)?,
                    applied: false,
                })
            }
            TransitionOutcome::NotFound => Err(ActionError::NotFound(action.id)),
        }
    }

    /// Execute an action awaiting approval on the user's behalf.
    pub async fn execute(&self, user_id: &str, id: Uuid) -> Result<ExecutionOutcome, ActionError> {
        let action = self.store.get_owned(user_id, id)?;
        if action.status != ActionStatus::AwaitingApproval {
            return Err(ActionError::InvalidOperation(format!(
                "Only actions awaiting approval can be executed, this one is {}",
                action.status
            )));
        }
        self.dispatcher.execute(action).await
    }

    /// Settle a published action with the outcome its consumer reports.
    pub async fn record_result(
        &self,
        id: Uuid,
        outcome: AgentOutcome,
    ) -> Result<ExecutionOutcome, ActionError> {
        let action = self.store.get(id)?.ok_or(ActionError::NotFound(id))?;
        self.dispatcher.record_result(action, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::HandleOutcome;
    use crate::testing::Harness;

    fn service(h: &Harness) -> ActionService {
        ActionService::new(h.store.clone(), h.dispatcher.clone(), h.publisher.clone())
    }

    fn new_action(action_type: ActionType) -> NewAction {
        NewAction {
            user_id: "user-1".into(),
            command_id: "cmd-9".into(),
            action_type,
            confidence: 0.6,
            title: "Read the RFC".into(),
            payload: Payload::new(),
        }
    }

    #[tokio::test]
    async fn test_create_publishes_event() {
        let h = Harness::new();
        let action = service(&h).create(new_action(ActionType::Todo)).await.unwrap();
        assert_eq!(action.status, ActionStatus::Pending);

        let events = h.publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action_id, action.id);
        assert_eq!(events[0].command_id, "cmd-9");
    }

    #[tokio::test]
    async fn test_create_survives_publish_failure() {
        let h = Harness::new();
        h.publisher.set_failing(true);
        let action = service(&h).create(new_action(ActionType::Todo)).await.unwrap();
        assert!(h.store.get(action.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_validates() {
        let h = Harness::new();
        let mut new = new_action(ActionType::Todo);
        new.confidence = 1.5;
        assert!(matches!(
            service(&h).create(new).await,
            Err(ActionError::Validation(_))
        ));
        assert!(h.publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_manual_approve_executes_direct_route() {
        let h = Harness::new();
        let action = h.awaiting(ActionType::Todo, 0.5).await;

        let change = service(&h)
            .set_status("user-1", action.id, ActionStatus::Processing)
            .await
            .unwrap();
        assert!(change.applied);
        assert_eq!(change.action.status, ActionStatus::Completed);
        assert_eq!(change.action.payload_str("approvalSource"), Some("manual"));
        assert_eq!(h.agent.process_calls(), vec![action.id]);
    }

    #[tokio::test]
    async fn test_manual_reject_and_archive() {
        let h = Harness::new();
        let svc = service(&h);
        let action = h.awaiting(ActionType::Todo, 0.5).await;

        let change = svc
            .set_status("user-1", action.id, ActionStatus::Rejected)
            .await
            .unwrap();
        assert!(change.applied);
        assert_eq!(change.action.status, ActionStatus::Rejected);
        assert!(change.action.payload_str("rejectedAt").is_some());

        let change = svc
            .set_status("user-1", action.id, ActionStatus::Archived)
            .await
            .unwrap();
        assert_eq!(change.action.status, ActionStatus::Archived);

        let again = svc
            .set_status("user-1", action.id, ActionStatus::Archived)
            .await
            .unwrap();
        assert!(!again.applied);
    }

    #[tokio::test]
    async fn test_set_status_guards() {
        let h = Harness::new();
        let svc = service(&h);
        let action = h.create(ActionType::Todo, 0.5);

        assert!(matches!(
            svc.set_status("user-1", action.id, ActionStatus::Completed).await,
            Err(ActionError::Validation(_))
        ));
        assert!(matches!(
            svc.set_status("user-2", action.id, ActionStatus::Rejected).await,
            Err(ActionError::Forbidden(_))
        ));

        h.agent.push(Ok(AgentOutcome::completed("https://agent.test/x")));
        svc.set_status("user-1", action.id, ActionStatus::Processing)
            .await
            .unwrap();
        assert_eq!(h.reload(action.id).status, ActionStatus::Completed);
        assert!(matches!(
            svc.set_status("user-1", action.id, ActionStatus::Rejected).await,
            Err(ActionError::InvalidTransition(
                ActionStatus::Completed,
                ActionStatus::Rejected
            ))
        ));
    }

    #[tokio::test]
    async fn test_processing_from_conflict_needs_resolution() {
        let h = Harness::new();
        h.agent.push(Ok(AgentOutcome::duplicate("bm-1")));
        let action = h.create(ActionType::Link, 0.95);
        h.dispatcher.handle(action.clone()).await.unwrap();

        let err = service(&h)
            .set_status("user-1", action.id, ActionStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidOperation(_)));
        assert_eq!(h.reload(action.id).status, ActionStatus::Conflict);
    }

    #[tokio::test]
    async fn test_update_type_rejected_once_action_moved_on() {
        use ActionStatus::*;
        let h = Harness::new();
        let svc = service(&h);
        let paths: [&[ActionStatus]; 6] = [
            &[Processing],
            &[Processing, Completed],
            &[Processing, Failed],
            &[Processing, Conflict],
            &[AwaitingApproval, Rejected],
            &[Archived],
        ];

        for path in paths {
            let action = h.create(ActionType::Todo, 0.5);
            let mut current = Pending;
            for &next in path {
                assert!(h.store.update_status_if(action.id, current, next).unwrap().is_updated());
                current = next;
            }

            let result = svc.update_type("user-1", action.id, ActionType::Note);
            assert!(
                matches!(result, Err(ActionError::InvalidOperation(_))),
                "type change allowed in {}",
                current
            );
            assert_eq!(h.reload(action.id).action_type, ActionType::Todo);
        }
    }

    #[tokio::test]
    async fn test_update_type_guard() {
        let h = Harness::new();
        let svc = service(&h);
        let action = h.awaiting(ActionType::Todo, 0.5).await;

        let updated = svc
            .update_type("user-1", action.id, ActionType::Reminder)
            .unwrap();
        assert_eq!(updated.action_type, ActionType::Reminder);

        let link = h.create(ActionType::Link, 0.95);
        h.dispatcher.handle(link.clone()).await.unwrap();
        assert!(matches!(
            svc.update_type("user-1", link.id, ActionType::Note),
            Err(ActionError::InvalidOperation(_))
        ));
        assert!(matches!(
            svc.update_type("user-2", action.id, ActionType::Note),
            Err(ActionError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_only_from_awaiting_approval() {
        let h = Harness::new();
        let svc = service(&h);
        let action = h.awaiting(ActionType::Calendar, 0.7).await;

        let outcome = svc.execute("user-1", action.id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);

        let err = svc.execute("user-1", action.id).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidOperation(_)));
        assert_eq!(h.agent.process_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_record_result_for_published_action() {
        let h = Harness::new();
        let svc = service(&h);
        let action = h.create(ActionType::Research, 0.92);
        assert_eq!(
            h.dispatcher.handle(action.clone()).await.unwrap(),
            HandleOutcome::AwaitingApproval
        );
        svc.set_status("user-1", action.id, ActionStatus::Processing)
            .await
            .unwrap();
        assert_eq!(h.reload(action.id).status, ActionStatus::Processing);

        let outcome = svc
            .record_result(action.id, AgentOutcome::completed("https://docs/r/5"))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(h.reload(action.id).status, ActionStatus::Completed);

        assert!(matches!(
            svc.record_result(Uuid::new_v4(), AgentOutcome::completed("x"))
                .await,
            Err(ActionError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_and_batch_are_scoped_to_user() {
        let h = Harness::new();
        let svc = service(&h);
        let mine = h.create(ActionType::Todo, 0.5);
        let theirs = h.create_for("user-2", ActionType::Todo, 0.5);

        let listed = svc.list("user-1", &ActionFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);

        let batch = svc.batch_get("user-1", &[mine.id, theirs.id]).unwrap();
        assert_eq!(batch.len(), 1);

        assert!(matches!(
            svc.delete("user-1", theirs.id),
            Err(ActionError::Forbidden(_))
        ));
        svc.delete("user-1", mine.id).unwrap();
        assert!(matches!(
            svc.get("user-1", mine.id),
            Err(ActionError::NotFound(_))
        ));
    }
}
