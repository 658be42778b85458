//! Routes creation events and approved actions to their handlers.
//!
//! Every status change goes through the store's compare-and-set primitive.
//! Losing a race is reported as an outcome, never as an error, so redelivered
//! events and concurrent callers converge on exactly one execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use tessera_core::config::DispatchConfig;
use tessera_core::events::ActionCreatedEvent;
use tessera_core::types::{Action, ActionStatus, ActionType, ApprovalRoute, Payload};
use tessera_storage::{ActionStore, CorrelationRepository, TransitionOutcome};

use crate::agent::{AgentOutcome, AgentStatus};
use crate::error::{ActionError, AgentError};
use crate::handler::{ActionHandler, ActionRegistry};
use crate::notify::{approval_token, messages, send_best_effort, NotificationSender};
use crate::publish::{publish_best_effort, EventPublisher};

/// Which actions skip approval and how long an agent may run.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub auto_execute_threshold: f32,
    pub auto_execute_types: Vec<ActionType>,
    pub execution_timeout: Duration,
}

impl DispatchPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            auto_execute_threshold: config.auto_execute_threshold,
            auto_execute_types: config.auto_execute_types.clone(),
            execution_timeout: Duration::from_secs(config.execution_timeout_secs),
        }
    }

    pub fn auto_executes(&self, action: &Action) -> bool {
        self.auto_execute_types.contains(&action.action_type)
            && action.confidence >= self.auto_execute_threshold
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

/// Result of the pre-approval step.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    AwaitingApproval,
    Executed(ExecutionOutcome),
    /// No handler for the type; the action stays pending.
    Unhandled,
    /// The action already left `pending`.
    AlreadyHandled { current: ActionStatus },
    Missing,
}

impl HandleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            HandleOutcome::AwaitingApproval => "awaiting_approval",
            HandleOutcome::Executed(_) => "executed",
            HandleOutcome::Unhandled => "unhandled",
            HandleOutcome::AlreadyHandled { .. } => "already_handled",
            HandleOutcome::Missing => "missing",
        }
    }
}

/// Result of running an agent for a claimed action.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed,
    Failed { error_code: String, retryable: bool },
    Conflict,
    /// Another caller moved the action first; nothing was recorded.
    Superseded { current: ActionStatus },
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed => "completed",
            ExecutionOutcome::Failed { .. } => "failed",
            ExecutionOutcome::Conflict => "conflict",
            ExecutionOutcome::Superseded { .. } => "superseded",
        }
    }
}

/// What happened to an action right after approval.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDispatch {
    Executed(ExecutionOutcome),
    Published,
    PublishFailed,
}

impl ApprovalDispatch {
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalDispatch::Executed(outcome) => outcome.label(),
            ApprovalDispatch::Published => "published",
            ApprovalDispatch::PublishFailed => "publish_failed",
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    store: Arc<ActionStore>,
    correlations: Arc<CorrelationRepository>,
    notifier: Arc<dyn NotificationSender>,
    publisher: Arc<dyn EventPublisher>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ActionRegistry>,
        store: Arc<ActionStore>,
        correlations: Arc<CorrelationRepository>,
        notifier: Arc<dyn NotificationSender>,
        publisher: Arc<dyn EventPublisher>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            registry,
            store,
            correlations,
            notifier,
            publisher,
            policy,
        }
    }

    pub fn registered_types(&self) -> Vec<ActionType> {
        self.registry.registered_types()
    }

    pub fn is_registered(&self, action_type: ActionType) -> bool {
        self.registry.is_registered(action_type)
    }

    /// Handle a (possibly redelivered) creation event.
    ///
    /// `expected_type` is set by type-specific consumers; an event for another
    /// type is acknowledged without side effects.
    pub async fn on_action_created(
        &self,
        event: &ActionCreatedEvent,
        expected_type: Option<ActionType>,
    ) -> Result<HandleOutcome, ActionError> {
        let Some(action) = self.store.get(event.action_id)? else {
            info!(action_id = %event.action_id, "Creation event for unknown action");
            return Ok(HandleOutcome::Missing);
        };
        if !action.is_owned_by(&event.user_id) {
            return Err(ActionError::Forbidden(action.id));
        }
        if let Some(expected) = expected_type {
            if expected != action.action_type {
                info!(
                    action_id = %action.id,
                    action_type = %action.action_type,
                    consumer = %expected,
                    "Creation event for another type ignored"
                );
                return Ok(HandleOutcome::Unhandled);
            }
        }
        if action.status != ActionStatus::Pending {
            info!(action_id = %action.id, status = %action.status, "Creation event redelivered; already handled");
            return Ok(HandleOutcome::AlreadyHandled {
                current: action.status,
            });
        }
        self.handle(action).await
    }

    /// Pre-approval step for a pending action: auto-execute or request approval.
    pub async fn handle(&self, action: Action) -> Result<HandleOutcome, ActionError> {
        let Some(handler) = self.registry.get(action.action_type) else {
            info!(
                action_id = %action.id,
                action_type = %action.action_type,
                "No handler registered; action left pending"
            );
            return Ok(HandleOutcome::Unhandled);
        };

        if self.policy.auto_executes(&action) {
            return match self
                .store
                .update_status_if(action.id, ActionStatus::Pending, ActionStatus::Processing)?
            {
                TransitionOutcome::Updated(claimed) => {
                    info!(
                        action_id = %claimed.id,
                        confidence = claimed.confidence,
                        "Auto-executing without approval"
                    );
                    let outcome = self.run_claimed(handler.as_ref(), claimed).await?;
                    Ok(HandleOutcome::Executed(outcome))
                }
                TransitionOutcome::StatusMismatch { current } => {
                    info!(action_id = %action.id, status = %current, "Auto-execute claim lost");
                    Ok(HandleOutcome::AlreadyHandled { current })
                }
                TransitionOutcome::NotFound => Ok(HandleOutcome::Missing),
            };
        }

        match self.store.update_status_if(
            action.id,
            ActionStatus::Pending,
            ActionStatus::AwaitingApproval,
        )? {
            TransitionOutcome::Updated(awaiting) => {
                self.request_approval(handler.as_ref(), &awaiting).await;
                Ok(HandleOutcome::AwaitingApproval)
            }
            TransitionOutcome::StatusMismatch { current } => {
                info!(action_id = %action.id, status = %current, "Approval request already handled");
                Ok(HandleOutcome::AlreadyHandled { current })
            }
            TransitionOutcome::NotFound => Ok(HandleOutcome::Missing),
        }
    }

    async fn request_approval(&self, handler: &dyn ActionHandler, action: &Action) {
        let token = approval_token(action.id);
        if let Err(e) = self.correlations.record(&token, action.id, &action.user_id) {
            warn!(action_id = %action.id, error = %e, "Failed to record correlation token");
        }

        let message = messages::approval_request(action, &handler.describe(action));
        let message_id =
            send_best_effort(self.notifier.as_ref(), &action.user_id, &message, Some(&token)).await;

        if let Some(message_id) = message_id {
            if let Err(e) = self.correlations.attach_message_id(&token, &message_id) {
                warn!(action_id = %action.id, error = %e, "Failed to attach message id");
            }
        }
        info!(action_id = %action.id, "Approval requested");
    }

    /// Execute an action.
    ///
    /// An `awaiting_approval` action is claimed first. A `processing` action
    /// is assumed to be claimed by the caller.
    pub async fn execute(&self, action: Action) -> Result<ExecutionOutcome, ActionError> {
        let handler = self
            .registry
            .get(action.action_type)
            .ok_or(ActionError::UnregisteredHandler(action.action_type))?;

        let claimed = match action.status {
            ActionStatus::AwaitingApproval => match self.store.update_status_if(
                action.id,
                ActionStatus::AwaitingApproval,
                ActionStatus::Processing,
            )? {
                TransitionOutcome::Updated(claimed) => claimed,
                TransitionOutcome::StatusMismatch { current } => {
                    info!(action_id = %action.id, status = %current, "Execution claim lost");
                    return Ok(ExecutionOutcome::Superseded { current });
                }
                TransitionOutcome::NotFound => return Err(ActionError::NotFound(action.id)),
            },
            ActionStatus::Processing => action,
            other => {
                return Err(ActionError::InvalidOperation(format!(
                    "Cannot execute an action in status {}",
                    other
                )))
            }
        };

        self.run_claimed(handler.as_ref(), claimed).await
    }

    /// Send an approved (`processing`) action on its way.
    ///
    /// Callers check registration before approving; an unregistered type is
    /// neither executed nor published.
    pub async fn route_approved(&self, action: Action) -> Result<ApprovalDispatch, ActionError> {
        let Some(handler) = self.registry.get(action.action_type) else {
            warn!(
                action_id = %action.id,
                action_type = %action.action_type,
                "Approved action has no handler"
            );
            return Err(ActionError::UnregisteredHandler(action.action_type));
        };
        match handler.approval_route() {
            ApprovalRoute::Direct => {
                let outcome = self.run_claimed(handler.as_ref(), action).await?;
                Ok(ApprovalDispatch::Executed(outcome))
            }
            ApprovalRoute::Publish => {
                let event = ActionCreatedEvent::from_action(&action);
                if publish_best_effort(self.publisher.as_ref(), &event).await {
                    info!(action_id = %action.id, "Approved action published");
                    Ok(ApprovalDispatch::Published)
                } else {
                    Ok(ApprovalDispatch::PublishFailed)
                }
            }
        }
    }

    /// Overwrite the existing resource for a claimed conflict resolution.
    pub async fn execute_update(
        &self,
        action: Action,
        existing_resource_id: &str,
    ) -> Result<ExecutionOutcome, ActionError> {
        if action.status != ActionStatus::Processing {
            return Err(ActionError::InvalidOperation(format!(
                "Cannot update from status {}",
                action.status
            )));
        }
        let handler = self
            .registry
            .get(action.action_type)
            .ok_or(ActionError::UnregisteredHandler(action.action_type))?;

        let result = tokio::time::timeout(
            self.policy.execution_timeout,
            handler.update_existing(&action, existing_resource_id),
        )
        .await;

        // A repeated duplicate report on the update path is a success.
        let result = result.map(|inner| {
            inner.map(|mut outcome| {
                if outcome.existing_resource_id.take().is_some()
                    && outcome.status == AgentStatus::Failed
                    && outcome.error_code.as_deref() == Some("DUPLICATE")
                {
                    outcome.status = AgentStatus::Completed;
                    outcome.error_code = None;
                }
                outcome
            })
        });
        self.settle(&action, result.map_err(|_| self.timeout_error()))
            .await
    }

    /// Record the result reported by an asynchronous consumer of a published
    /// action.
    pub async fn record_result(
        &self,
        action: Action,
        outcome: AgentOutcome,
    ) -> Result<ExecutionOutcome, ActionError> {
        if action.status != ActionStatus::Processing {
            info!(action_id = %action.id, status = %action.status, "Result for an action no longer processing");
            return Ok(ExecutionOutcome::Superseded {
                current: action.status,
            });
        }
        self.settle(&action, Ok(Ok(outcome))).await
    }

    async fn run_claimed(
        &self,
        handler: &dyn ActionHandler,
        action: Action,
    ) -> Result<ExecutionOutcome, ActionError> {
        let result = tokio::time::timeout(self.policy.execution_timeout, handler.execute(&action)).await;
        self.settle(&action, result.map_err(|_| self.timeout_error()))
            .await
    }

    fn timeout_error(&self) -> AgentError {
        AgentError::Transport(format!(
            "no response within {}s",
            self.policy.execution_timeout.as_secs_f32()
        ))
    }

    /// Record an agent result on a `processing` action and notify the user.
    async fn settle(
        &self,
        action: &Action,
        result: Result<Result<AgentOutcome, AgentError>, AgentError>,
    ) -> Result<ExecutionOutcome, ActionError> {
        let mut patch = Payload::new();
        patch.insert("lastAttemptAt".into(), json!(Utc::now().to_rfc3339()));

        let (next, outcome) = match result {
            Err(timeout) => {
                warn!(action_id = %action.id, "Execution agent timed out");
                failure_patch(&mut patch, "TIMEOUT", &timeout.to_string(), true);
                (
                    ActionStatus::Failed,
                    ExecutionOutcome::Failed {
                        error_code: "TIMEOUT".to_string(),
                        retryable: true,
                    },
                )
            }
            Ok(Err(err)) => {
                let retryable = err.is_transient();
                warn!(action_id = %action.id, error = %err, retryable, "Execution agent failed");
                failure_patch(&mut patch, err.code(), &err.to_string(), retryable);
                (
                    ActionStatus::Failed,
                    ExecutionOutcome::Failed {
                        error_code: err.code().to_string(),
                        retryable,
                    },
                )
            }
            Ok(Ok(agent)) => match agent.existing_resource_id {
                Some(existing) => {
                    patch.insert("existingResourceId".into(), json!(existing));
                    if let Some(message) = agent.message {
                        patch.insert("message".into(), json!(message));
                    }
                    (ActionStatus::Conflict, ExecutionOutcome::Conflict)
                }
                None => match agent.status {
                    AgentStatus::Completed => {
                        if let Some(url) = agent.resource_url {
                            patch.insert("resourceUrl".into(), json!(url));
                        }
                        patch.insert(
                            "message".into(),
                            agent.message.map(Value::String).unwrap_or(Value::Null),
                        );
                        patch.insert("errorCode".into(), Value::Null);
                        patch.insert("retryable".into(), json!(false));
                        patch.insert("completedAt".into(), json!(Utc::now().to_rfc3339()));
                        (ActionStatus::Completed, ExecutionOutcome::Completed)
                    }
                    AgentStatus::Failed => {
                        let code = agent
                            .error_code
                            .unwrap_or_else(|| "EXECUTION_FAILED".to_string());
                        let message = agent.message.unwrap_or_else(|| code.clone());
                        failure_patch(&mut patch, &code, &message, false);
                        (
                            ActionStatus::Failed,
                            ExecutionOutcome::Failed {
                                error_code: code,
                                retryable: false,
                            },
                        )
                    }
                },
            },
        };

        match self.store.update_status_if_with(
            action.id,
            ActionStatus::Processing,
            next,
            Some(&patch),
        )? {
            TransitionOutcome::Updated(settled) => {
                info!(action_id = %settled.id, status = %settled.status, "Execution recorded");
                let message = match &outcome {
                    ExecutionOutcome::Completed => Some(messages::completed(&settled)),
                    ExecutionOutcome::Failed { retryable, .. } => {
                        Some(messages::failed(&settled, *retryable))
                    }
                    ExecutionOutcome::Conflict => Some(messages::conflict(&settled)),
                    ExecutionOutcome::Superseded { .. } => None,
                };
                if let Some(message) = message {
                    send_best_effort(self.notifier.as_ref(), &settled.user_id, &message, None)
                        .await;
                }
                Ok(outcome)
            }
            TransitionOutcome::StatusMismatch { current } => {
                info!(action_id = %action.id, status = %current, "Execution result discarded; action moved on");
                Ok(ExecutionOutcome::Superseded { current })
            }
            TransitionOutcome::NotFound => {
                warn!(action_id = %action.id, "Action deleted during execution");
                Err(ActionError::NotFound(action.id))
            }
        }
    }
}

fn failure_patch(patch: &mut Payload, code: &str, message: &str, retryable: bool) {
    patch.insert("errorCode".into(), json!(code));
    patch.insert("message".into(), json!(message));
    patch.insert("retryable".into(), json!(retryable));
}
