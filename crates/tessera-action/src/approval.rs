//! Approval reply processing.
//!
//! Resolves a natural-language reply to its action, classifies the intent
//! with the user's classifier and drives the action through the
//! compare-and-set primitive. Replies are safe to deliver more than once:
//! anything not `awaiting_approval` is acknowledged without side effects.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tessera_core::types::{
    Action, ActionStatus, ApprovalIntent, ApprovalIntentResult, ApprovalReplyEvent, Payload,
};
use tessera_storage::{ActionStore, CorrelationRepository, TransitionOutcome};

use crate::classifier::ClassifierFactory;
use crate::dispatcher::{ApprovalDispatch, Dispatcher};
use crate::error::ActionError;
use crate::notify::{
    approval_token, messages, parse_approval_token, send_best_effort, NotificationSender,
};

/// What a reply did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// No action could be resolved from the reply.
    Unresolved,
    /// The action is no longer awaiting approval.
    Ignored { current: ActionStatus },
    ClassifierUnavailable { code: &'static str },
    ClassificationFailed,
    Approved(ApprovalDispatch),
    /// Approved, but nothing can run the action's type; it stays awaiting approval.
    Unhandled,
    Rejected,
    ClarificationRequested,
    /// A concurrent reply or sweep moved the action first.
    Superseded { current: ActionStatus },
}

impl ReplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReplyOutcome::Unresolved => "unresolved",
            ReplyOutcome::Ignored { .. } => "ignored",
            ReplyOutcome::ClassifierUnavailable { .. } => "classifier_unavailable",
            ReplyOutcome::ClassificationFailed => "classification_failed",
            ReplyOutcome::Approved(_) => "approved",
            ReplyOutcome::Unhandled => "unhandled",
            ReplyOutcome::Rejected => "rejected",
            ReplyOutcome::ClarificationRequested => "clarification_requested",
            ReplyOutcome::Superseded { .. } => "superseded",
        }
    }
}

pub struct ApprovalReplyProcessor {
    store: Arc<ActionStore>,
    correlations: Arc<CorrelationRepository>,
    dispatcher: Arc<Dispatcher>,
    notifier: Arc<dyn NotificationSender>,
    classifiers: Arc<dyn ClassifierFactory>,
}

impl ApprovalReplyProcessor {
    pub fn new(
        store: Arc<ActionStore>,
        correlations: Arc<CorrelationRepository>,
        dispatcher: Arc<Dispatcher>,
        notifier: Arc<dyn NotificationSender>,
        classifiers: Arc<dyn ClassifierFactory>,
    ) -> Self {
        Self {
            store,
            correlations,
            dispatcher,
            notifier,
            classifiers,
        }
    }

    pub async fn process(&self, event: &ApprovalReplyEvent) -> Result<ReplyOutcome, ActionError> {
        let Some(action_id) = self.resolve_action_id(event)? else {
            info!(user_id = %event.user_id, "Approval reply matched no action");
            return Ok(ReplyOutcome::Unresolved);
        };
        let Some(action) = self.store.get(action_id)? else {
            info!(action_id = %action_id, "Approval reply for deleted action");
            return Ok(ReplyOutcome::Unresolved);
        };
        if !action.is_owned_by(&event.user_id) {
            return Err(ActionError::Forbidden(action.id));
        }
        if action.status != ActionStatus::AwaitingApproval {
            if action.status.is_terminal() {
                info!(action_id = %action.id, status = %action.status, "Approval reply for settled action ignored");
            } else {
                info!(action_id = %action.id, status = %action.status, "Approval reply ignored");
            }
            return Ok(ReplyOutcome::Ignored {
                current: action.status,
            });
        }

        let classifier = match self.classifiers.build(&event.user_id).await {
            Ok(classifier) => classifier,
            Err(e) => {
                warn!(action_id = %action.id, code = e.code(), error = %e, "Classifier unavailable");
                send_best_effort(
                    self.notifier.as_ref(),
                    &event.user_id,
                    &messages::classifier_unavailable(&e),
                    None,
                )
                .await;
                return Ok(ReplyOutcome::ClassifierUnavailable { code: e.code() });
            }
        };

        let result = match classifier.classify(&event.reply_text).await {
            Ok(result) => result,
            Err(e) => {
                warn!(action_id = %action.id, error = %e, "Approval reply classification failed");
                send_best_effort(
                    self.notifier.as_ref(),
                    &event.user_id,
                    &messages::classification_failed(&action),
                    None,
                )
                .await;
                return Ok(ReplyOutcome::ClassificationFailed);
            }
        };
        info!(
            action_id = %action.id,
            intent = %result.intent,
            confidence = result.confidence,
            "Approval reply classified"
        );

        let token = approval_token(action.id);
        match result.intent {
            ApprovalIntent::Approve => self.approve(&action, &result, &token).await,
            ApprovalIntent::Reject => self.reject(action.id, &result, &token).await,
            ApprovalIntent::Unclear => {
                send_best_effort(
                    self.notifier.as_ref(),
                    &action.user_id,
                    &messages::clarification(&action),
                    Some(&token),
                )
                .await;
                Ok(ReplyOutcome::ClarificationRequested)
            }
        }
    }

    /// Explicit id first, then the stored correlation, then the token itself.
    fn resolve_action_id(&self, event: &ApprovalReplyEvent) -> Result<Option<Uuid>, ActionError> {
        if let Some(id) = event.action_id {
            return Ok(Some(id));
        }
        let Some(reference) = event.reply_to_message_id.as_deref() else {
            return Ok(None);
        };
        if let Some(id) = self.correlations.resolve(reference)? {
            return Ok(Some(id));
        }
        Ok(parse_approval_token(reference))
    }

    async fn approve(
        &self,
        action: &Action,
        result: &ApprovalIntentResult,
        token: &str,
    ) -> Result<ReplyOutcome, ActionError> {
        let id = action.id;
        // The type may have changed since the approval request went out.
        if !self.dispatcher.is_registered(action.action_type) {
            info!(action_id = %id, action_type = %action.action_type, "Approval for unregistered type");
            send_best_effort(
                self.notifier.as_ref(),
                &action.user_id,
                &messages::unsupported(action),
                Some(token),
            )
            .await;
            return Ok(ReplyOutcome::Unhandled);
        }

        let mut patch = Payload::new();
        patch.insert("approvedAt".into(), json!(Utc::now().to_rfc3339()));
        patch.insert("approvalSource".into(), json!("approval_reply"));
        patch.insert("approvalConfidence".into(), json!(result.confidence));
        patch.insert("approvalReasoning".into(), json!(result.reasoning));

        match self.store.update_status_if_with(
            id,
            ActionStatus::AwaitingApproval,
            ActionStatus::Processing,
            Some(&patch),
        )? {
            TransitionOutcome::Updated(approved) => {
                // Confirm before the agent runs so the user hears back first.
                send_best_effort(
                    self.notifier.as_ref(),
                    &approved.user_id,
                    &messages::approved(&approved),
                    Some(token),
                )
                .await;
                let dispatch = self.dispatcher.route_approved(approved).await?;
                info!(action_id = %id, dispatch = dispatch.label(), "Action approved");
                Ok(ReplyOutcome::Approved(dispatch))
            }
            TransitionOutcome::StatusMismatch { current } => {
                info!(action_id = %id, status = %current, "Approval lost to a concurrent update");
                Ok(ReplyOutcome::Superseded { current })
            }
            TransitionOutcome::NotFound => Ok(ReplyOutcome::Unresolved),
        }
    }

    async fn reject(
        &self,
        id: Uuid,
        result: &ApprovalIntentResult,
        token: &str,
    ) -> Result<ReplyOutcome, ActionError> {
        let mut patch = Payload::new();
        patch.insert("rejectedAt".into(), json!(Utc::now().to_rfc3339()));
        patch.insert("rejectionSource".into(), json!("approval_reply"));
        patch.insert("rejectionReason".into(), json!(result.reasoning));

        match self.store.update_status_if_with(
            id,
            ActionStatus::AwaitingApproval,
            ActionStatus::Rejected,
            Some(&patch),
        )? {
            TransitionOutcome::Updated(rejected) => {
                send_best_effort(
                    self.notifier.as_ref(),
                    &rejected.user_id,
                    &messages::rejected(&rejected),
                    Some(token),
                )
                .await;
                info!(action_id = %id, "Action rejected");
                Ok(ReplyOutcome::Rejected)
            }
            TransitionOutcome::StatusMismatch { current } => {
                info!(action_id = %id, status = %current, "Rejection lost to a concurrent update");
                Ok(ReplyOutcome::Superseded { current })
            }
            TransitionOutcome::NotFound => Ok(ReplyOutcome::Unresolved),
        }
    }
}
