//! User notifications.
//!
//! Every notification is best-effort: a failed send is logged and the
//! caller carries on. Approval requests carry a correlation token so a reply
//! can be routed back to its action.

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::error::NotifyError;

const APPROVAL_TOKEN_PREFIX: &str = "action-approval:";

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver a message. Returns the transport's message id when it has one.
    async fn send(
        &self,
        user_id: &str,
        message: &str,
        correlation_id: Option<&str>,
    ) -> Result<Option<String>, NotifyError>;
}

/// Send a notification, logging instead of propagating failures.
pub async fn send_best_effort(
    sender: &dyn NotificationSender,
    user_id: &str,
    message: &str,
    correlation_id: Option<&str>,
) -> Option<String> {
    match sender.send(user_id, message, correlation_id).await {
        Ok(message_id) => message_id,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Notification not delivered");
            None
        }
    }
}

/// Correlation token embedded in approval requests for an action.
pub fn approval_token(action_id: Uuid) -> String {
    format!("{}{}", APPROVAL_TOKEN_PREFIX, action_id)
}

/// Extract the action id from a correlation token.
pub fn parse_approval_token(token: &str) -> Option<Uuid> {
    token
        .trim()
        .strip_prefix(APPROVAL_TOKEN_PREFIX)
        .and_then(|rest| Uuid::parse_str(rest).ok())
}

/// Message templates.
pub mod messages {
    use tessera_core::types::Action;

    use crate::error::ClassifierBuildError;

    pub fn approval_request(action: &Action, description: &str) -> String {
        format!(
            "{} ({:.0}% sure this is what you meant)\n\nReply \"yes\" to go ahead or \"no\" to cancel.",
            description,
            action.confidence * 100.0
        )
    }

    pub fn approved(action: &Action) -> String {
        format!("Approved. Working on \"{}\" now.", action.title)
    }

    pub fn rejected(action: &Action) -> String {
        format!("Cancelled \"{}\". Nothing was done.", action.title)
    }

    pub fn clarification(action: &Action) -> String {
        format!(
            "I couldn't tell whether you want to go ahead with \"{}\". \
             Reply \"yes\" to go ahead or \"no\" to cancel.",
            action.title
        )
    }

    pub fn completed(action: &Action) -> String {
        match action.payload_str("resourceUrl") {
            Some(url) => format!("Done: \"{}\"\n{}", action.title, url),
            None => format!("Done: \"{}\"", action.title),
        }
    }

    pub fn failed(action: &Action, retryable: bool) -> String {
        let reason = action
            .payload_str("message")
            .or_else(|| action.payload_str("errorCode"))
            .unwrap_or("unknown error");
        if retryable {
            format!(
                "\"{}\" didn't go through ({}). I'll try again shortly.",
                action.title, reason
            )
        } else {
            format!("\"{}\" failed: {}", action.title, reason)
        }
    }

    pub fn unsupported(action: &Action) -> String {
        format!(
            "\"{}\" can't be run: no agent handles {} actions.",
            action.title, action.action_type
        )
    }

    pub fn conflict(action: &Action) -> String {
        format!(
            "\"{}\" already exists. Choose whether to skip it or update the existing one.",
            action.title
        )
    }

    pub fn classifier_unavailable(err: &ClassifierBuildError) -> String {
        err.user_message()
    }

    pub fn classification_failed(action: &Action) -> String {
        format!(
            "I couldn't process your reply about \"{}\" right now. Please reply again in a moment.",
            action.title
        )
    }
}
