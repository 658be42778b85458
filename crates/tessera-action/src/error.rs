//! Error types for the orchestration engine and its collaborators.

use tessera_core::error::TesseraError;
use tessera_core::types::{ActionStatus, ActionType};
use uuid::Uuid;

/// Errors surfaced to callers of the orchestration engine.
///
/// A lost compare-and-set race is not an error; it is reported through the
/// outcome enums instead.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Action not found: {0}")]
    NotFound(Uuid),
    #[error("Action {0} is owned by another user")]
    Forbidden(Uuid),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidTransition(ActionStatus, ActionStatus),
    #[error("Action type not registered: {0}")]
    UnregisteredHandler(ActionType),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<TesseraError> for ActionError {
    fn from(err: TesseraError) -> Self {
        match err {
            TesseraError::Validation(msg) => ActionError::Validation(msg),
            TesseraError::NotFound(id) => ActionError::NotFound(id),
            TesseraError::Forbidden(id) => ActionError::Forbidden(id),
            TesseraError::InvalidOperation(msg) => ActionError::InvalidOperation(msg),
            TesseraError::InvalidTransition(from, to) => ActionError::InvalidTransition(from, to),
            other => ActionError::Storage(other.to_string()),
        }
    }
}

/// Errors from an execution agent call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("Agent unreachable: {0}")]
    Transport(String),
    #[error("Agent returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("Agent rejected the action: {0}")]
    Rejected(String),
    /// The agent answered with success but an unreadable body; the work may
    /// or may not have happened.
    #[error("Agent response unreadable: {0}")]
    InvalidResponse(String),
    #[error("Agent does not support {0}")]
    Unsupported(String),
}

impl AgentError {
    /// Transport failures, unreadable replies, throttling and 5xx responses
    /// may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Transport(_) | AgentError::InvalidResponse(_) => true,
            AgentError::Server { status, .. } => *status >= 500 || *status == 429,
            AgentError::Rejected(_) | AgentError::Unsupported(_) => false,
        }
    }

    /// Error code recorded on the action payload.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Transport(_) => "AGENT_UNREACHABLE",
            AgentError::Server { status, .. } if *status >= 500 => "AGENT_SERVER_ERROR",
            AgentError::Server { status: 429, .. } => "AGENT_THROTTLED",
            AgentError::Server { .. } => "AGENT_CLIENT_ERROR",
            AgentError::Rejected(_) => "AGENT_REJECTED",
            AgentError::InvalidResponse(_) => "AGENT_INVALID_RESPONSE",
            AgentError::Unsupported(_) => "UNSUPPORTED_OPERATION",
        }
    }
}

/// Errors from classifying a reply with an already-built classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Request(String),
    #[error("Classifier returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Errors from building a per-user classifier.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierBuildError {
    #[error("No API key configured")]
    NoApiKey,
    #[error("Model not allowed: {0}")]
    InvalidModel(String),
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),
}

impl ClassifierBuildError {
    pub fn code(&self) -> &'static str {
        match self {
            ClassifierBuildError::NoApiKey => "NO_API_KEY",
            ClassifierBuildError::InvalidModel(_) => "INVALID_MODEL",
            ClassifierBuildError::Unavailable(_) => "CLASSIFIER_UNAVAILABLE",
        }
    }

    /// Explanation sent back to the user who replied.
    pub fn user_message(&self) -> String {
        match self {
            ClassifierBuildError::NoApiKey => {
                "I couldn't read your reply because no LLM API key is configured for your account. \
                 Add one in settings, or approve the action from the app."
                    .to_string()
            }
            ClassifierBuildError::InvalidModel(model) => format!(
                "I couldn't read your reply because the model \"{}\" is not available. \
                 Pick a supported model in settings, or approve the action from the app.",
                model
            ),
            ClassifierBuildError::Unavailable(_) => {
                "I couldn't read your reply right now. Please try again shortly, \
                 or approve the action from the app."
                    .to_string()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event publish failed: {0}")]
    Delivery(String),
}
