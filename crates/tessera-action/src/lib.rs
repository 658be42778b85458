//! Action orchestration engine for Tessera.
//!
//! Dispatches new actions to their handlers, turns approval replies into
//! atomic status transitions, recovers stuck actions and resolves duplicate
//! conflicts reported by execution agents.

pub mod agent;
pub mod approval;
pub mod classifier;
pub mod dispatcher;
pub mod duplicate;
pub mod error;
pub mod handler;
pub mod notify;
pub mod orchestrator;
pub mod preview;
pub mod publish;
pub mod service;
pub mod sweeper;

#[cfg(test)]
mod testing;

pub use agent::{AgentOutcome, AgentStatus, ExecutionAgent};
pub use approval::{ApprovalReplyProcessor, ReplyOutcome};
pub use classifier::{ClassifierFactory, IntentClassifier, KeywordClassifier, KeywordClassifierFactory};
pub use dispatcher::{ApprovalDispatch, DispatchPolicy, Dispatcher, ExecutionOutcome, HandleOutcome};
pub use duplicate::{DuplicateChoice, DuplicateResolver, ResolutionOutcome};
pub use error::{
    ActionError, AgentError, ClassifierBuildError, ClassifierError, NotifyError, PublishError,
};
pub use handler::{ActionHandler, ActionRegistry, AgentHandler};
pub use notify::NotificationSender;
pub use orchestrator::{Collaborators, Orchestrator};
pub use preview::PreviewAccessor;
pub use publish::EventPublisher;
pub use service::{ActionService, StatusChange};
pub use sweeper::{RetrySweeper, SweepPolicy, SweepReport};
