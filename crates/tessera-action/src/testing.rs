//! Recording fakes for the collaborator traits and a harness wiring them to
//! an in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use tessera_core::events::ActionCreatedEvent;
use tessera_core::types::{
    Action, ActionStatus, ActionType, ApprovalIntent, ApprovalIntentResult, ApprovalRoute,
    NewAction, Payload,
};
use tessera_storage::{ActionStore, CorrelationRepository, Database, PreviewRepository};

use crate::agent::{AgentOutcome, ExecutionAgent};
use crate::approval::ApprovalReplyProcessor;
use crate::classifier::{ClassifierFactory, IntentClassifier, KeywordClassifierFactory};
use crate::dispatcher::{DispatchPolicy, Dispatcher};
use crate::error::{AgentError, ClassifierBuildError, ClassifierError, NotifyError, PublishError};
use crate::handler::{ActionRegistry, AgentHandler};
use crate::notify::NotificationSender;
use crate::publish::EventPublisher;

pub fn sample_action(action_type: ActionType, confidence: f32) -> Action {
    Action {
        id: Uuid::new_v4(),
        user_id: "user-1".into(),
        command_id: "cmd-1".into(),
        action_type,
        confidence,
        title: format!("{} action", action_type),
        status: ActionStatus::Pending,
        payload: Payload::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

// =============================================================================
// Execution agent
// =============================================================================

/// Agent that pops scripted results, falling back to a completed outcome.
pub struct FakeAgent {
    scripted: Mutex<VecDeque<Result<AgentOutcome, AgentError>>>,
    delay: Mutex<Option<Duration>>,
    process_calls: Mutex<Vec<Uuid>>,
    update_calls: Mutex<Vec<(Uuid, String)>>,
}

impl FakeAgent {
    pub fn completing() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            process_calls: Mutex::new(Vec::new()),
            update_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, result: Result<AgentOutcome, AgentError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn process_calls(&self) -> Vec<Uuid> {
        self.process_calls.lock().unwrap().clone()
    }

    pub fn update_calls(&self) -> Vec<(Uuid, String)> {
        self.update_calls.lock().unwrap().clone()
    }

    async fn next(&self, default_url: String) -> Result<AgentOutcome, AgentError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.scripted.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(AgentOutcome::completed(default_url)))
    }
}

#[async_trait]
impl ExecutionAgent for FakeAgent {
    async fn process_action(&self, action: &Action) -> Result<AgentOutcome, AgentError> {
        self.process_calls.lock().unwrap().push(action.id);
        self.next(format!("https://agent.test/{}", action.id)).await
    }

    async fn update_existing(
        &self,
        action: &Action,
        existing_resource_id: &str,
    ) -> Result<AgentOutcome, AgentError> {
        self.update_calls
            .lock()
            .unwrap()
            .push((action.id, existing_resource_id.to_string()));
        self.next(format!("https://agent.test/{}?v=2", existing_resource_id))
            .await
    }
}

// =============================================================================
// Notifications and events
// =============================================================================

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub user_id: String,
    pub message: String,
    pub correlation_id: Option<String>,
}

pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.message).collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(
        &self,
        user_id: &str,
        message: &str,
        correlation_id: Option<&str>,
    ) -> Result<Option<String>, NotifyError> {
        if self.failing {
            return Err(NotifyError::Delivery("transport down".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentNotification {
            user_id: user_id.to_string(),
            message: message.to_string(),
            correlation_id: correlation_id.map(str::to_string),
        });
        Ok(Some(format!("msg-{}", sent.len())))
    }
}

pub struct RecordingPublisher {
    events: Mutex<Vec<ActionCreatedEvent>>,
    failing: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn events(&self) -> Vec<ActionCreatedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &ActionCreatedEvent) -> Result<(), PublishError> {
        if *self.failing.lock().unwrap() {
            return Err(PublishError::Delivery("bus down".into()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Classifiers
// =============================================================================

/// Classifier answering with a fixed intent after an optional delay.
pub struct FixedClassifier {
    result: Result<ApprovalIntentResult, String>,
    delay: Option<Duration>,
}

#[async_trait]
impl IntentClassifier for FixedClassifier {
    async fn classify(&self, _reply_text: &str) -> Result<ApprovalIntentResult, ClassifierError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone().map_err(ClassifierError::Request)
    }
}

/// Factory returning fixed classifiers, or a fixed build error.
pub struct FixedClassifierFactory {
    outcome: Result<(Result<ApprovalIntentResult, String>, Option<Duration>), ClassifierBuildError>,
}

impl FixedClassifierFactory {
    pub fn intent(intent: ApprovalIntent) -> Self {
        Self {
            outcome: Ok((
                Ok(ApprovalIntentResult {
                    intent,
                    confidence: 0.9,
                    reasoning: format!("fixed {}", intent),
                }),
                None,
            )),
        }
    }

    pub fn slow(intent: ApprovalIntent, delay: Duration) -> Self {
        let mut factory = Self::intent(intent);
        if let Ok((_, d)) = &mut factory.outcome {
            *d = Some(delay);
        }
        factory
    }

    pub fn classify_error() -> Self {
        Self {
            outcome: Ok((Err("upstream 500".into()), None)),
        }
    }

    pub fn build_error(err: ClassifierBuildError) -> Self {
        Self { outcome: Err(err) }
    }
}

#[async_trait]
impl ClassifierFactory for FixedClassifierFactory {
    async fn build(&self, _user_id: &str) -> Result<Box<dyn IntentClassifier>, ClassifierBuildError> {
        let (result, delay) = self.outcome.clone()?;
        Ok(Box::new(FixedClassifier { result, delay }))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// In-memory store plus recording collaborators.
///
/// Research is registered with the publish route; link, todo and calendar
/// execute directly; note, issue and reminder have no handler.
pub struct Harness {
    pub db: Arc<Database>,
    pub store: Arc<ActionStore>,
    pub correlations: Arc<CorrelationRepository>,
    pub previews: Arc<PreviewRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub publisher: Arc<RecordingPublisher>,
    pub agent: Arc<FakeAgent>,
    pub registry: Arc<ActionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(DispatchPolicy::default(), RecordingNotifier::new())
    }

    pub fn with_policy(policy: DispatchPolicy) -> Self {
        Self::build(policy, RecordingNotifier::new())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::build(DispatchPolicy::default(), notifier)
    }

    fn build(policy: DispatchPolicy, notifier: RecordingNotifier) -> Self {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = Arc::new(ActionStore::new(db.clone()));
        let correlations = Arc::new(CorrelationRepository::new(db.clone()));
        let previews = Arc::new(PreviewRepository::new(db.clone()));
        let notifier = Arc::new(notifier);
        let publisher = Arc::new(RecordingPublisher::new());
        let agent = Arc::new(FakeAgent::completing());

        let mut registry = ActionRegistry::new();
        for (action_type, route) in [
            (ActionType::Research, ApprovalRoute::Publish),
            (ActionType::Link, ApprovalRoute::Direct),
            (ActionType::Todo, ApprovalRoute::Direct),
            (ActionType::Calendar, ApprovalRoute::Direct),
        ] {
            registry.register(Arc::new(AgentHandler::new(action_type, route, agent.clone())));
        }
        let registry = Arc::new(registry);

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            store.clone(),
            correlations.clone(),
            notifier.clone(),
            publisher.clone(),
            policy,
        ));

        Self {
            db,
            store,
            correlations,
            previews,
            notifier,
            publisher,
            agent,
            registry,
            dispatcher,
        }
    }

    pub fn create(&self, action_type: ActionType, confidence: f32) -> Action {
        self.create_for("user-1", action_type, confidence)
    }

    pub fn create_for(&self, user_id: &str, action_type: ActionType, confidence: f32) -> Action {
        self.store
            .create(NewAction {
                user_id: user_id.into(),
                command_id: "cmd-1".into(),
                action_type,
                confidence,
                title: format!("{} action", action_type),
                payload: Payload::new(),
            })
            .unwrap()
    }

    /// Create an action and move it to `awaiting_approval` through the dispatcher.
    pub async fn awaiting(&self, action_type: ActionType, confidence: f32) -> Action {
        let action = self.create(action_type, confidence);
        self.dispatcher.handle(action.clone()).await.unwrap();
        let action = self.reload(action.id);
        assert_eq!(action.status, ActionStatus::AwaitingApproval);
        action
    }

    pub fn reload(&self, id: Uuid) -> Action {
        self.store.get(id).unwrap().unwrap()
    }

    pub fn approvals(&self, classifiers: Arc<dyn ClassifierFactory>) -> ApprovalReplyProcessor {
        ApprovalReplyProcessor::new(
            self.store.clone(),
            self.correlations.clone(),
            self.dispatcher.clone(),
            self.notifier.clone(),
            classifiers,
        )
    }

    pub fn keyword_approvals(&self) -> ApprovalReplyProcessor {
        self.approvals(Arc::new(KeywordClassifierFactory))
    }
}
