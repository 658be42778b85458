//! Orchestration engine.
//!
//! Wires the store, the handler registry and the collaborators into the
//! components the API serves. Built once at startup.

use std::sync::Arc;

use tessera_core::config::TesseraConfig;
use tessera_storage::{ActionStore, CorrelationRepository, Database, PreviewRepository};

use crate::approval::ApprovalReplyProcessor;
use crate::classifier::ClassifierFactory;
use crate::dispatcher::{DispatchPolicy, Dispatcher};
use crate::duplicate::DuplicateResolver;
use crate::handler::ActionRegistry;
use crate::notify::NotificationSender;
use crate::preview::PreviewAccessor;
use crate::publish::EventPublisher;
use crate::service::ActionService;
use crate::sweeper::{RetrySweeper, SweepPolicy};

/// External services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn NotificationSender>,
    pub publisher: Arc<dyn EventPublisher>,
    pub classifiers: Arc<dyn ClassifierFactory>,
}

pub struct Orchestrator {
    db: Arc<Database>,
    store: Arc<ActionStore>,
    dispatcher: Arc<Dispatcher>,
    service: ActionService,
    approvals: ApprovalReplyProcessor,
    sweeper: RetrySweeper,
    duplicates: DuplicateResolver,
    previews: PreviewAccessor,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Database>,
        registry: ActionRegistry,
        collaborators: Collaborators,
        config: &TesseraConfig,
    ) -> Self {
        let store = Arc::new(ActionStore::new(db.clone()));
        let correlations = Arc::new(CorrelationRepository::new(db.clone()));
        let preview_repo = Arc::new(PreviewRepository::new(db.clone()));

        tracing::info!(
            handlers = registry.len(),
            types = ?registry.registered_types(),
            "Action registry built"
        );

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            store.clone(),
            correlations.clone(),
            collaborators.notifier.clone(),
            collaborators.publisher.clone(),
            DispatchPolicy::from_config(&config.dispatch),
        ));

        Self {
            service: ActionService::new(
                store.clone(),
                dispatcher.clone(),
                collaborators.publisher.clone(),
            ),
            approvals: ApprovalReplyProcessor::new(
                store.clone(),
                correlations,
                dispatcher.clone(),
                collaborators.notifier.clone(),
                collaborators.classifiers.clone(),
            ),
            sweeper: RetrySweeper::new(
                store.clone(),
                dispatcher.clone(),
                SweepPolicy::from_config(&config.sweep),
            ),
            duplicates: DuplicateResolver::new(
                store.clone(),
                dispatcher.clone(),
                collaborators.notifier,
            ),
            previews: PreviewAccessor::new(store.clone(), preview_repo),
            db,
            store,
            dispatcher,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn store(&self) -> &Arc<ActionStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn actions(&self) -> &ActionService {
        &self.service
    }

    pub fn approvals(&self) -> &ApprovalReplyProcessor {
        &self.approvals
    }

    pub fn sweeper(&self) -> &RetrySweeper {
        &self.sweeper
    }

    pub fn duplicates(&self) -> &DuplicateResolver {
        &self.duplicates
    }

    pub fn previews(&self) -> &PreviewAccessor {
        &self.previews
    }
}
