//! Tessera application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Open the SQLite store and the internal token
//! 3. Build the handler registry from the configured execution agents
//! 4. Wire notification, event and classifier collaborators
//! 5. Start the axum API server

mod cli;
mod http;
mod llm;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use tessera_action::{
    ActionRegistry, AgentHandler, ClassifierFactory, Collaborators, EventPublisher,
    KeywordClassifierFactory, NotificationSender, Orchestrator,
};
use tessera_api::auth::load_or_generate_token;
use tessera_api::{start_server, AppState};
use tessera_core::config::TesseraConfig;
use tessera_storage::Database;

use crate::cli::{expand_home, CliArgs};
use crate::http::{HttpExecutionAgent, LogNotifier, LogPublisher, WebhookNotifier, WebhookPublisher};
use crate::llm::LlmClassifierFactory;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// One agent-backed handler per configured action type.
fn build_registry(config: &TesseraConfig) -> Result<ActionRegistry, Box<dyn std::error::Error>> {
    let timeout = Duration::from_secs(config.dispatch.execution_timeout_secs);
    let mut registry = ActionRegistry::new();
    for (action_type, agent_config) in config.agent_configs()? {
        let agent = HttpExecutionAgent::new(&agent_config.base_url, timeout)?;
        registry.register(Arc::new(AgentHandler::new(
            action_type,
            agent_config.route,
            Arc::new(agent),
        )));
        tracing::info!(
            action_type = %action_type,
            base_url = %agent_config.base_url,
            route = ?agent_config.route,
            "Execution agent registered"
        );
    }
    if registry.is_empty() {
        tracing::warn!("No execution agents configured; every action will stay pending");
    }
    Ok(registry)
}

fn build_collaborators(config: &TesseraConfig) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;

    let notifier: Arc<dyn NotificationSender> = match &config.notifications.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Notifications via webhook");
            Arc::new(WebhookNotifier::new(client.clone(), url.clone()))
        }
        None => {
            tracing::info!("No notification webhook configured; notifications are logged");
            Arc::new(LogNotifier)
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.events.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Creation events via webhook");
            Arc::new(WebhookPublisher::new(client, url.clone()))
        }
        None => {
            tracing::info!("No event webhook configured; creation events are logged");
            Arc::new(LogPublisher)
        }
    };

    let classifiers: Arc<dyn ClassifierFactory> = match &config.classifier.endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Approval replies classified by LLM");
            Arc::new(LlmClassifierFactory::new(endpoint, config.classifier.clone())?)
        }
        None => {
            tracing::info!("No classifier endpoint configured; using keyword matching");
            Arc::new(KeywordClassifierFactory)
        }
    };

    Ok(Collaborators {
        notifier,
        publisher,
        classifiers,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so its log level can apply; problems are
    // reported once the subscriber is up.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(TesseraConfig::load(&config_file))
    } else {
        None
    };
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => TesseraConfig::default(),
    };
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.general.port = args.resolve_port(config.general.port);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Tessera v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(Err(e)) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Invalid configuration, using defaults"
        ),
        None => tracing::info!(path = %config_file.display(), "No configuration file, using defaults"),
    }
    config.validate()?;

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("tessera.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let internal_token = load_or_generate_token(&data_dir.join("internal_token"));

    // Engine.
    let registry = build_registry(&config)?;
    let collaborators = build_collaborators(&config)?;
    let orchestrator = Orchestrator::new(db, registry, collaborators, &config);

    let state = AppState::new(orchestrator, config.clone(), internal_token);
    if let Err(e) = start_server(&config, state).await {
        tracing::error!(port = config.general.port, error = %e, "API server stopped");
        tracing::error!("Is another instance running? Try: tessera --port {}", config.general.port.saturating_add(1));
        return Err(e.into());
    }

    Ok(())
}
