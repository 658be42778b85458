//! HTTP-backed collaborators: execution agents, notification webhook and
//! creation-event webhook, plus log-only stand-ins for unconfigured sinks.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tessera_action::error::{AgentError, NotifyError, PublishError};
use tessera_action::{AgentOutcome, EventPublisher, ExecutionAgent, NotificationSender};
use tessera_core::events::ActionCreatedEvent;
use tessera_core::types::Action;

/// Execution agent reached over HTTP.
///
/// `POST {base}/actions` performs an action; `POST {base}/actions/update`
/// overwrites a resource that already existed. Both answer with an
/// [`AgentOutcome`] body.
pub struct HttpExecutionAgent {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    action: &'a Action,
    existing_resource_id: &'a str,
}

impl HttpExecutionAgent {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<AgentOutcome, AgentError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(agent_status_error(status.as_u16(), message));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        decode_outcome(&body)
    }
}

/// Decode a 2xx agent body. An unreadable body is retried rather than
/// recorded as a permanent failure.
fn decode_outcome(body: &str) -> Result<AgentOutcome, AgentError> {
    serde_json::from_str(body).map_err(|e| AgentError::InvalidResponse(e.to_string()))
}

/// Map a non-success agent status. 422 means the agent refused the action
/// itself; every other status is reported as-is.
fn agent_status_error(status: u16, message: String) -> AgentError {
    match status {
        422 => AgentError::Rejected(message),
        _ => AgentError::Server { status, message },
    }
}

#[async_trait]
impl ExecutionAgent for HttpExecutionAgent {
    async fn process_action(&self, action: &Action) -> Result<AgentOutcome, AgentError> {
        tracing::debug!(action_id = %action.id, base_url = %self.base_url, "Calling execution agent");
        self.post("/actions", action).await
    }

    async fn update_existing(
        &self,
        action: &Action,
        existing_resource_id: &str,
    ) -> Result<AgentOutcome, AgentError> {
        let body = UpdateRequest {
            action,
            existing_resource_id,
        };
        self.post("/actions/update", &body).await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRequest<'a> {
    user_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationResponse {
    #[serde(default)]
    message_id: Option<String>,
}

/// Posts notifications to the messaging transport's webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(
        &self,
        user_id: &str,
        message: &str,
        correlation_id: Option<&str>,
    ) -> Result<Option<String>, NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&NotificationRequest {
                user_id,
                message,
                correlation_id,
            })
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Delivery(format!("webhook returned {}", status)));
        }

        // A transport without message ids answers with an empty body.
        let body = response.text().await.unwrap_or_default();
        Ok(serde_json::from_str::<NotificationResponse>(&body)
            .ok()
            .and_then(|r| r.message_id))
    }
}

/// Writes notifications to the log when no transport is configured.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(
        &self,
        user_id: &str,
        message: &str,
        correlation_id: Option<&str>,
    ) -> Result<Option<String>, NotifyError> {
        tracing::info!(
            user_id = %user_id,
            correlation_id = correlation_id.unwrap_or("-"),
            "Notification: {}",
            message
        );
        Ok(None)
    }
}

/// Posts creation events to the event bus webhook.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
}

impl WebhookPublisher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, event: &ActionCreatedEvent) -> Result<(), PublishError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| PublishError::Delivery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PublishError::Delivery(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs creation events when no event bus is configured.
#[derive(Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &ActionCreatedEvent) -> Result<(), PublishError> {
        tracing::info!(
            action_id = %event.action_id,
            action_type = %event.action_type,
            "Creation event (no event bus configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_mapping() {
        let err = agent_status_error(503, "busy".into());
        assert!(err.is_transient());
        assert_eq!(err.code(), "AGENT_SERVER_ERROR");

        let err = agent_status_error(422, "bad payload".into());
        assert!(!err.is_transient());
        assert_eq!(err, AgentError::Rejected("bad payload".into()));

        let err = agent_status_error(404, String::new());
        assert!(!err.is_transient());
        assert_eq!(err.code(), "AGENT_CLIENT_ERROR");
    }

    #[test]
    fn test_unreadable_success_body_is_transient() {
        let err = decode_outcome("<html>gateway</html>").unwrap_err();
        assert!(matches!(err, AgentError::InvalidResponse(_)));
        assert!(err.is_transient());
        assert_eq!(err.code(), "AGENT_INVALID_RESPONSE");

        let outcome = decode_outcome(r#"{"status":"completed","resourceUrl":"https://todo/1"}"#).unwrap();
        assert_eq!(outcome.resource_url.as_deref(), Some("https://todo/1"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let agent = HttpExecutionAgent::new("http://agent.local/", Duration::from_secs(5)).unwrap();
        assert_eq!(agent.base_url, "http://agent.local");
    }

    #[test]
    fn test_notification_body_shape() {
        let body = serde_json::to_value(NotificationRequest {
            user_id: "u1",
            message: "hi",
            correlation_id: None,
        })
        .unwrap();
        assert_eq!(body["userId"], "u1");
        assert!(body.get("correlationId").is_none());
    }

    #[tokio::test]
    async fn test_log_sinks_always_succeed() {
        assert_eq!(LogNotifier.send("u1", "hello", Some("tok")).await.unwrap(), None);
    }
}
