//! LLM approval-reply classifier over an OpenAI-compatible chat completions
//! endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tessera_action::error::{ClassifierBuildError, ClassifierError};
use tessera_action::{ClassifierFactory, IntentClassifier};
use tessera_core::config::ClassifierConfig;
use tessera_core::types::{ApprovalIntent, ApprovalIntentResult};

const SYSTEM_PROMPT: &str = "You classify a user's reply to a request for approval of a pending action. \
Answer with a JSON object {\"intent\": \"approve\" | \"reject\" | \"unclear\", \
\"confidence\": number between 0 and 1, \"reasoning\": short string}. \
Use \"unclear\" when the reply neither clearly approves nor clearly rejects.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds one [`LlmClassifier`] per user from that user's credentials.
pub struct LlmClassifierFactory {
    client: reqwest::Client,
    endpoint: String,
    config: ClassifierConfig,
}

impl LlmClassifierFactory {
    pub fn new(endpoint: &str, config: ClassifierConfig) -> Result<Self, ClassifierBuildError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClassifierBuildError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            config,
        })
    }

    /// Pick the credentials and model for a user.
    fn resolve(&self, user_id: &str) -> Result<(String, String), ClassifierBuildError> {
        let user = self.config.users.get(user_id);
        let api_key = user
            .and_then(|u| u.api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .ok_or(ClassifierBuildError::NoApiKey)?;
        let model = user
            .and_then(|u| u.model.clone())
            .unwrap_or_else(|| self.config.default_model.clone());
        if !self.config.allowed_models.is_empty() && !self.config.allowed_models.contains(&model) {
            return Err(ClassifierBuildError::InvalidModel(model));
        }
        Ok((api_key, model))
    }
}

#[async_trait]
impl ClassifierFactory for LlmClassifierFactory {
    async fn build(&self, user_id: &str) -> Result<Box<dyn IntentClassifier>, ClassifierBuildError> {
        let (api_key, model) = self.resolve(user_id)?;
        Ok(Box::new(LlmClassifier {
            client: self.client.clone(),
            url: format!("{}/chat/completions", self.endpoint),
            api_key,
            model,
        }))
    }
}

pub struct LlmClassifier {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

#[derive(Deserialize)]
struct RawIntent {
    intent: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, reply_text: &str) -> Result<ApprovalIntentResult, ClassifierError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": reply_text }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Request(format!("{}: {}", status, text)));
        }

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
        let content = api
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassifierError::InvalidResponse("no choices".to_string()))?;

        tracing::debug!(model = %self.model, "Reply classified");
        Ok(parse_intent(&content))
    }
}

/// Interpret the model's answer. Anything unusable is `unclear`, so the user
/// is asked again rather than having the action decided for them.
fn parse_intent(content: &str) -> ApprovalIntentResult {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let raw: RawIntent = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(e) => return ApprovalIntentResult::unclear(format!("unparseable classifier output: {}", e)),
    };
    let intent = match raw.intent.trim().to_ascii_lowercase().as_str() {
        "approve" => ApprovalIntent::Approve,
        "reject" => ApprovalIntent::Reject,
        "unclear" => ApprovalIntent::Unclear,
        other => return ApprovalIntentResult::unclear(format!("unknown intent \"{}\"", other)),
    };
    ApprovalIntentResult {
        intent,
        confidence: raw.confidence.clamp(0.0, 1.0),
        reasoning: raw.reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::config::UserClassifierConfig;

    fn factory(allowed: &[&str]) -> LlmClassifierFactory {
        let mut config = ClassifierConfig {
            allowed_models: allowed.iter().map(|m| m.to_string()).collect(),
            ..ClassifierConfig::default()
        };
        config.users.insert(
            "alice".into(),
            UserClassifierConfig {
                api_key: Some("sk-alice".into()),
                model: None,
            },
        );
        config.users.insert(
            "bob".into(),
            UserClassifierConfig {
                api_key: Some("sk-bob".into()),
                model: Some("legacy-model".into()),
            },
        );
        config.users.insert(
            "carol".into(),
            UserClassifierConfig {
                api_key: Some("  ".into()),
                model: None,
            },
        );
        LlmClassifierFactory::new("https://llm.local/v1/", config).unwrap()
    }

    #[test]
    fn test_resolve_credentials() {
        let f = factory(&[]);
        assert_eq!(
            f.resolve("alice").unwrap(),
            ("sk-alice".to_string(), "gpt-4o-mini".to_string())
        );
        assert_eq!(f.resolve("bob").unwrap().1, "legacy-model");
        assert_eq!(f.resolve("dave"), Err(ClassifierBuildError::NoApiKey));
        assert_eq!(f.resolve("carol"), Err(ClassifierBuildError::NoApiKey));
    }

    #[test]
    fn test_resolve_rejects_disallowed_model() {
        let f = factory(&["gpt-4o-mini"]);
        assert!(f.resolve("alice").is_ok());
        assert_eq!(
            f.resolve("bob"),
            Err(ClassifierBuildError::InvalidModel("legacy-model".into()))
        );
    }

    #[tokio::test]
    async fn test_build_reports_missing_key() {
        let f = factory(&[]);
        assert!(f.build("alice").await.is_ok());
        assert!(matches!(
            f.build("nobody").await,
            Err(ClassifierBuildError::NoApiKey)
        ));
    }

    #[test]
    fn test_parse_intent() {
        let result = parse_intent(r#"{"intent":"approve","confidence":0.93,"reasoning":"said yes"}"#);
        assert_eq!(result.intent, ApprovalIntent::Approve);
        assert_eq!(result.confidence, 0.93);
        assert_eq!(result.reasoning, "said yes");

        let fenced = parse_intent("```json\n{\"intent\":\"Reject\",\"confidence\":2}\n```");
        assert_eq!(fenced.intent, ApprovalIntent::Reject);
        assert_eq!(fenced.confidence, 1.0);
    }

    #[test]
    fn test_parse_intent_falls_back_to_unclear() {
        assert_eq!(parse_intent("sure thing").intent, ApprovalIntent::Unclear);
        assert_eq!(
            parse_intent(r#"{"intent":"maybe"}"#).intent,
            ApprovalIntent::Unclear
        );
        assert_eq!(parse_intent("").confidence, 0.0);
    }
}
