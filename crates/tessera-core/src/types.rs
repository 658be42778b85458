//! Core types and value objects for action orchestration.
//!
//! Defines actions, their lifecycle statuses, approval replies, classifier
//! results, and previews.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TesseraError;

/// Type-specific action payload (prompt text, URL, event fields, ...).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Maximum number of ids accepted by a batch lookup.
pub const MAX_BATCH_IDS: usize = 50;

// =============================================================================
// Enums
// =============================================================================

/// The closed set of action kinds produced by the upstream classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Research,
    Todo,
    Note,
    Link,
    Calendar,
    Issue,
    Reminder,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::Research,
        ActionType::Todo,
        ActionType::Note,
        ActionType::Link,
        ActionType::Calendar,
        ActionType::Issue,
        ActionType::Reminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Research => "research",
            ActionType::Todo => "todo",
            ActionType::Note => "note",
            ActionType::Link => "link",
            ActionType::Calendar => "calendar",
            ActionType::Issue => "issue",
            ActionType::Reminder => "reminder",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown action type: {}", s))
    }
}

/// Action lifecycle states.
///
/// `Conflict` is the resting state after an execution agent reported that
/// the resource already exists; it waits for an explicit resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    AwaitingApproval,
    Processing,
    Completed,
    Failed,
    Rejected,
    Archived,
    Conflict,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 8] = [
        ActionStatus::Pending,
        ActionStatus::AwaitingApproval,
        ActionStatus::Processing,
        ActionStatus::Completed,
        ActionStatus::Failed,
        ActionStatus::Rejected,
        ActionStatus::Archived,
        ActionStatus::Conflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::AwaitingApproval => "awaiting_approval",
            ActionStatus::Processing => "processing",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Archived => "archived",
            ActionStatus::Conflict => "conflict",
        }
    }

    /// Settled statuses: a reply or sweep never moves these forward again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Rejected | ActionStatus::Archived
        )
    }

    /// Statuses a user may request directly through a status change.
    pub fn is_user_settable(&self) -> bool {
        matches!(
            self,
            ActionStatus::Processing | ActionStatus::Rejected | ActionStatus::Archived
        )
    }

    /// Whether the action type may still be changed in this status.
    pub fn allows_type_change(&self) -> bool {
        matches!(self, ActionStatus::Pending | ActionStatus::AwaitingApproval)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("Unknown action status: {}", s))
    }
}

/// How an approved action reaches its execution agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRoute {
    /// Execute in-process right after the approval transition.
    #[default]
    Direct,
    /// Publish a creation event and let the asynchronous path pick it up.
    Publish,
}

/// Classified intent of an approval reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalIntent {
    Approve,
    Reject,
    Unclear,
}

impl fmt::Display for ApprovalIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalIntent::Approve => write!(f, "approve"),
            ApprovalIntent::Reject => write!(f, "reject"),
            ApprovalIntent::Unclear => write!(f, "unclear"),
        }
    }
}

/// Readiness of an externally generated preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    Pending,
    Ready,
    Failed,
}

impl fmt::Display for PreviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewStatus::Pending => write!(f, "pending"),
            PreviewStatus::Ready => write!(f, "ready"),
            PreviewStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PreviewStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PreviewStatus::Pending),
            "ready" => Ok(PreviewStatus::Ready),
            "failed" => Ok(PreviewStatus::Failed),
            _ => Err(format!("Unknown preview status: {}", s)),
        }
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// A unit of user intent tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: Uuid,
    pub user_id: String,
    pub command_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub confidence: f32,
    pub title: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    /// Read a string field from the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Read an unsigned integer field from the payload, defaulting to zero.
    pub fn payload_u32(&self, key: &str) -> u32 {
        self.payload
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    pub fn payload_bool(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Fields supplied by the upstream producer when creating an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAction {
    pub user_id: String,
    pub command_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub confidence: f32,
    pub title: String,
    #[serde(default)]
    pub payload: Payload,
}

impl NewAction {
    /// Reject malformed input before it reaches the store.
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.user_id.trim().is_empty() {
            return Err(TesseraError::Validation("userId must not be empty".into()));
        }
        if self.title.trim().is_empty() {
            return Err(TesseraError::Validation("title must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence) || self.confidence.is_nan() {
            return Err(TesseraError::Validation(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Filter for listing a user's actions.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    /// Empty means any status.
    pub statuses: Vec<ActionStatus>,
    pub action_type: Option<ActionType>,
    pub limit: Option<usize>,
}

/// Inbound natural-language reply to an approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalReplyEvent {
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
    #[serde(default)]
    pub action_id: Option<Uuid>,
    pub reply_text: String,
    pub user_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Result of classifying an approval reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalIntentResult {
    pub intent: ApprovalIntent,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

impl ApprovalIntentResult {
    pub fn unclear(reasoning: impl Into<String>) -> Self {
        Self {
            intent: ApprovalIntent::Unclear,
            confidence: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

/// Externally generated preview used for review-before-approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPreview {
    pub action_id: Uuid,
    pub status: PreviewStatus,
    #[serde(default)]
    pub fields: Payload,
    pub generated_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_action() -> Action {
        let mut payload = Payload::new();
        payload.insert("url".into(), serde_json::json!("https://example.com"));
        payload.insert("retryCount".into(), serde_json::json!(2));
        payload.insert("retryable".into(), serde_json::json!(true));
        Action {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            command_id: "cmd-1".into(),
            action_type: ActionType::Link,
            confidence: 0.95,
            title: "Save example".into(),
            status: ActionStatus::Pending,
            payload,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_action_type_display_and_parse() {
        for t in ActionType::ALL {
            assert_eq!(t.to_string().parse::<ActionType>().unwrap(), t);
        }
        assert_eq!(ActionType::Calendar.to_string(), "calendar");
        assert!("bookmark".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_action_status_display_and_parse() {
        assert_eq!(ActionStatus::AwaitingApproval.to_string(), "awaiting_approval");
        for s in ActionStatus::ALL {
            assert_eq!(s.as_str().parse::<ActionStatus>().unwrap(), s);
        }
        assert!("done".parse::<ActionStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_display() {
        for s in ActionStatus::ALL {
            let json = serde_json::to_string(&s).unwrap();
            assert_eq!(json, format!("\"{}\"", s));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ActionStatus::Completed.is_terminal());
        assert!(ActionStatus::Rejected.is_terminal());
        assert!(ActionStatus::Archived.is_terminal());
        assert!(!ActionStatus::Failed.is_terminal());
        assert!(!ActionStatus::Conflict.is_terminal());
        assert!(!ActionStatus::AwaitingApproval.is_terminal());
    }

    #[test]
    fn test_user_settable_statuses() {
        let settable: Vec<_> = ActionStatus::ALL
            .into_iter()
            .filter(|s| s.is_user_settable())
            .collect();
        assert_eq!(
            settable,
            vec![
                ActionStatus::Processing,
                ActionStatus::Rejected,
                ActionStatus::Archived
            ]
        );
    }

    #[test]
    fn test_action_wire_format_is_camel_case() {
        let action = sample_action();
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "link");
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["commandId"], "cmd-1");
        assert_eq!(json["status"], "pending");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_payload_accessors() {
        let action = sample_action();
        assert_eq!(action.payload_str("url"), Some("https://example.com"));
        assert_eq!(action.payload_str("missing"), None);
        assert_eq!(action.payload_u32("retryCount"), 2);
        assert_eq!(action.payload_u32("missing"), 0);
        assert!(action.payload_bool("retryable"));
        assert!(action.is_owned_by("user-1"));
        assert!(!action.is_owned_by("user-2"));
    }

    #[test]
    fn test_new_action_validation() {
        let valid = NewAction {
            user_id: "u".into(),
            command_id: "c".into(),
            action_type: ActionType::Research,
            confidence: 0.5,
            title: "Look into it".into(),
            payload: Payload::new(),
        };
        assert!(valid.validate().is_ok());

        let mut bad = valid.clone();
        bad.confidence = 1.2;
        assert!(matches!(bad.validate(), Err(TesseraError::Validation(_))));

        let mut bad = valid.clone();
        bad.title = "   ".into();
        assert!(bad.validate().is_err());

        let mut bad = valid;
        bad.user_id = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_approval_reply_event_defaults() {
        let event: ApprovalReplyEvent = serde_json::from_str(
            r#"{"replyToMessageId":"msg-1","replyText":"yes","userId":"u1"}"#,
        )
        .unwrap();
        assert_eq!(event.reply_to_message_id.as_deref(), Some("msg-1"));
        assert!(event.action_id.is_none());
    }

    #[test]
    fn test_intent_result_parses_llm_shape() {
        let result: ApprovalIntentResult = serde_json::from_str(
            r#"{"intent":"approve","confidence":0.93,"reasoning":"said yes"}"#,
        )
        .unwrap();
        assert_eq!(result.intent, ApprovalIntent::Approve);
        assert_eq!(ApprovalIntentResult::unclear("x").intent, ApprovalIntent::Unclear);
    }
}
