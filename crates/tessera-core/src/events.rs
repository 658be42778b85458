use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Action, ActionType, Payload};

/// Outbound event announcing that an action exists and should be dispatched.
///
/// Published by the upstream producer on creation, and again by the
/// orchestrator for approved actions that follow the asynchronous path.
/// Consumers must tolerate redelivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCreatedEvent {
    pub action_id: Uuid,
    pub user_id: String,
    pub command_id: String,
    pub action_type: ActionType,
    pub title: String,
    #[serde(default)]
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl ActionCreatedEvent {
    pub fn from_action(action: &Action) -> Self {
        Self {
            action_id: action.id,
            user_id: action.user_id.clone(),
            command_id: action.command_id.clone(),
            action_type: action.action_type,
            title: action.title.clone(),
            payload: action.payload.clone(),
            timestamp: Utc::now(),
        }
    }
}
