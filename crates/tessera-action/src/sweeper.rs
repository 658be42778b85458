//! Recovery sweep over actions stuck in non-terminal states.
//!
//! The sweep is triggered from outside (a cron hitting the internal
//! endpoint); it never schedules itself. All candidate lists are read before
//! any action is touched, so one sweep never acts twice on the same action.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use tessera_core::config::SweepConfig;
use tessera_core::types::{Action, ActionStatus, Payload};
use tessera_storage::{ActionStore, StaleQuery, TransitionOutcome};

use crate::dispatcher::{Dispatcher, HandleOutcome};
use crate::error::ActionError;

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    pub stale_after: Duration,
    pub stalled_after: Duration,
    pub max_retries: u32,
    pub batch_limit: usize,
}

impl SweepPolicy {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            stale_after: Duration::seconds(config.stale_after_secs as i64),
            stalled_after: Duration::seconds(config.stalled_after_secs as i64),
            max_retries: config.max_retries,
            batch_limit: config.batch_limit,
        }
    }
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    /// Stale pending actions re-handled.
    pub redispatched: usize,
    /// Processing actions failed as stalled.
    pub stalled: usize,
    /// Failed actions re-executed.
    pub retried: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct RetrySweeper {
    store: Arc<ActionStore>,
    dispatcher: Arc<Dispatcher>,
    policy: SweepPolicy,
}

impl RetrySweeper {
    pub fn new(store: Arc<ActionStore>, dispatcher: Arc<Dispatcher>, policy: SweepPolicy) -> Self {
        Self {
            store,
            dispatcher,
            policy,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, ActionError> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, ActionError> {
        let stale_cutoff = now - self.policy.stale_after;
        let stalled_cutoff = now - self.policy.stalled_after;
        let limit = self.policy.batch_limit;

        // Unregistered types and spent or permanent failures are filtered in
        // the query; otherwise they would fill every batch forever.
        let registered = self.dispatcher.registered_types();
        let pending = self.store.list_stale(
            &StaleQuery::new(&[ActionStatus::Pending], stale_cutoff, limit)
                .of_types(registered.clone()),
        )?;
        let processing = self.store.list_stale(&StaleQuery::new(
            &[ActionStatus::Processing],
            stalled_cutoff,
            limit,
        ))?;
        let failed = self.store.list_stale(
            &StaleQuery::new(&[ActionStatus::Failed], stale_cutoff, limit)
                .of_types(registered)
                .retryable_below(self.policy.max_retries),
        )?;

        let mut report = SweepReport {
            examined: pending.len() + processing.len() + failed.len(),
            ..SweepReport::default()
        };

        for action in pending {
            let id = action.id;
            match self.dispatcher.handle(action).await {
                Ok(HandleOutcome::AwaitingApproval) | Ok(HandleOutcome::Executed(_)) => {
                    report.redispatched += 1
                }
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    error!(action_id = %id, error = %e, "Sweep failed to re-handle pending action");
                    report.errors += 1;
                }
            }
        }

        for action in processing {
            match self.fail_stalled(&action) {
                Ok(true) => report.stalled += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(action_id = %action.id, error = %e, "Sweep failed to mark stalled action");
                    report.errors += 1;
                }
            }
        }

        for action in failed {
            let id = action.id;
            match self.retry(action).await {
                Ok(true) => report.retried += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(action_id = %id, error = %e, "Sweep failed to retry action");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            redispatched = report.redispatched,
            stalled = report.stalled,
            retried = report.retried,
            skipped = report.skipped,
            errors = report.errors,
            "Retry sweep finished"
        );
        Ok(report)
    }

    fn fail_stalled(&self, action: &Action) -> Result<bool, ActionError> {
        let mut patch = Payload::new();
        patch.insert("errorCode".into(), json!("EXECUTION_STALLED"));
        patch.insert(
            "message".into(),
            json!("Execution did not report back in time"),
        );
        patch.insert("retryable".into(), json!(true));
        patch.insert("lastAttemptAt".into(), json!(Utc::now().to_rfc3339()));

        let outcome = self.store.update_status_if_with(
            action.id,
            ActionStatus::Processing,
            ActionStatus::Failed,
            Some(&patch),
        )?;
        if !outcome.is_updated() {
            info!(action_id = %action.id, outcome = outcome.label(), "Stalled action moved on");
        }
        Ok(outcome.is_updated())
    }

    async fn retry(&self, action: Action) -> Result<bool, ActionError> {
        let attempts = action.payload_u32("retryCount");
        if !action.payload_bool("retryable") || attempts >= self.policy.max_retries {
            return Ok(false);
        }
        if !self.dispatcher.is_registered(action.action_type) {
            return Ok(false);
        }

        let mut patch = Payload::new();
        patch.insert("retryCount".into(), json!(attempts + 1));

        match self.store.update_status_if_with(
            action.id,
            ActionStatus::Failed,
            ActionStatus::Processing,
            Some(&patch),
        )? {
            TransitionOutcome::Updated(claimed) => {
                info!(action_id = %claimed.id, attempt = attempts + 1, "Retrying failed action");
                self.dispatcher.execute(claimed).await?;
                Ok(true)
            }
            other => {
                info!(action_id = %action.id, outcome = other.label(), "Retry claim lost");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::ActionType;

    use crate::agent::AgentOutcome;
    use crate::error::AgentError;
    use crate::testing::Harness;

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    fn sweeper(h: &Harness) -> RetrySweeper {
        RetrySweeper::new(h.store.clone(), h.dispatcher.clone(), SweepPolicy::default())
    }

    #[tokio::test]
    async fn test_empty_sweep_is_noop() {
        let h = Harness::new();
        let report = sweeper(&h).sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_fresh_actions_are_not_swept() {
        let h = Harness::new();
        h.create(ActionType::Todo, 0.5);
        let report = sweeper(&h).sweep().await.unwrap();
        assert_eq!(report.examined, 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stale_pending_is_rehandled() {
        let h = Harness::new();
        let todo = h.create(ActionType::Todo, 0.5);
        let link = h.create(ActionType::Link, 0.97);
        let note = h.create(ActionType::Note, 0.5);

        let report = sweeper(&h).sweep_at(later()).await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.redispatched, 2);
        assert_eq!(report.skipped, 0);

        assert_eq!(h.reload(todo.id).status, ActionStatus::AwaitingApproval);
        assert_eq!(h.reload(link.id).status, ActionStatus::Completed);
        assert_eq!(h.reload(note.id).status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn test_stalled_processing_fails_retryable() {
        let h = Harness::new();
        let action = h.create(ActionType::Calendar, 0.8);
        h.store
            .update_status_if(action.id, ActionStatus::Pending, ActionStatus::Processing)
            .unwrap();

        let report = sweeper(&h).sweep_at(later()).await.unwrap();
        assert_eq!(report.stalled, 1);
        assert_eq!(report.retried, 0);

        let stored = h.reload(action.id);
        assert_eq!(stored.status, ActionStatus::Failed);
        assert_eq!(stored.payload_str("errorCode"), Some("EXECUTION_STALLED"));
        assert!(stored.payload_bool("retryable"));
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried_until_limit() {
        let h = Harness::new();
        for _ in 0..4 {
            h.agent.push(Err(AgentError::Transport("connection refused".into())));
        }
        let action = h.create(ActionType::Link, 0.95);
        h.dispatcher.handle(action.clone()).await.unwrap();
        assert_eq!(h.reload(action.id).status, ActionStatus::Failed);

        let sweeper = sweeper(&h);
        for attempt in 1..=3u32 {
            let report = sweeper.sweep_at(later()).await.unwrap();
            assert_eq!(report.retried, 1);
            let stored = h.reload(action.id);
            assert_eq!(stored.status, ActionStatus::Failed);
            assert_eq!(stored.payload_u32("retryCount"), attempt);
        }

        // Retries exhausted; the action is no longer a candidate.
        let report = sweeper.sweep_at(later()).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.agent.process_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_retry_can_succeed() {
        let h = Harness::new();
        h.agent.push(Err(AgentError::Server {
            status: 502,
            message: "bad gateway".into(),
        }));
        h.agent.push(Ok(AgentOutcome::completed("https://bookmarks/7")));
        let action = h.create(ActionType::Link, 0.95);
        h.dispatcher.handle(action.clone()).await.unwrap();

        let report = sweeper(&h).sweep_at(later()).await.unwrap();
        assert_eq!(report.retried, 1);
        let stored = h.reload(action.id);
        assert_eq!(stored.status, ActionStatus::Completed);
        assert_eq!(stored.payload_str("resourceUrl"), Some("https://bookmarks/7"));
        assert_eq!(stored.payload_u32("retryCount"), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let h = Harness::new();
        h.agent.push(Err(AgentError::Rejected("bad url".into())));
        let action = h.create(ActionType::Link, 0.95);
        h.dispatcher.handle(action.clone()).await.unwrap();

        let report = sweeper(&h).sweep_at(later()).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.reload(action.id).status, ActionStatus::Failed);
    }

    #[tokio::test]
    async fn test_awaiting_and_conflict_are_left_alone() {
        let h = Harness::new();
        let awaiting = h.awaiting(ActionType::Todo, 0.5).await;
        h.agent.push(Ok(AgentOutcome::duplicate("evt-1")));
        let conflict = h.create(ActionType::Link, 0.95);
        h.dispatcher.handle(conflict.clone()).await.unwrap();
        let sent_before = h.notifier.sent().len();

        let report = sweeper(&h).sweep_at(later()).await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(h.reload(awaiting.id).status, ActionStatus::AwaitingApproval);
        assert_eq!(h.reload(conflict.id).status, ActionStatus::Conflict);
        assert_eq!(h.notifier.sent().len(), sent_before);
    }

    #[tokio::test]
    async fn test_second_sweep_over_completed_is_noop() {
        let h = Harness::new();
        let action = h.create(ActionType::Link, 0.95);
        let sweeper = sweeper(&h);

        let first = sweeper.sweep_at(later()).await.unwrap();
        assert_eq!(first.redispatched, 1);
        assert_eq!(h.reload(action.id).status, ActionStatus::Completed);
        let sent = h.notifier.sent().len();
        let calls = h.agent.process_calls().len();

        let second = sweeper.sweep_at(later()).await.unwrap();
        assert_eq!(second, SweepReport::default());
        assert_eq!(h.notifier.sent().len(), sent);
        assert_eq!(h.agent.process_calls().len(), calls);
    }

    #[tokio::test]
    async fn test_unregistered_backlog_does_not_starve_pending() {
        let h = Harness::new();
        let policy = SweepPolicy::default();
        for _ in 0..policy.batch_limit {
            h.create(ActionType::Note, 0.5);
        }
        let todo = h.create(ActionType::Todo, 0.5);

        let report = sweeper(&h).sweep_at(later()).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.redispatched, 1);
        assert_eq!(h.reload(todo.id).status, ActionStatus::AwaitingApproval);
    }

    #[tokio::test]
    async fn test_unretryable_backlog_does_not_starve_retries() {
        let h = Harness::new();
        let policy = SweepPolicy::default();
        for _ in 0..policy.batch_limit {
            h.agent.push(Err(AgentError::Rejected("bad url".into())));
            let permanent = h.create(ActionType::Link, 0.95);
            h.dispatcher.handle(permanent).await.unwrap();
        }
        h.agent.push(Err(AgentError::Transport("connection reset".into())));
        let transient = h.create(ActionType::Link, 0.95);
        h.dispatcher.handle(transient.clone()).await.unwrap();
        assert!(h.reload(transient.id).payload_bool("retryable"));

        let report = sweeper(&h).sweep_at(later()).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.retried, 1);

        let stored = h.reload(transient.id);
        assert_eq!(stored.status, ActionStatus::Completed);
        assert_eq!(stored.payload_u32("retryCount"), 1);
    }
}
