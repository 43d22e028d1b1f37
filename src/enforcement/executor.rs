//! Punishment executor
//!
//! Turns a matched rule into a durable case and carries out its live action,
//! and lifts expired punishments.

use crate::AUTOMOD_TARGET;
use crate::automod::{ContentEvent, RuleType};
use crate::config::RuleConfig;
use crate::enforcement::{
    CaseStore, CreationType, EnforcementError, EnforcementResult, ModCase, ModerationAction,
    SYSTEM_MODERATOR_ID,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default number of failed lift attempts before a case is given up
pub const DEFAULT_MAX_LIFT_ATTEMPTS: u32 = 5;

/// Result of a lift attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftOutcome {
    /// The punishment was reversed and the case deactivated
    Lifted,
    /// The case was no longer active
    AlreadyLifted,
    /// Another lift attempt owns the case
    Busy,
    /// Reversal failed; `gave_up` once the attempt bound is reached
    Failed { attempts: u32, gave_up: bool },
}

/// Creates cases for triggered rules and applies or lifts their punishments
pub struct PunishmentExecutor {
    store: Arc<dyn CaseStore>,
    actions: Arc<dyn ModerationAction>,
    execution_enabled: bool,
    max_lift_attempts: u32,
}

impl PunishmentExecutor {
    pub fn new(store: Arc<dyn CaseStore>, actions: Arc<dyn ModerationAction>) -> Self {
        Self {
            store,
            actions,
            execution_enabled: true,
            max_lift_attempts: DEFAULT_MAX_LIFT_ATTEMPTS,
        }
    }

    /// Record cases without calling the moderation API
    #[must_use]
    pub fn with_execution(mut self, enabled: bool) -> Self {
        self.execution_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_max_lift_attempts(mut self, attempts: u32) -> Self {
        self.max_lift_attempts = attempts.max(1);
        self
    }

    /// The case store this executor writes to
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    /// Create the case for a triggered rule and apply its punishment
    ///
    /// Returns `None` if a case for the same content and rule already exists.
    /// The case is persisted before the live action runs; a failed action
    /// leaves the case flagged with `execution_failed`.
    ///
    /// # Errors
    /// Returns an error if the event has no community, the configured duration
    /// is out of range or the store fails.
    pub async fn execute(
        &self,
        event: &ContentEvent,
        rule_type: RuleType,
        rule: &RuleConfig,
    ) -> EnforcementResult<Option<ModCase>> {
        let community_id = event
            .community_id
            .ok_or_else(|| EnforcementError::Other("Event has no community".to_string()))?;
        let content_ref = event.content_ref();

        if self
            .store
            .find_by_reference(community_id, &content_ref, rule_type)
            .await?
            .is_some()
        {
            info!(
                target: AUTOMOD_TARGET,
                community_id,
                content_ref,
                rule_type = %rule_type,
                "Case already exists for this trigger"
            );
            return Ok(None);
        }

        let execute = self.execution_enabled && rule.execute_punishment;
        let duration = rule
            .punishment_type
            .duration_for_hours(rule.punishment_duration_hours)?;
        let case = ModCase::new(
            community_id,
            event.author_id,
            SYSTEM_MODERATOR_ID,
            rule.punishment_type,
            duration,
            execute,
            CreationType::Automatic,
        )?
        .with_details(
            format!("Automoderation: {rule_type}"),
            format!(
                "Message {} in channel {} triggered {rule_type}",
                event.message_id, event.channel_id
            ),
        )
        .with_trigger(content_ref.clone(), rule_type);

        let mut case = match self.store.create(case).await {
            Ok(case) => case,
            Err(EnforcementError::DuplicateTrigger { .. }) => {
                info!(
                    target: AUTOMOD_TARGET,
                    community_id,
                    content_ref,
                    rule_type = %rule_type,
                    "Concurrent trigger already recorded"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        info!(
            target: AUTOMOD_TARGET,
            case_id = %case.id,
            community_id,
            user_id = event.author_id,
            rule_type = %rule_type,
            punishment = %case.punishment_type,
            until = ?case.punished_until,
            "Case created"
        );

        if rule.delete_message && self.execution_enabled {
            if let Err(e) = self
                .actions
                .delete_content(event.channel_id, event.message_id)
                .await
            {
                warn!(
                    target: AUTOMOD_TARGET,
                    case_id = %case.id,
                    "Failed to delete message {}: {e}", event.message_id
                );
            }
        }

        if !execute || !case.punishment_type.has_live_action() {
            return Ok(Some(case));
        }

        if let Err(e) = self
            .actions
            .apply(community_id, case.subject_user_id, case.punishment_type, duration)
            .await
        {
            error!(
                target: AUTOMOD_TARGET,
                case_id = %case.id,
                punishment = %case.punishment_type,
                "Failed to apply punishment: {e}"
            );
            self.store.mark_execution_failed(&case.id).await?;
            case.execution_failed = true;
        }

        Ok(Some(case))
    }

    /// Reverse the punishment of a case and deactivate it
    ///
    /// Lifting an inactive case is a no-op. A failed reversal releases the
    /// case for the next attempt until the attempt bound is reached. A store
    /// error releases the claim without counting an attempt.
    ///
    /// # Errors
    /// Returns an error if the case does not exist or the store fails.
    pub async fn lift(&self, case: &ModCase) -> EnforcementResult<LiftOutcome> {
        if !self.store.begin_lift(&case.id).await? {
            let stored = self
                .store
                .get(&case.id)
                .await?
                .ok_or_else(|| EnforcementError::NotFound(case.id.clone()))?;
            return Ok(if !stored.punishment_active {
                LiftOutcome::AlreadyLifted
            } else if stored.lift_failed {
                LiftOutcome::Failed {
                    attempts: stored.lift_attempts,
                    gave_up: true,
                }
            } else {
                LiftOutcome::Busy
            });
        }

        let reversal = if case.punishment_type.is_reversible() && !case.execution_failed {
            self.actions
                .reverse(case.community_id, case.subject_user_id, case.punishment_type)
                .await
        } else {
            Ok(())
        };

        let result = self.finish_lift(case, reversal).await;
        if result.is_err() {
            if let Err(e) = self.store.release_lift(&case.id).await {
                error!(case_id = %case.id, "Failed to release lift claim: {e}");
            }
        }
        result
    }

    async fn finish_lift(
        &self,
        case: &ModCase,
        reversal: EnforcementResult<()>,
    ) -> EnforcementResult<LiftOutcome> {
        match reversal {
            Ok(()) => {
                if self.store.update_active_flag(&case.id, false).await? {
                    Ok(LiftOutcome::Lifted)
                } else {
                    Ok(LiftOutcome::AlreadyLifted)
                }
            }
            Err(e) => {
                let updated = self
                    .store
                    .record_lift_failure(&case.id, self.max_lift_attempts)
                    .await?;
                if updated.lift_failed {
                    error!(
                        case_id = %case.id,
                        attempts = updated.lift_attempts,
                        "Giving up lifting {} after repeated failures, manual intervention needed: {e}",
                        case.punishment_type
                    );
                } else {
                    warn!(
                        case_id = %case.id,
                        attempts = updated.lift_attempts,
                        "Failed to lift {}, will retry: {e}",
                        case.punishment_type
                    );
                }
                Ok(LiftOutcome::Failed {
                    attempts: updated.lift_attempts,
                    gave_up: updated.lift_failed,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::{MemoryCaseStore, MockModerationAction, PunishmentType};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn event() -> ContentEvent {
        ContentEvent::new(555, 12345, 10, 67890, "hello").with_mentions(6)
    }

    fn executor(actions: MockModerationAction) -> (PunishmentExecutor, MemoryCaseStore) {
        let store = MemoryCaseStore::new();
        let executor = PunishmentExecutor::new(Arc::new(store.clone()), Arc::new(actions));
        (executor, store)
    }

    #[tokio::test]
    async fn test_duration_scenario() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().times(2).returning(|_, _, _, _| Ok(()));
        let (executor, _) = executor(actions);

        let permanent =
            RuleConfig::new(RuleType::MentionCount, 5).with_punishment(PunishmentType::Ban, 0);
        let case = executor
            .execute(&event(), RuleType::MentionCount, &permanent)
            .await
            .unwrap()
            .unwrap();
        assert!(case.punished_until.is_none());
        assert!(case.punishment_active);
        assert_eq!(case.creation_type, CreationType::Automatic);
        assert_eq!(case.moderator_id, SYSTEM_MODERATOR_ID);

        let timed =
            RuleConfig::new(RuleType::MentionCount, 5).with_punishment(PunishmentType::Mute, 24);
        let mut second = event();
        second.message_id = 556;
        let case = executor
            .execute(&second, RuleType::MentionCount, &timed)
            .await
            .unwrap()
            .unwrap();
        let until = case.punished_until.unwrap();
        assert_eq!(until - case.created_at, Duration::hours(24));
    }

    #[tokio::test]
    async fn test_duplicate_trigger_creates_no_case() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().times(1).returning(|_, _, _, _| Ok(()));
        let (executor, store) = executor(actions);

        let rule =
            RuleConfig::new(RuleType::MentionCount, 5).with_punishment(PunishmentType::Mute, 1);
        assert!(executor.execute(&event(), RuleType::MentionCount, &rule).await.unwrap().is_some());
        assert!(executor.execute(&event(), RuleType::MentionCount, &rule).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_action_failure_keeps_case() {
        let mut actions = MockModerationAction::new();
        actions
            .expect_apply()
            .times(1)
            .returning(|_, _, _, _| {
                Err(EnforcementError::ActionFailed("missing permissions".to_string()))
            });
        let (executor, store) = executor(actions);

        let rule =
            RuleConfig::new(RuleType::MentionCount, 5).with_punishment(PunishmentType::Mute, 1);
        let case = executor
            .execute(&event(), RuleType::MentionCount, &rule)
            .await
            .unwrap()
            .unwrap();
        assert!(case.execution_failed);

        let stored = store.get(&case.id).await.unwrap().unwrap();
        assert!(stored.execution_failed);
        assert!(stored.punishment_active);
    }

    #[tokio::test]
    async fn test_disabled_execution_only_records() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().never();
        actions.expect_delete_content().never();
        let (executor, store) = executor(actions);
        let executor = executor.with_execution(false);

        let mut rule =
            RuleConfig::new(RuleType::InviteLink, 0).with_punishment(PunishmentType::Mute, 2);
        rule.delete_message = true;
        let case = executor
            .execute(&event(), RuleType::InviteLink, &rule)
            .await
            .unwrap()
            .unwrap();
        assert!(!case.punishment_active);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_message_is_best_effort() {
        let mut actions = MockModerationAction::new();
        actions
            .expect_delete_content()
            .withf(|channel, message| *channel == 10 && *message == 555)
            .times(1)
            .returning(|_, _| Err(EnforcementError::ActionFailed("gone".to_string())));
        actions.expect_apply().times(1).returning(|_, _, _, _| Ok(()));
        let (executor, _) = executor(actions);

        let mut rule =
            RuleConfig::new(RuleType::InviteLink, 0).with_punishment(PunishmentType::Kick, 0);
        rule.delete_message = true;
        let case = executor
            .execute(&event(), RuleType::InviteLink, &rule)
            .await
            .unwrap()
            .unwrap();
        assert!(!case.punishment_active);
        assert!(!case.execution_failed);
    }

    #[tokio::test]
    async fn test_warn_has_no_live_action() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().never();
        let (executor, _) = executor(actions);

        let rule =
            RuleConfig::new(RuleType::EmbedCount, 0).with_punishment(PunishmentType::Warn, 24);
        let case = executor
            .execute(&event().with_embeds(1), RuleType::EmbedCount, &rule)
            .await
            .unwrap()
            .unwrap();
        assert!(case.punished_until.is_none());
        assert!(!case.punishment_active);
    }

    #[tokio::test]
    async fn test_lift_is_idempotent() {
        let mut actions = MockModerationAction::new();
        actions.expect_reverse().times(1).returning(|_, _, _| Ok(()));
        let (executor, store) = executor(actions);

        let case = ModCase::new(
            67890,
            12345,
            SYSTEM_MODERATOR_ID,
            PunishmentType::Mute,
            Some(Duration::hours(1)),
            true,
            CreationType::Automatic,
        )
        .unwrap();
        let case = store.create(case).await.unwrap();

        assert_eq!(executor.lift(&case).await.unwrap(), LiftOutcome::Lifted);
        assert_eq!(executor.lift(&case).await.unwrap(), LiftOutcome::AlreadyLifted);

        let stored = store.get(&case.id).await.unwrap().unwrap();
        assert!(!stored.punishment_active);
        assert!(stored.lifted_at.is_some_and(|at| at <= Utc::now()));
    }

    #[tokio::test]
    async fn test_lift_busy_while_claimed() {
        let mut actions = MockModerationAction::new();
        actions.expect_reverse().never();
        let (executor, store) = executor(actions);

        let case = ModCase::new(
            67890,
            12345,
            SYSTEM_MODERATOR_ID,
            PunishmentType::Ban,
            Some(Duration::hours(1)),
            true,
            CreationType::Automatic,
        )
        .unwrap();
        let case = store.create(case).await.unwrap();
        assert!(store.begin_lift(&case.id).await.unwrap());

        assert_eq!(executor.lift(&case).await.unwrap(), LiftOutcome::Busy);
    }

    #[tokio::test]
    async fn test_lift_failure_is_bounded() {
        let mut actions = MockModerationAction::new();
        actions
            .expect_reverse()
            .times(2)
            .returning(|_, _, _| Err(EnforcementError::ActionFailed("unavailable".to_string())));
        let (executor, store) = executor(actions);
        let executor = executor.with_max_lift_attempts(2);

        let case = ModCase::new(
            67890,
            12345,
            SYSTEM_MODERATOR_ID,
            PunishmentType::Ban,
            Some(Duration::hours(1)),
            true,
            CreationType::Automatic,
        )
        .unwrap();
        let case = store.create(case).await.unwrap();

        assert_eq!(
            executor.lift(&case).await.unwrap(),
            LiftOutcome::Failed { attempts: 1, gave_up: false }
        );
        assert_eq!(
            executor.lift(&case).await.unwrap(),
            LiftOutcome::Failed { attempts: 2, gave_up: true }
        );
        // Given up: no further reversal attempts
        assert_eq!(
            executor.lift(&case).await.unwrap(),
            LiftOutcome::Failed { attempts: 2, gave_up: true }
        );

        let stored = store.get(&case.id).await.unwrap().unwrap();
        assert!(stored.punishment_active);
        assert!(stored.lift_failed);
    }

    #[tokio::test]
    async fn test_failed_execution_lifts_without_reversal() {
        let mut actions = MockModerationAction::new();
        actions.expect_reverse().never();
        let (executor, store) = executor(actions);

        let mut case = ModCase::new(
            67890,
            12345,
            SYSTEM_MODERATOR_ID,
            PunishmentType::Mute,
            Some(Duration::hours(1)),
            true,
            CreationType::Automatic,
        )
        .unwrap();
        case.execution_failed = true;
        let case = store.create(case).await.unwrap();

        assert_eq!(executor.lift(&case).await.unwrap(), LiftOutcome::Lifted);
    }

    #[tokio::test]
    async fn test_out_of_range_duration_is_rejected() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().never();
        let (executor, store) = executor(actions);

        for (punishment, hours) in [
            (PunishmentType::Mute, 10_000_000_000),
            (PunishmentType::Ban, u64::MAX),
        ] {
            let rule =
                RuleConfig::new(RuleType::MentionCount, 5).with_punishment(punishment, hours);
            let result = executor.execute(&event(), RuleType::MentionCount, &rule).await;
            assert!(matches!(result, Err(EnforcementError::Config(_))));
        }
        assert!(store.is_empty());
    }

    /// Case store whose next deactivation fails
    struct FailingDeactivation {
        inner: MemoryCaseStore,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl CaseStore for FailingDeactivation {
        async fn create(&self, case: ModCase) -> EnforcementResult<ModCase> {
            self.inner.create(case).await
        }

        async fn get(&self, case_id: &str) -> EnforcementResult<Option<ModCase>> {
            self.inner.get(case_id).await
        }

        async fn find_by_reference(
            &self,
            community_id: u64,
            content_ref: &str,
            rule_type: RuleType,
        ) -> EnforcementResult<Option<ModCase>> {
            self.inner
                .find_by_reference(community_id, content_ref, rule_type)
                .await
        }

        async fn find_due_punishments(
            &self,
            now: DateTime<Utc>,
        ) -> EnforcementResult<Vec<ModCase>> {
            self.inner.find_due_punishments(now).await
        }

        async fn update_active_flag(&self, case_id: &str, active: bool) -> EnforcementResult<bool> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(EnforcementError::Storage("disk full".to_string()));
            }
            self.inner.update_active_flag(case_id, active).await
        }

        async fn begin_lift(&self, case_id: &str) -> EnforcementResult<bool> {
            self.inner.begin_lift(case_id).await
        }

        async fn release_lift(&self, case_id: &str) -> EnforcementResult<()> {
            self.inner.release_lift(case_id).await
        }

        async fn record_lift_failure(
            &self,
            case_id: &str,
            max_attempts: u32,
        ) -> EnforcementResult<ModCase> {
            self.inner.record_lift_failure(case_id, max_attempts).await
        }

        async fn mark_execution_failed(&self, case_id: &str) -> EnforcementResult<()> {
            self.inner.mark_execution_failed(case_id).await
        }

        async fn find_automatic_since(
            &self,
            community_id: u64,
            user_id: u64,
            since: DateTime<Utc>,
        ) -> EnforcementResult<Vec<ModCase>> {
            self.inner
                .find_automatic_since(community_id, user_id, since)
                .await
        }

        async fn find_failed_lifts(&self) -> EnforcementResult<Vec<ModCase>> {
            self.inner.find_failed_lifts().await
        }
    }

    #[tokio::test]
    async fn test_store_error_releases_lift_claim() {
        let mut actions = MockModerationAction::new();
        actions.expect_reverse().times(2).returning(|_, _, _| Ok(()));
        let inner = MemoryCaseStore::new();
        let store = Arc::new(FailingDeactivation {
            inner: inner.clone(),
            fail_next: AtomicBool::new(true),
        });
        let executor = PunishmentExecutor::new(store, Arc::new(actions));

        let case = ModCase::new(
            67890,
            12345,
            SYSTEM_MODERATOR_ID,
            PunishmentType::Mute,
            Some(Duration::hours(1)),
            true,
            CreationType::Automatic,
        )
        .unwrap();
        let case = inner.create(case).await.unwrap();

        assert!(matches!(executor.lift(&case).await, Err(EnforcementError::Storage(_))));
        let stored = inner.get(&case.id).await.unwrap().unwrap();
        assert!(!stored.lift_in_progress);
        assert_eq!(stored.lift_attempts, 0);
        assert!(stored.is_due_for_lift(case.created_at + Duration::hours(2)));

        // The next sweep can claim it again
        assert_eq!(executor.lift(&case).await.unwrap(), LiftOutcome::Lifted);
    }
}
