//! Automoderator pipeline
//!
//! Ties configuration, rule evaluation, exemptions and punishment execution
//! together for one content event.

use crate::AUTOMOD_TARGET;
use crate::automod::{ContentEvent, ProtectionFilter, RuleEngine, RuleType};
use crate::config::{CommunityConfig, ConfigStore, RuleConfig};
use crate::enforcement::{EnforcementResult, ModCase, PunishmentExecutor};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs content events through the automoderation pipeline
pub struct AutoModerator {
    config: Arc<dyn ConfigStore>,
    engine: RuleEngine,
    protection: ProtectionFilter,
    executor: Arc<PunishmentExecutor>,
}

impl AutoModerator {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        protection: ProtectionFilter,
        executor: Arc<PunishmentExecutor>,
    ) -> Self {
        Self {
            config,
            engine: RuleEngine::new(),
            protection,
            executor,
        }
    }

    /// Evaluate an event and punish its author if a rule triggers
    ///
    /// Returns the created case, or `None` when nothing triggered, the author
    /// is exempt or the trigger was already handled.
    ///
    /// # Errors
    /// Returns an error if configuration or case storage fails.
    pub async fn handle_event(&self, event: &ContentEvent) -> EnforcementResult<Option<ModCase>> {
        if !RuleEngine::accepts(event) {
            return Ok(None);
        }
        let Some(community_id) = event.community_id else {
            return Ok(None);
        };

        let Some(community) = self.config.community_config(community_id).await? else {
            debug!(target: AUTOMOD_TARGET, community_id, "Community has no automoderation config");
            return Ok(None);
        };
        let rules = self.config.rule_configs(community_id).await?;
        if rules.is_empty() {
            return Ok(None);
        }

        let Some((rule_type, rule)) = self.engine.evaluate(event, &rules) else {
            return Ok(None);
        };

        if self.protection.is_exempt(event, &rule, &community).await {
            info!(
                target: AUTOMOD_TARGET,
                community_id,
                user_id = event.author_id,
                message_id = event.message_id,
                rule_type = %rule_type,
                "Author is exempt, no case created"
            );
            return Ok(None);
        }

        let Some(case) = self.executor.execute(event, rule_type, &rule).await? else {
            return Ok(None);
        };

        if let Some(repeat) = rules.iter().find(|r| r.rule_type == RuleType::RepeatOffender) {
            if let Err(e) = self.escalate(event, &case, repeat, &community).await {
                error!(
                    target: AUTOMOD_TARGET,
                    community_id,
                    user_id = event.author_id,
                    "Failed to check repeat offences: {e}"
                );
            }
        }

        Ok(Some(case))
    }

    /// Create a repeat offender case once a user collects more automatic cases
    /// within the rule's window than its limit allows
    ///
    /// Only one repeat offender case is created per window.
    async fn escalate(
        &self,
        event: &ContentEvent,
        case: &ModCase,
        repeat: &RuleConfig,
        community: &CommunityConfig,
    ) -> EnforcementResult<Option<ModCase>> {
        let since = case.created_at - repeat.window();
        let recent = self
            .executor
            .store()
            .find_automatic_since(case.community_id, case.subject_user_id, since)
            .await?;

        let already_escalated = recent
            .iter()
            .any(|c| c.rule_type == Some(RuleType::RepeatOffender));
        let offences = recent
            .iter()
            .filter(|c| c.rule_type != Some(RuleType::RepeatOffender))
            .count();

        if already_escalated || offences <= repeat.limit as usize {
            return Ok(None);
        }
        if self.protection.is_exempt(event, repeat, community).await {
            return Ok(None);
        }

        warn!(
            target: AUTOMOD_TARGET,
            community_id = case.community_id,
            user_id = case.subject_user_id,
            offences,
            window_minutes = repeat.window().num_minutes(),
            "Repeat offender, escalating"
        );
        self.executor
            .execute(event, RuleType::RepeatOffender, repeat)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::MockMemberDirectory;
    use crate::config::MemoryConfigStore;
    use crate::enforcement::{MemoryCaseStore, MockModerationAction, PunishmentType};
    use std::time::Duration;

    const COMMUNITY: u64 = 67890;
    const USER: u64 = 12345;
    const EXEMPT_ROLE: u64 = 300;

    struct Fixture {
        moderator: AutoModerator,
        store: MemoryCaseStore,
    }

    fn fixture(rules: Vec<RuleConfig>, roles: Vec<u64>, actions: MockModerationAction) -> Fixture {
        let config = MemoryConfigStore::new();
        config.insert(
            CommunityConfig {
                community_id: COMMUNITY,
                moderator_roles: vec![100],
                admin_roles: Vec::new(),
            },
            rules,
        );

        let mut directory = MockMemberDirectory::new();
        directory
            .expect_member_roles()
            .returning(move |_, _| Ok(Some(roles.clone())));

        let store = MemoryCaseStore::new();
        let executor = PunishmentExecutor::new(Arc::new(store.clone()), Arc::new(actions));
        let moderator = AutoModerator::new(
            Arc::new(config),
            ProtectionFilter::new([1], Arc::new(directory), Duration::from_secs(1)),
            Arc::new(executor),
        );
        Fixture { moderator, store }
    }

    fn mentions(message_id: u64, count: usize) -> ContentEvent {
        ContentEvent::new(message_id, USER, 10, COMMUNITY, "hey").with_mentions(count)
    }

    #[tokio::test]
    async fn test_mention_threshold_scenario() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().times(1).returning(|_, _, _, _| Ok(()));
        let rules = vec![
            RuleConfig::new(RuleType::MentionCount, 5).with_punishment(PunishmentType::Mute, 1),
        ];
        let Fixture { moderator, store } = fixture(rules, Vec::new(), actions);

        let case = moderator.handle_event(&mentions(1, 6)).await.unwrap().unwrap();
        assert_eq!(case.rule_type, Some(RuleType::MentionCount));
        assert_eq!(case.subject_user_id, USER);

        assert!(moderator.handle_event(&mentions(2, 3)).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_exempt_role_scenario() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().never();
        let rules = vec![
            RuleConfig::new(RuleType::MentionCount, 5)
                .with_punishment(PunishmentType::Ban, 0)
                .ignoring_roles([EXEMPT_ROLE]),
        ];
        let Fixture { moderator, store } = fixture(rules, vec![EXEMPT_ROLE], actions);

        assert!(moderator.handle_event(&mentions(1, 50)).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_site_admin_and_channel_exempt() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().never();
        let rules = vec![RuleConfig::new(RuleType::InviteLink, 0).ignoring_channels([77])];
        let Fixture { moderator, store } = fixture(rules, Vec::new(), actions);

        let admin = ContentEvent::new(1, 1, 10, COMMUNITY, "discord.gg/abc");
        assert!(moderator.handle_event(&admin).await.unwrap().is_none());

        let exempt_channel = ContentEvent::new(2, USER, 77, COMMUNITY, "discord.gg/abc");
        assert!(moderator.handle_event(&exempt_channel).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_community_is_ignored() {
        let Fixture { moderator, store } = fixture(
            vec![RuleConfig::new(RuleType::InviteLink, 0)],
            Vec::new(),
            MockModerationAction::new(),
        );
        let elsewhere = ContentEvent::new(1, USER, 10, 999, "discord.gg/abc");
        assert!(moderator.handle_event(&elsewhere).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_same_message_punished_once() {
        let mut actions = MockModerationAction::new();
        actions.expect_apply().times(1).returning(|_, _, _, _| Ok(()));
        let rules =
            vec![RuleConfig::new(RuleType::InviteLink, 0).with_punishment(PunishmentType::Kick, 0)];
        let Fixture { moderator, store } = fixture(rules, Vec::new(), actions);

        let message = ContentEvent::new(1, USER, 10, COMMUNITY, "discord.gg/abc");
        assert!(moderator.handle_event(&message).await.unwrap().is_some());
        // The edit of the same message does not create a second case
        assert!(moderator.handle_event(&message.clone().edited()).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_offender_escalates_once() {
        let mut actions = MockModerationAction::new();
        actions
            .expect_apply()
            .withf(|_, _, punishment, _| *punishment == PunishmentType::Ban)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let rules = vec![
            RuleConfig::new(RuleType::MentionCount, 5),
            RuleConfig::new(RuleType::RepeatOffender, 2)
                .with_time_limit(60)
                .with_punishment(PunishmentType::Ban, 0),
        ];
        let Fixture { moderator, store } = fixture(rules, Vec::new(), actions);

        for message_id in 1..=2 {
            moderator.handle_event(&mentions(message_id, 6)).await.unwrap();
        }
        assert_eq!(store.len(), 2);

        // Third offence crosses the limit
        moderator.handle_event(&mentions(3, 6)).await.unwrap();
        let escalations = store
            .get_all()
            .into_iter()
            .filter(|c| c.rule_type == Some(RuleType::RepeatOffender))
            .count();
        assert_eq!(escalations, 1);

        // Further offences in the window do not escalate again
        moderator.handle_event(&mentions(4, 6)).await.unwrap();
        assert_eq!(store.len(), 5);
    }
}
