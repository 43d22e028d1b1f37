//! Rule engine
//!
//! Evaluates a content event against a community's rule configurations in the
//! fixed rule order and reports the first rule that fires.

use crate::automod::{ContentEvent, RULE_ORDER, RuleType};
use crate::config::RuleConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// How long message timestamps are kept when no longer window is configured
const DEFAULT_RETENTION_MINUTES: i64 = 60;
/// Idle authors are pruned every this many recorded messages
const PRUNE_EVERY: u64 = 1024;

/// Recent messages of one author in one community
#[derive(Debug)]
struct AuthorWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    retention: Duration,
}

impl AuthorWindow {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.timestamps
            .back()
            .is_none_or(|last| *last < now - self.retention)
    }
}

/// Sliding window of message timestamps per author and community
#[derive(Debug, Default)]
pub struct MessageRateTracker {
    messages: DashMap<(u64, u64), AuthorWindow>,
    recorded: AtomicU64,
}

impl MessageRateTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message, forgetting timestamps older than `retention`
    ///
    /// The retention is kept per author and community, so pruning never drops
    /// history a longer window still needs.
    pub fn record(&self, community_id: u64, user_id: u64, at: DateTime<Utc>, retention: Duration) {
        {
            let mut window = self
                .messages
                .entry((community_id, user_id))
                .or_insert_with(|| AuthorWindow {
                    timestamps: VecDeque::new(),
                    retention,
                });
            window.retention = retention;
            window.timestamps.push_back(at);
            while window.timestamps.front().is_some_and(|t| *t < at - retention) {
                window.timestamps.pop_front();
            }
        }

        if self.recorded.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(at);
        }
    }

    /// Number of messages recorded at or after `since`
    #[must_use]
    pub fn count_since(&self, community_id: u64, user_id: u64, since: DateTime<Utc>) -> usize {
        self.messages
            .get(&(community_id, user_id))
            .map(|window| window.timestamps.iter().filter(|t| **t >= since).count())
            .unwrap_or(0)
    }

    /// Forget authors whose last message is older than their own retention
    pub fn prune(&self, now: DateTime<Utc>) {
        self.messages.retain(|_, window| !window.is_stale(now));
    }

    /// Number of authors currently tracked
    #[must_use]
    pub fn tracked_authors(&self) -> usize {
        self.messages.len()
    }
}

/// Evaluates content events against rule configurations
#[derive(Debug, Default)]
pub struct RuleEngine {
    tracker: MessageRateTracker,
}

impl RuleEngine {
    /// Create a new engine
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an event is subject to automoderation at all
    ///
    /// Bot messages, system messages and content outside a community are
    /// never inspected.
    #[must_use]
    pub fn accepts(event: &ContentEvent) -> bool {
        !event.author_is_bot && event.kind.is_standard() && event.community_id.is_some()
    }

    /// Find the first rule in `RULE_ORDER` that is configured and matches
    ///
    /// Rules without a configuration are skipped. At most one rule is
    /// reported per event.
    pub fn evaluate(
        &self,
        event: &ContentEvent,
        configs: &[RuleConfig],
    ) -> Option<(RuleType, RuleConfig)> {
        if !Self::accepts(event) {
            return None;
        }
        let community_id = event.community_id?;

        let spam_config = configs.iter().find(|c| c.rule_type == RuleType::Spam);
        if !event.is_edit {
            let default_retention = Duration::minutes(DEFAULT_RETENTION_MINUTES);
            let retention = spam_config
                .map_or(default_retention, RuleConfig::window)
                .max(default_retention);
            self.tracker
                .record(community_id, event.author_id, event.created_at, retention);
        }

        for rule_type in RULE_ORDER {
            if event.is_edit && rule_type.skipped_on_edit() {
                continue;
            }
            let Some(config) = configs.iter().find(|c| c.rule_type == rule_type) else {
                continue;
            };

            let recent = if rule_type == RuleType::Spam {
                self.tracker.count_since(
                    community_id,
                    event.author_id,
                    event.created_at - config.window(),
                )
            } else {
                0
            };

            if rule_type.matches(event, config, recent) {
                debug!(
                    message_id = event.message_id,
                    rule_type = %rule_type,
                    "Rule matched"
                );
                return Some((rule_type, config.clone()));
            }
        }

        None
    }

    /// The tracker feeding the spam rule
    #[must_use]
    pub fn tracker(&self) -> &MessageRateTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::MessageKind;

    fn event(text: &str) -> ContentEvent {
        ContentEvent::new(1, 2, 3, 4, text)
    }

    #[test]
    fn test_first_match_wins() {
        let engine = RuleEngine::new();
        let configs = vec![
            RuleConfig::new(RuleType::MentionCount, 1),
            RuleConfig::new(RuleType::InviteLink, 0),
            RuleConfig::new(RuleType::AttachmentCount, 0),
        ];

        // Matches invite, mention and attachment; invite comes first
        let hit = event("discord.gg/abc").with_mentions(5).with_attachments(2);
        let (rule_type, config) = engine.evaluate(&hit, &configs).unwrap();
        assert_eq!(rule_type, RuleType::InviteLink);
        assert_eq!(config.rule_type, RuleType::InviteLink);

        // Without the invite, mentions beat attachments
        let hit = event("hello").with_mentions(5).with_attachments(2);
        let (rule_type, _) = engine.evaluate(&hit, &configs).unwrap();
        assert_eq!(rule_type, RuleType::MentionCount);
    }

    #[test]
    fn test_unconfigured_rule_never_triggers() {
        let engine = RuleEngine::new();
        let configs = vec![RuleConfig::new(RuleType::EmbedCount, 10)];
        let hit = event("discord.gg/abc").with_mentions(50).with_attachments(50);
        assert!(engine.evaluate(&hit, &configs).is_none());
        assert!(engine.evaluate(&hit, &[]).is_none());
    }

    #[test]
    fn test_rejected_events() {
        let engine = RuleEngine::new();
        let configs = vec![RuleConfig::new(RuleType::InviteLink, 0)];

        let mut bot = event("discord.gg/abc");
        bot.author_is_bot = true;
        assert!(engine.evaluate(&bot, &configs).is_none());

        let mut system = event("discord.gg/abc");
        system.kind = MessageKind::System;
        assert!(engine.evaluate(&system, &configs).is_none());

        let dm = ContentEvent::new(1, 2, 3, None, "discord.gg/abc");
        assert!(engine.evaluate(&dm, &configs).is_none());

        let mut reply = event("discord.gg/abc");
        reply.kind = MessageKind::Reply;
        assert!(engine.evaluate(&reply, &configs).is_some());
    }

    #[test]
    fn test_spam_detection() {
        let engine = RuleEngine::new();
        let configs = vec![RuleConfig::new(RuleType::Spam, 3).with_time_limit(1)];

        for id in 0..3 {
            let message = ContentEvent::new(id, 2, 3, 4, "hi");
            assert!(engine.evaluate(&message, &configs).is_none());
        }
        let fourth = ContentEvent::new(3, 2, 3, 4, "hi");
        let (rule_type, _) = engine.evaluate(&fourth, &configs).unwrap();
        assert_eq!(rule_type, RuleType::Spam);

        // Another author is counted separately
        let other = ContentEvent::new(10, 99, 3, 4, "hi");
        assert!(engine.evaluate(&other, &configs).is_none());
    }

    #[test]
    fn test_spam_skipped_for_edits() {
        let engine = RuleEngine::new();
        let configs = vec![RuleConfig::new(RuleType::Spam, 0)];

        let edit = event("hi").edited();
        assert!(engine.evaluate(&edit, &configs).is_none());
        assert_eq!(engine.tracker().count_since(4, 2, edit.created_at - Duration::minutes(1)), 0);

        // Edits still go through content rules
        let configs = vec![
            RuleConfig::new(RuleType::Spam, 0),
            RuleConfig::new(RuleType::InviteLink, 0),
        ];
        let edit = event("discord.gg/abc").edited();
        let (rule_type, _) = engine.evaluate(&edit, &configs).unwrap();
        assert_eq!(rule_type, RuleType::InviteLink);
    }

    #[test]
    fn test_spam_window_expires() {
        let engine = RuleEngine::new();
        let configs = vec![RuleConfig::new(RuleType::Spam, 1).with_time_limit(1)];

        let mut old = ContentEvent::new(1, 2, 3, 4, "hi");
        old.created_at = Utc::now() - Duration::minutes(5);
        assert!(engine.evaluate(&old, &configs).is_none());

        let recent = ContentEvent::new(2, 2, 3, 4, "hi");
        assert!(engine.evaluate(&recent, &configs).is_none());
    }

    #[test]
    fn test_tracker_prune() {
        let tracker = MessageRateTracker::new();
        let now = Utc::now();
        tracker.record(1, 1, now - Duration::hours(2), Duration::hours(1));
        tracker.record(1, 2, now - Duration::hours(2), Duration::hours(3));
        tracker.record(1, 3, now, Duration::hours(1));
        assert_eq!(tracker.tracked_authors(), 3);

        tracker.prune(now);
        assert_eq!(tracker.tracked_authors(), 2);
        assert_eq!(tracker.count_since(1, 1, now - Duration::hours(3)), 0);
        assert_eq!(tracker.count_since(1, 2, now - Duration::hours(3)), 1);
    }

    #[test]
    fn test_periodic_prune_keeps_longer_windows() {
        let engine = RuleEngine::new();
        let long_window = vec![RuleConfig::new(RuleType::Spam, 2).with_time_limit(180)];
        let t0 = Utc::now() - Duration::minutes(120);

        let mut message = ContentEvent::new(1, 2, 3, 4, "hi");
        message.created_at = t0;
        assert!(engine.evaluate(&message, &long_window).is_none());

        // Enough traffic elsewhere to run the periodic prune with a shorter retention
        for id in 0..PRUNE_EVERY {
            let mut other = ContentEvent::new(1000 + id, 5000 + id, 3, 99, "hi");
            other.created_at = t0 + Duration::minutes(65);
            assert!(engine.evaluate(&other, &[]).is_none());
        }
        assert_eq!(engine.tracker().count_since(4, 2, t0), 1);

        message.message_id = 2;
        message.created_at = t0 + Duration::minutes(70);
        assert!(engine.evaluate(&message, &long_window).is_none());

        message.message_id = 3;
        message.created_at = t0 + Duration::minutes(100);
        let (rule_type, _) = engine.evaluate(&message, &long_window).unwrap();
        assert_eq!(rule_type, RuleType::Spam);
        assert_eq!(
            engine.tracker().count_since(4, 2, message.created_at - Duration::minutes(180)),
            3
        );
    }
}
