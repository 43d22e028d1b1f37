//! Moderation case records
//!
//! A case is the durable record of one moderation action. It also tracks the
//! lift lifecycle of a time-limited punishment.

use crate::automod::RuleType;
use crate::enforcement::{EnforcementError, EnforcementResult, PunishmentType};
use chrono::{DateTime, Duration, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Identifier used as moderator for cases created by the rule engine
pub const SYSTEM_MODERATOR_ID: u64 = 0;

/// How a case came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Default)]
pub enum CreationType {
    /// Created by a moderator
    Manual,
    /// Created by an automoderation rule
    #[default]
    Automatic,
}

/// Record of a moderation action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModCase {
    /// Unique ID of this case
    pub id: String,
    /// ID of the community (guild) the case belongs to
    pub community_id: u64,
    /// ID of the user who was punished
    pub subject_user_id: u64,
    /// ID of the moderator, `SYSTEM_MODERATOR_ID` for automatic cases
    pub moderator_id: u64,
    /// Short summary of the case
    pub title: String,
    /// Longer description
    pub description: String,
    /// Punishment attached to the case
    pub punishment_type: PunishmentType,
    /// Whether the punishment is currently in effect
    pub punishment_active: bool,
    /// When the punishment expires, `None` for permanent punishments
    pub punished_until: Option<DateTime<Utc>>,
    /// When the case was created
    pub created_at: DateTime<Utc>,
    /// How the case was created
    pub creation_type: CreationType,
    /// Content (message) that triggered the case
    pub content_ref: Option<String>,
    /// Rule that triggered the case
    pub rule_type: Option<RuleType>,
    /// The live moderation action failed and needs manual attention
    pub execution_failed: bool,
    /// Number of failed lift attempts so far
    pub lift_attempts: u32,
    /// Lifting failed too many times and needs manual attention
    pub lift_failed: bool,
    /// A lift attempt currently owns this case
    #[serde(default)]
    pub lift_in_progress: bool,
    /// When the punishment was lifted
    pub lifted_at: Option<DateTime<Utc>>,
}

impl Default for ModCase {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            community_id: 0,
            subject_user_id: 0,
            moderator_id: SYSTEM_MODERATOR_ID,
            title: String::new(),
            description: String::new(),
            punishment_type: PunishmentType::None,
            punishment_active: false,
            punished_until: None,
            created_at: Utc::now(),
            creation_type: CreationType::Automatic,
            content_ref: None,
            rule_type: None,
            execution_failed: false,
            lift_attempts: 0,
            lift_failed: false,
            lift_in_progress: false,
            lifted_at: None,
        }
    }
}

impl ModCase {
    /// Create a new case
    ///
    /// `duration` of `None` produces a permanent punishment. Only reversible
    /// punishments that are actually executed become active.
    ///
    /// # Errors
    /// Returns `EnforcementError::Config` if the expiry is not representable.
    pub fn new(
        community_id: u64,
        subject_user_id: u64,
        moderator_id: u64,
        punishment_type: PunishmentType,
        duration: Option<Duration>,
        execute: bool,
        creation_type: CreationType,
    ) -> EnforcementResult<Self> {
        let created_at = Utc::now();
        let punished_until = match duration {
            Some(duration) if punishment_type.is_reversible() => {
                Some(created_at.checked_add_signed(duration).ok_or_else(|| {
                    EnforcementError::Config(format!(
                        "Punishment of {} hours ends out of range",
                        duration.num_hours()
                    ))
                })?)
            }
            _ => None,
        };

        Ok(Self {
            community_id,
            subject_user_id,
            moderator_id,
            punishment_type,
            punishment_active: execute && punishment_type.is_reversible(),
            punished_until,
            created_at,
            creation_type,
            ..Default::default()
        })
    }

    /// Attach a title and description
    #[must_use]
    pub fn with_details(
        mut self,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.title = title.into();
        self.description = description.into();
        self
    }

    /// Attach the triggering content and rule
    #[must_use]
    pub fn with_trigger(mut self, content_ref: impl Into<String>, rule_type: RuleType) -> Self {
        self.content_ref = Some(content_ref.into());
        self.rule_type = Some(rule_type);
        self
    }

    /// Check if the punishment never expires
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.punished_until.is_none()
    }

    /// Check if this case is due to be lifted at `now`
    #[must_use]
    pub fn is_due_for_lift(&self, now: DateTime<Utc>) -> bool {
        self.punishment_active
            && !self.lift_failed
            && self.punished_until.is_some_and(|until| until <= now)
    }

    /// Mark the punishment as lifted
    ///
    /// Returns `false` without changing anything when the punishment was no
    /// longer active.
    pub fn lift(&mut self, now: DateTime<Utc>) -> bool {
        if !self.punishment_active {
            return false;
        }

        self.punishment_active = false;
        self.lift_in_progress = false;
        self.lifted_at = Some(now);

        info!(
            case_id = %self.id,
            user_id = %self.subject_user_id,
            community_id = %self.community_id,
            punishment = %self.punishment_type,
            "Punishment lifted"
        );

        true
    }

    /// Percentage of the punishment that has elapsed at `now`
    ///
    /// `None` for permanent punishments or an expiry not after creation.
    #[must_use]
    pub fn punishment_progress(&self, now: DateTime<Utc>) -> Option<f64> {
        let until = self.punished_until?;
        if until <= self.created_at {
            return None;
        }
        if until < now {
            return Some(100.0);
        }

        let total = (until - self.created_at).num_seconds() as f64;
        let elapsed = (now - self.created_at).num_seconds().max(0) as f64;
        Some(elapsed / total * 100.0)
    }
}
