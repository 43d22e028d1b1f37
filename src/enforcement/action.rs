//! Punishment types
//!
//! This module defines the punishments an automoderation rule can carry and
//! which of them have a live effect that has to be lifted later.

use crate::enforcement::{EnforcementError, EnforcementResult};
use chrono::Duration;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Longest timeout Discord accepts for a member
pub const MAX_TIMEOUT_DAYS: i64 = 28;

/// Longest punishment a rule may configure, one hundred years in hours
pub const MAX_PUNISHMENT_HOURS: u64 = 100 * 365 * 24;

/// Type of punishment attached to a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Default)]
pub enum PunishmentType {
    /// Server kick
    Kick,
    /// Communication timeout
    Mute,
    /// Server ban
    Ban,
    /// Recorded warning, no live effect
    Warn,
    /// No punishment
    #[default]
    None,
}

impl PunishmentType {
    /// Check if this punishment has a live effect that can be reversed
    #[must_use]
    pub fn is_reversible(self) -> bool {
        matches!(self, Self::Mute | Self::Ban)
    }

    /// Check if this punishment needs a call to the moderation API at all
    #[must_use]
    pub fn has_live_action(self) -> bool {
        matches!(self, Self::Mute | Self::Ban | Self::Kick)
    }

    /// How long the punishment lasts, given a configured duration in hours
    ///
    /// Zero hours means permanent. Punishments without a live effect never
    /// expire because there is nothing to lift.
    ///
    /// # Errors
    /// Returns `EnforcementError::Config` if `hours` exceeds
    /// `MAX_PUNISHMENT_HOURS`.
    pub fn duration_for_hours(self, hours: u64) -> EnforcementResult<Option<Duration>> {
        if hours > MAX_PUNISHMENT_HOURS {
            return Err(EnforcementError::Config(format!(
                "Punishment duration of {hours} hours exceeds {MAX_PUNISHMENT_HOURS} hours"
            )));
        }
        if !self.is_reversible() || hours == 0 {
            return Ok(None);
        }
        let hours = i64::try_from(hours)
            .map_err(|e| EnforcementError::Config(format!("Invalid punishment duration: {e}")))?;
        Ok(Some(Duration::hours(hours)))
    }
}
