//! Moderation action handlers
//!
//! This module defines the contract for applying and reversing punishments on
//! the hosting platform, and its implementation on top of the Discord HTTP API.

use crate::enforcement::{EnforcementError, EnforcementResult, MAX_TIMEOUT_DAYS, PunishmentType};
use async_trait::async_trait;
use chrono::Duration;
use serenity::all::{ChannelId, EditMember, GuildId, Http, MessageId, Timestamp, UserId};
use std::sync::Arc;
use tracing::{info, warn};

/// Trait for carrying out punishments on the hosting platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModerationAction: Send + Sync {
    /// Apply a punishment; `duration` of `None` means permanent
    async fn apply(
        &self,
        community_id: u64,
        user_id: u64,
        punishment: PunishmentType,
        duration: Option<Duration>,
    ) -> EnforcementResult<()>;

    /// Reverse a punishment
    async fn reverse(
        &self,
        community_id: u64,
        user_id: u64,
        punishment: PunishmentType,
    ) -> EnforcementResult<()>;

    /// Delete the content that triggered a rule
    async fn delete_content(&self, channel_id: u64, message_id: u64) -> EnforcementResult<()>;
}

/// Moderation actions executed through the Discord HTTP API
#[derive(Clone)]
pub struct SerenityModerationAction {
    http: Arc<Http>,
}

impl SerenityModerationAction {
    /// Create a new handler using the given HTTP client
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn http(&self) -> &Http {
        &self.http
    }

    /// Timeout end for a mute, clamped to what Discord accepts
    fn timeout_until(duration: Option<Duration>) -> EnforcementResult<Timestamp> {
        let max = Duration::days(MAX_TIMEOUT_DAYS);
        let duration = match duration {
            Some(duration) if duration <= max => duration,
            requested => {
                warn!(
                    requested_hours = ?requested.map(|d| d.num_hours()),
                    "Mute longer than the platform limit, clamping to {MAX_TIMEOUT_DAYS} days"
                );
                max
            }
        };

        let until = chrono::Utc::now() + duration;
        Timestamp::from_unix_timestamp(until.timestamp())
            .map_err(|e| EnforcementError::ActionFailed(format!("Invalid timeout timestamp: {e}")))
    }
}

#[async_trait]
impl ModerationAction for SerenityModerationAction {
    async fn apply(
        &self,
        community_id: u64,
        user_id: u64,
        punishment: PunishmentType,
        duration: Option<Duration>,
    ) -> EnforcementResult<()> {
        let guild_id = GuildId::new(community_id);
        let user = UserId::new(user_id);

        match punishment {
            PunishmentType::Ban => {
                info!("Banning user {user_id} in guild {community_id}");
                guild_id
                    .ban_with_reason(self.http(), user, 0, "Automoderation")
                    .await?;
            }
            PunishmentType::Kick => {
                info!("Kicking user {user_id} from guild {community_id}");
                guild_id
                    .kick_with_reason(self.http(), user, "Automoderation")
                    .await?;
            }
            PunishmentType::Mute => {
                let until = Self::timeout_until(duration)?;
                info!("Muting user {user_id} in guild {community_id} until {until}");
                guild_id
                    .edit_member(
                        self.http(),
                        user,
                        EditMember::new().disable_communication_until_datetime(until),
                    )
                    .await?;
            }
            PunishmentType::Warn | PunishmentType::None => {
                info!("No live action for {punishment} on user {user_id} in guild {community_id}");
            }
        }

        Ok(())
    }

    async fn reverse(
        &self,
        community_id: u64,
        user_id: u64,
        punishment: PunishmentType,
    ) -> EnforcementResult<()> {
        let guild_id = GuildId::new(community_id);
        let user = UserId::new(user_id);

        match punishment {
            PunishmentType::Ban => {
                info!("Unbanning user {user_id} in guild {community_id}");
                guild_id.unban(self.http(), user).await?;
            }
            PunishmentType::Mute => {
                info!("Removing timeout from user {user_id} in guild {community_id}");
                if let Err(e) = guild_id
                    .edit_member(self.http(), user, EditMember::new().enable_communication())
                    .await
                {
                    // The member may have left; the timeout is gone with them
                    if guild_id.member(self.http(), user).await.is_err() {
                        warn!("User {user_id} not found in guild {community_id} for mute reversal");
                        return Ok(());
                    }
                    return Err(e.into());
                }
            }
            PunishmentType::Kick | PunishmentType::Warn | PunishmentType::None => {
                info!(
                    "{punishment} doesn't need reversal for user {user_id} in guild {community_id}"
                );
            }
        }

        Ok(())
    }

    async fn delete_content(&self, channel_id: u64, message_id: u64) -> EnforcementResult<()> {
        ChannelId::new(channel_id)
            .delete_message(self.http(), MessageId::new(message_id))
            .await?;
        Ok(())
    }
}
