use crate::EVENT_TARGET;
use crate::automod::{AutoModerator, ContentEvent, MessageKind};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, Message, MessageType, MessageUpdateEvent,
    Ready,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Handler {
    moderator: Arc<AutoModerator>,
}

impl Handler {
    #[must_use]
    pub fn new(moderator: Arc<AutoModerator>) -> Self {
        Self { moderator }
    }

    async fn moderate(&self, event: ContentEvent) {
        match self.moderator.handle_event(&event).await {
            Ok(Some(case)) => debug!(
                target: EVENT_TARGET,
                case_id = %case.id,
                message_id = event.message_id,
                "Message produced a case"
            ),
            Ok(None) => {}
            Err(e) => error!(
                target: EVENT_TARGET,
                message_id = event.message_id,
                "Automoderation failed: {e}"
            ),
        }
    }
}

fn message_kind(kind: MessageType) -> MessageKind {
    match kind {
        MessageType::Regular => MessageKind::Default,
        MessageType::InlineReply => MessageKind::Reply,
        _ => MessageKind::System,
    }
}

/// Build the platform-independent view of a Discord message
#[must_use]
pub fn content_event_from_message(message: &Message, is_edit: bool) -> ContentEvent {
    let created_at = if is_edit {
        Utc::now()
    } else {
        DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
    };

    ContentEvent {
        message_id: message.id.get(),
        author_id: message.author.id.get(),
        author_is_bot: message.author.bot,
        channel_id: message.channel_id.get(),
        community_id: message.guild_id.map(GuildId::get),
        kind: message_kind(message.kind),
        text: message.content.clone(),
        attachment_count: message.attachments.len(),
        embed_count: message.embeds.len(),
        mention_count: message.mentions.len()
            + message.mention_roles.len()
            + usize::from(message.mention_everyone),
        is_edit,
        created_at,
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn message(&self, _ctx: Context, new_message: Message) {
        self.moderate(content_event_from_message(&new_message, false))
            .await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        // Edits that don't touch the text (embed unfurls) are not re-checked
        if event.content.is_none() {
            return;
        }

        let message = match new {
            Some(message) => message,
            None => match event.channel_id.message(&ctx, event.id).await {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        target: EVENT_TARGET,
                        message_id = event.id.get(),
                        "Could not fetch edited message: {e}"
                    );
                    return;
                }
            },
        };

        let mut content = content_event_from_message(&message, true);
        // Fetched messages don't carry the guild
        if content.community_id.is_none() {
            content.community_id = event.guild_id.map(GuildId::get);
        }
        self.moderate(content).await;
    }
}
