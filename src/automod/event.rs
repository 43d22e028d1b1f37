//! Content events
//!
//! A content event is the platform-independent view of a message the rule
//! engine inspects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of message an event was produced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MessageKind {
    /// Regular user message
    #[default]
    Default,
    /// Reply to another message
    Reply,
    /// System message (joins, pins, boosts...)
    System,
}

impl MessageKind {
    /// Check if messages of this kind are subject to automoderation
    #[must_use]
    pub fn is_standard(self) -> bool {
        matches!(self, Self::Default | Self::Reply)
    }
}

/// A new or edited piece of content posted in a community
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEvent {
    /// ID of the message, used as the content reference
    pub message_id: u64,
    /// ID of the author
    pub author_id: u64,
    /// Whether the author is a bot
    pub author_is_bot: bool,
    /// ID of the channel the content was posted in
    pub channel_id: u64,
    /// ID of the community, `None` for direct messages
    pub community_id: Option<u64>,
    /// Kind of message
    pub kind: MessageKind,
    /// Text of the message
    pub text: String,
    /// Number of attachments
    pub attachment_count: usize,
    /// Number of embeds
    pub embed_count: usize,
    /// Number of user and role mentions
    pub mention_count: usize,
    /// Whether this event is an edit of an earlier message
    pub is_edit: bool,
    /// When the event was observed
    pub created_at: DateTime<Utc>,
}

impl ContentEvent {
    /// Create a new event for a standard, non-bot message
    pub fn new(
        message_id: u64,
        author_id: u64,
        channel_id: u64,
        community_id: impl Into<Option<u64>>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            author_id,
            author_is_bot: false,
            channel_id,
            community_id: community_id.into(),
            kind: MessageKind::Default,
            text: text.into(),
            attachment_count: 0,
            embed_count: 0,
            mention_count: 0,
            is_edit: false,
            created_at: Utc::now(),
        }
    }

    /// Set the number of mentions
    #[must_use]
    pub fn with_mentions(mut self, count: usize) -> Self {
        self.mention_count = count;
        self
    }

    /// Set the number of attachments
    #[must_use]
    pub fn with_attachments(mut self, count: usize) -> Self {
        self.attachment_count = count;
        self
    }

    /// Set the number of embeds
    #[must_use]
    pub fn with_embeds(mut self, count: usize) -> Self {
        self.embed_count = count;
        self
    }

    /// Mark the event as an edit
    #[must_use]
    pub fn edited(mut self) -> Self {
        self.is_edit = true;
        self
    }

    /// Reference used to deduplicate cases for this content
    #[must_use]
    pub fn content_ref(&self) -> String {
        self.message_id.to_string()
    }
}
