//! Automoderation rules
//!
//! Every rule is a pure predicate over a content event and the community's
//! configuration for that rule. The order in which rules are checked is fixed
//! by `RULE_ORDER`.

use crate::automod::ContentEvent;
use crate::config::RuleConfig;
use derive_more::Display;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

static INVITE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:https?://)?(?:www\.)?(?:discord\.gg|discord(?:app)?\.com/invite|discord\.me|discord\.io)/[a-z0-9-]+",
    )
    .expect("invite pattern is valid")
});

static CUSTOM_EMOTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a?:\w{2,32}:\d{15,21}>").expect("emote pattern is valid"));

/// Kind of automoderation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum RuleType {
    /// Message contains an invite to another community
    InviteLink,
    /// Too many emotes in one message
    EmoteCount,
    /// Too many mentions in one message
    MentionCount,
    /// Too many attachments in one message
    AttachmentCount,
    /// Too many embeds in one message
    EmbedCount,
    /// Message matches the community's banned words
    CustomWord,
    /// Too many messages in a short time
    Spam,
    /// Too many automoderation cases in a short time
    RepeatOffender,
}

/// Order in which content rules are evaluated; the first match wins
pub const RULE_ORDER: [RuleType; 7] = [
    RuleType::InviteLink,
    RuleType::EmoteCount,
    RuleType::MentionCount,
    RuleType::AttachmentCount,
    RuleType::EmbedCount,
    RuleType::CustomWord,
    RuleType::Spam,
];

impl RuleType {
    /// Rate-based rules are not re-evaluated when a message is edited
    #[must_use]
    pub fn skipped_on_edit(self) -> bool {
        matches!(self, Self::Spam)
    }

    /// Evaluate this rule
    ///
    /// `recent_messages` is the number of messages the author sent in the
    /// rule's window, including this one; only the spam rule reads it.
    #[must_use]
    pub fn matches(
        self,
        event: &ContentEvent,
        config: &RuleConfig,
        recent_messages: usize,
    ) -> bool {
        let limit = config.limit as usize;
        match self {
            Self::InviteLink => contains_invite(&event.text),
            Self::EmoteCount => count_emotes(&event.text) > limit,
            Self::MentionCount => event.mention_count > limit,
            Self::AttachmentCount => event.attachment_count > limit,
            Self::EmbedCount => event.embed_count > limit,
            Self::CustomWord => config
                .word_filter()
                .is_some_and(|filter| filter.count(&event.text) > limit),
            Self::Spam => recent_messages > limit,
            // Escalation is driven by case history, not by content
            Self::RepeatOffender => false,
        }
    }
}

/// Check if the text links to a Discord invite
#[must_use]
pub fn contains_invite(text: &str) -> bool {
    INVITE_REGEX.is_match(text)
}

/// Count custom emotes and unicode pictographs in the text
#[must_use]
pub fn count_emotes(text: &str) -> usize {
    let custom = CUSTOM_EMOTE_REGEX.find_iter(text).count();
    let stripped = CUSTOM_EMOTE_REGEX.replace_all(text, "");
    let unicode = stripped.chars().filter(|c| is_pictograph(*c)).count();
    custom + unicode
}

fn is_pictograph(c: char) -> bool {
    matches!(
        u32::from(c),
        0x1F300..=0x1F5FF // symbols and pictographs
            | 0x1F600..=0x1F64F // emoticons
            | 0x1F680..=0x1F6FF // transport and map
            | 0x1F900..=0x1F9FF // supplemental symbols
            | 0x1FA70..=0x1FAFF // extended pictographs
            | 0x2600..=0x26FF // miscellaneous symbols
            | 0x2700..=0x27BF // dingbats
    )
}

/// Compiled list of custom words or patterns
///
/// Matching is case-insensitive. Lines that are not valid regular
/// expressions are matched literally.
#[derive(Debug, Clone)]
pub struct WordFilter {
    source: String,
    patterns: Vec<Regex>,
}

impl WordFilter {
    /// Compile a newline-separated filter, skipping blank lines
    #[must_use]
    pub fn compile(source: &str) -> Self {
        let patterns = source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(compile_word_pattern)
            .collect();
        Self {
            source: source.to_string(),
            patterns,
        }
    }

    /// Total number of matches in the text
    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        self.patterns
            .iter()
            .map(|pattern| pattern.find_iter(text).count())
            .sum()
    }

    /// The filter text this was compiled from
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for WordFilter {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

fn compile_word_pattern(line: &str) -> Option<Regex> {
    match RegexBuilder::new(line).case_insensitive(true).build() {
        Ok(pattern) => Some(pattern),
        Err(e) => {
            warn!("Custom word {line:?} is not a valid pattern, matching literally: {e}");
            RegexBuilder::new(&regex::escape(line))
                .case_insensitive(true)
                .build()
                .ok()
        }
    }
}
