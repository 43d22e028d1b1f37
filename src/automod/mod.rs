//! Automoderation for Vigilant Daemon
//!
//! Content events are checked against each community's rules in a fixed order.
//! The first matching rule that the author is not exempt from produces a case.

mod engine;
mod event;
mod moderator;
mod protection;
mod rules;

pub use engine::{MessageRateTracker, RuleEngine};
pub use event::{ContentEvent, MessageKind};
pub use moderator::AutoModerator;
#[cfg(test)]
pub use protection::MockMemberDirectory;
pub use protection::{MemberDirectory, ProtectionFilter, SerenityMemberDirectory};
pub use rules::{RULE_ORDER, RuleType, WordFilter, contains_invite, count_emotes};
