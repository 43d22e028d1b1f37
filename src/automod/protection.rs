//! Protection filter
//!
//! Decides whether a matched rule is waived for the author or channel of an
//! event.

use crate::automod::ContentEvent;
use crate::config::{CommunityConfig, RuleConfig};
use crate::enforcement::{EnforcementError, EnforcementResult};
use crate::AUTOMOD_TARGET;
use async_trait::async_trait;
use serenity::all::{GuildId, Http, UserId};
use serenity::http::HttpError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Source of community membership information
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Role IDs the user holds in the community, `None` if not a member
    async fn member_roles(&self, community_id: u64, user_id: u64)
    -> EnforcementResult<Option<Vec<u64>>>;
}

/// Member directory backed by the Discord HTTP API
#[derive(Clone)]
pub struct SerenityMemberDirectory {
    http: Arc<Http>,
}

impl SerenityMemberDirectory {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MemberDirectory for SerenityMemberDirectory {
    async fn member_roles(
        &self,
        community_id: u64,
        user_id: u64,
    ) -> EnforcementResult<Option<Vec<u64>>> {
        match GuildId::new(community_id)
            .member(self.http.as_ref(), UserId::new(user_id))
            .await
        {
            Ok(member) => Ok(Some(member.roles.iter().map(|role| role.get()).collect())),
            Err(serenity::Error::Http(HttpError::UnsuccessfulRequest(response)))
                if response.status_code.as_u16() == 404 =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Decides whether an author or channel is exempt from a rule
pub struct ProtectionFilter {
    site_admins: HashSet<u64>,
    directory: Arc<dyn MemberDirectory>,
    lookup_timeout: Duration,
}

impl ProtectionFilter {
    pub fn new(
        site_admins: impl IntoIterator<Item = u64>,
        directory: Arc<dyn MemberDirectory>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            site_admins: site_admins.into_iter().collect(),
            directory,
            lookup_timeout,
        }
    }

    /// Check if the event is exempt from the matched rule
    ///
    /// Site admins and exempt channels are decided without a lookup. When the
    /// member lookup fails or times out the author is treated as not exempt.
    pub async fn is_exempt(
        &self,
        event: &ContentEvent,
        rule: &RuleConfig,
        community: &CommunityConfig,
    ) -> bool {
        if self.site_admins.contains(&event.author_id) {
            debug!(target: AUTOMOD_TARGET, user_id = event.author_id, "Author is a site admin");
            return true;
        }

        if rule.ignore_channels.contains(&event.channel_id) {
            debug!(
                target: AUTOMOD_TARGET,
                channel_id = event.channel_id,
                rule_type = %rule.rule_type,
                "Channel is exempt from rule"
            );
            return true;
        }

        if rule.ignore_roles.is_empty()
            && community.moderator_roles.is_empty()
            && community.admin_roles.is_empty()
        {
            return false;
        }

        let roles = match self.lookup_roles(community.community_id, event.author_id).await {
            Ok(Some(roles)) => roles,
            Ok(None) => return false,
            Err(e) => {
                warn!(
                    target: AUTOMOD_TARGET,
                    community_id = community.community_id,
                    user_id = event.author_id,
                    "Member lookup failed, treating author as not exempt: {e}"
                );
                return false;
            }
        };

        if community.is_privileged(&roles) {
            debug!(target: AUTOMOD_TARGET, user_id = event.author_id, "Author is a moderator");
            return true;
        }

        roles.iter().any(|role| rule.ignore_roles.contains(role))
    }

    async fn lookup_roles(
        &self,
        community_id: u64,
        user_id: u64,
    ) -> EnforcementResult<Option<Vec<u64>>> {
        tokio::time::timeout(
            self.lookup_timeout,
            self.directory.member_roles(community_id, user_id),
        )
        .await
        .map_err(|_| EnforcementError::LookupTimeout(self.lookup_timeout.as_millis() as u64))?
    }
}
