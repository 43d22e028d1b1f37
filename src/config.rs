//! Configuration
//!
//! Process-wide settings (`AppConfig`), per-community settings
//! (`CommunityConfig` and `RuleConfig`) and the stores the automoderator reads
//! them from.

use crate::automod::{RuleType, WordFilter};
use crate::enforcement::{EnforcementError, EnforcementResult, PunishmentType};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default location of the process configuration file
pub const CONFIG_FILE: &str = "config/vigilant.yaml";

/// Per-rule configuration for one community
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule this configuration enables
    pub rule_type: RuleType,
    /// Threshold the counted value must exceed to trigger
    #[serde(default)]
    pub limit: u32,
    /// Window for rate-based rules, in minutes
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
    /// Words or regular expressions, one per line
    #[serde(default)]
    pub custom_word_filter: Option<String>,
    /// Roles that bypass this rule
    #[serde(default)]
    pub ignore_roles: Vec<u64>,
    /// Channels where this rule is not enforced
    #[serde(default)]
    pub ignore_channels: Vec<u64>,
    /// Punishment applied when the rule triggers
    #[serde(default)]
    pub punishment_type: PunishmentType,
    /// Punishment length in hours, 0 for permanent
    #[serde(default)]
    pub punishment_duration_hours: u64,
    /// Whether to carry out the punishment or only record it
    #[serde(default = "default_true")]
    pub execute_punishment: bool,
    /// Whether to delete the offending message
    #[serde(default)]
    pub delete_message: bool,
    /// Compiled form of `custom_word_filter`
    #[serde(skip)]
    compiled_filter: Option<Arc<WordFilter>>,
}

fn default_true() -> bool {
    true
}

impl RuleConfig {
    /// Create a rule configuration with a threshold and no punishment
    #[must_use]
    pub fn new(rule_type: RuleType, limit: u32) -> Self {
        Self {
            rule_type,
            limit,
            time_limit_minutes: None,
            custom_word_filter: None,
            ignore_roles: Vec::new(),
            ignore_channels: Vec::new(),
            punishment_type: PunishmentType::None,
            punishment_duration_hours: 0,
            execute_punishment: true,
            delete_message: false,
            compiled_filter: None,
        }
    }

    /// Set the punishment and its length in hours
    #[must_use]
    pub fn with_punishment(mut self, punishment_type: PunishmentType, hours: u64) -> Self {
        self.punishment_type = punishment_type;
        self.punishment_duration_hours = hours;
        self
    }

    /// Set the window for rate-based rules
    #[must_use]
    pub fn with_time_limit(mut self, minutes: u32) -> Self {
        self.time_limit_minutes = Some(minutes);
        self
    }

    /// Set the custom word filter
    #[must_use]
    pub fn with_word_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.compiled_filter = Some(Arc::new(WordFilter::compile(&filter)));
        self.custom_word_filter = Some(filter);
        self
    }

    /// Exempt roles from this rule
    #[must_use]
    pub fn ignoring_roles(mut self, roles: impl IntoIterator<Item = u64>) -> Self {
        self.ignore_roles.extend(roles);
        self
    }

    /// Exempt channels from this rule
    #[must_use]
    pub fn ignoring_channels(mut self, channels: impl IntoIterator<Item = u64>) -> Self {
        self.ignore_channels.extend(channels);
        self
    }

    /// The custom word filter, compiled
    ///
    /// Configurations that went through `prepare` reuse their compiled
    /// filter; others compile it on each call.
    #[must_use]
    pub fn word_filter(&self) -> Option<Arc<WordFilter>> {
        let source = self.custom_word_filter.as_deref()?;
        match &self.compiled_filter {
            Some(compiled) if compiled.source() == source => Some(Arc::clone(compiled)),
            _ => Some(Arc::new(WordFilter::compile(source))),
        }
    }

    /// Validate the configuration and compile its word filter
    ///
    /// # Errors
    /// Returns `EnforcementError::Config` if the punishment duration exceeds
    /// `MAX_PUNISHMENT_HOURS`.
    pub fn prepare(mut self) -> EnforcementResult<Self> {
        self.punishment_type
            .duration_for_hours(self.punishment_duration_hours)?;
        self.compiled_filter = self.word_filter();
        Ok(self)
    }

    /// Window for rate-based rules, defaulting to one minute
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.time_limit_minutes.unwrap_or(1).max(1)))
    }
}

/// Community-wide moderation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// ID of the community
    pub community_id: u64,
    /// Roles whose holders moderate the community
    #[serde(default)]
    pub moderator_roles: Vec<u64>,
    /// Roles whose holders administer the community
    #[serde(default)]
    pub admin_roles: Vec<u64>,
}

impl CommunityConfig {
    /// Check if any of `roles` is a moderator or administrator role
    #[must_use]
    pub fn is_privileged(&self, roles: &[u64]) -> bool {
        roles
            .iter()
            .any(|role| self.moderator_roles.contains(role) || self.admin_roles.contains(role))
    }
}

/// One community configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityDocument {
    #[serde(flatten)]
    pub community: CommunityConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Read-only source of community and rule configuration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Get the configuration of a community, `None` if it is not registered
    async fn community_config(
        &self,
        community_id: u64,
    ) -> EnforcementResult<Option<CommunityConfig>>;

    /// Get the rule configurations of a community
    async fn rule_configs(&self, community_id: u64) -> EnforcementResult<Vec<RuleConfig>>;
}

/// Configuration store held in memory
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    communities: Arc<DashMap<u64, CommunityConfig>>,
    rules: Arc<DashMap<u64, Vec<RuleConfig>>>,
}

impl MemoryConfigStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a community and its rules
    ///
    /// Invalid rule configurations are logged and left out.
    pub fn insert(&self, community: CommunityConfig, rules: Vec<RuleConfig>) {
        let community_id = community.community_id;
        let mut deduplicated: Vec<RuleConfig> = Vec::with_capacity(rules.len());
        for rule in rules {
            let rule = match rule.prepare() {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(community_id, "Rule configuration rejected: {e}");
                    continue;
                }
            };
            if deduplicated.iter().any(|r| r.rule_type == rule.rule_type) {
                warn!(
                    community_id,
                    rule_type = %rule.rule_type,
                    "Duplicate rule configuration ignored"
                );
                continue;
            }
            deduplicated.push(rule);
        }
        self.communities.insert(community_id, community);
        self.rules.insert(community_id, deduplicated);
    }

    /// Number of registered communities
    #[must_use]
    pub fn len(&self) -> usize {
        self.communities.len()
    }

    /// Check if no community is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    /// Load every community document matching a glob pattern
    ///
    /// Unreadable files are logged and skipped so one bad file does not take
    /// every community offline.
    ///
    /// # Errors
    /// Returns an error if the pattern itself is invalid.
    pub async fn load_glob(pattern: &str) -> EnforcementResult<Self> {
        let store = Self::new();
        let paths = glob::glob(pattern)
            .map_err(|e| EnforcementError::Config(format!("Invalid pattern {pattern}: {e}")))?;

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable config path: {e}");
                    continue;
                }
            };
            match Self::read_document(&path).await {
                Ok(document) => {
                    debug!(
                        community_id = document.community.community_id,
                        rules = document.rules.len(),
                        "Loaded community config from {}",
                        path.display()
                    );
                    store.insert(document.community, document.rules);
                }
                Err(e) => warn!("Skipping community config {}: {e}", path.display()),
            }
        }

        info!("Loaded {} community configurations", store.len());
        Ok(store)
    }

    async fn read_document(path: &Path) -> EnforcementResult<CommunityDocument> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_yaml::from_str(&content)
            .map_err(|e| EnforcementError::Config(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn community_config(
        &self,
        community_id: u64,
    ) -> EnforcementResult<Option<CommunityConfig>> {
        Ok(self.communities.get(&community_id).map(|e| e.value().clone()))
    }

    async fn rule_configs(&self, community_id: u64) -> EnforcementResult<Vec<RuleConfig>> {
        Ok(self
            .rules
            .get(&community_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[derive(Clone)]
struct CachedCommunity {
    fetched_at: Instant,
    community: Option<CommunityConfig>,
    rules: Vec<RuleConfig>,
}

/// Configuration store that caches another store's snapshots for a fixed TTL
pub struct CachedConfigStore<S: ConfigStore> {
    inner: S,
    ttl: Duration,
    cache: DashMap<u64, CachedCommunity>,
}

impl<S: ConfigStore> CachedConfigStore<S> {
    /// Wrap a store with a cache entry lifetime of `ttl`
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Drop the cached snapshot of a community
    pub fn invalidate(&self, community_id: u64) {
        self.cache.remove(&community_id);
    }

    async fn snapshot(&self, community_id: u64) -> EnforcementResult<CachedCommunity> {
        if let Some(entry) = self.cache.get(&community_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value().clone());
            }
        }

        let snapshot = CachedCommunity {
            fetched_at: Instant::now(),
            community: self.inner.community_config(community_id).await?,
            rules: self.inner.rule_configs(community_id).await?,
        };
        self.cache.insert(community_id, snapshot.clone());
        Ok(snapshot)
    }
}

#[async_trait]
impl<S: ConfigStore> ConfigStore for CachedConfigStore<S> {
    async fn community_config(
        &self,
        community_id: u64,
    ) -> EnforcementResult<Option<CommunityConfig>> {
        Ok(self.snapshot(community_id).await?.community)
    }

    async fn rule_configs(&self, community_id: u64) -> EnforcementResult<Vec<RuleConfig>> {
        Ok(self.snapshot(community_id).await?.rules)
    }
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Users exempt from automoderation everywhere
    pub site_admins: Vec<u64>,
    /// Seconds between expiry sweeps
    pub sweep_interval_secs: u64,
    /// Failed lift attempts before a case needs manual intervention
    pub max_lift_attempts: u32,
    /// Timeout for member role lookups, in milliseconds
    pub membership_timeout_ms: u64,
    /// How long community configuration is cached, in seconds
    pub config_cache_ttl_secs: u64,
    /// Global switch for live punishments; cases are recorded either way
    pub execute_punishments: bool,
    /// Glob pattern of community configuration files
    pub communities_glob: String,
    /// Path of the case snapshot file
    pub case_snapshot: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site_admins: Vec::new(),
            sweep_interval_secs: 60,
            max_lift_attempts: 5,
            membership_timeout_ms: 2000,
            config_cache_ttl_secs: 300,
            execute_punishments: true,
            communities_glob: "config/communities/*.yaml".to_string(),
            case_snapshot: "data/cases.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the configuration file and apply environment overrides
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but is not valid YAML, or an
    /// override cannot be parsed.
    pub async fn load(path: impl AsRef<Path>) -> EnforcementResult<Self> {
        let path = path.as_ref();
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_yaml::from_str(&content)
                .map_err(|e| EnforcementError::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.apply_overrides(
            std::env::var("VIGILANT_SITE_ADMINS").ok().as_deref(),
            std::env::var("VIGILANT_SWEEP_INTERVAL").ok().as_deref(),
        )?;
        Ok(config)
    }

    /// Apply override values taken from the environment
    ///
    /// # Errors
    /// Returns an error if a value is not a number.
    pub fn apply_overrides(
        &mut self,
        site_admins: Option<&str>,
        sweep_interval: Option<&str>,
    ) -> EnforcementResult<()> {
        if let Some(admins) = site_admins {
            self.site_admins = admins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>().map_err(|e| {
                        EnforcementError::Config(format!("Invalid site admin id {s:?}: {e}"))
                    })
                })
                .collect::<EnforcementResult<_>>()?;
        }
        if let Some(interval) = sweep_interval {
            self.sweep_interval_secs = interval.trim().parse().map_err(|e| {
                EnforcementError::Config(format!("Invalid sweep interval {interval:?}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Interval between expiry sweeps
    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Timeout for member role lookups
    #[must_use]
    pub fn membership_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.membership_timeout_ms)
    }

    /// Lifetime of cached community configuration
    #[must_use]
    pub fn config_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config_cache_ttl_secs)
    }
}
