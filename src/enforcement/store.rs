//! Case store
//!
//! This module defines the repository contract the core uses to persist cases
//! and an in-memory implementation backed by concurrent maps with YAML
//! snapshots.

use crate::automod::RuleType;
use crate::enforcement::{CreationType, EnforcementError, EnforcementResult, ModCase};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Repository contract for moderation cases
///
/// Implementations must make `create` reject a second case for the same
/// (community, content reference, rule) and make `begin_lift` and
/// `update_active_flag` atomic per case.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Persist a new case
    ///
    /// # Errors
    /// Returns `EnforcementError::DuplicateTrigger` if a case already references
    /// the same content and rule in the same community.
    async fn create(&self, case: ModCase) -> EnforcementResult<ModCase>;

    /// Get a case by ID
    async fn get(&self, case_id: &str) -> EnforcementResult<Option<ModCase>>;

    /// Find the case created for a piece of content by a rule
    async fn find_by_reference(
        &self,
        community_id: u64,
        content_ref: &str,
        rule_type: RuleType,
    ) -> EnforcementResult<Option<ModCase>>;

    /// Find active, time-limited punishments that expired at or before `now`
    async fn find_due_punishments(&self, now: DateTime<Utc>) -> EnforcementResult<Vec<ModCase>>;

    /// Set the active flag of a case
    ///
    /// Deactivating is guarded by "still active": returns `false` when the case
    /// was already inactive and nothing was written.
    async fn update_active_flag(&self, case_id: &str, active: bool) -> EnforcementResult<bool>;

    /// Claim a case for a lift attempt
    ///
    /// Returns `false` if the case is inactive or another attempt holds it.
    async fn begin_lift(&self, case_id: &str) -> EnforcementResult<bool>;

    /// Release a claimed case without counting an attempt
    async fn release_lift(&self, case_id: &str) -> EnforcementResult<()>;

    /// Release a claimed case after a failed lift, counting the attempt
    ///
    /// Once `max_attempts` is reached the case is flagged as a persistent
    /// failure and no longer returned by `find_due_punishments`.
    async fn record_lift_failure(&self, case_id: &str, max_attempts: u32)
    -> EnforcementResult<ModCase>;

    /// Flag a case whose live action could not be executed
    async fn mark_execution_failed(&self, case_id: &str) -> EnforcementResult<()>;

    /// Automatic cases for a user created at or after `since`
    async fn find_automatic_since(
        &self,
        community_id: u64,
        user_id: u64,
        since: DateTime<Utc>,
    ) -> EnforcementResult<Vec<ModCase>>;

    /// Cases whose lift was given up and need manual intervention
    async fn find_failed_lifts(&self) -> EnforcementResult<Vec<ModCase>>;
}

type ReferenceKey = (u64, String, RuleType);

/// In-memory store for case records
#[derive(Clone, Default)]
pub struct MemoryCaseStore {
    /// All cases by ID
    records: Arc<DashMap<String, ModCase>>,
    /// Unique index of (community, content reference, rule) to case ID
    references: Arc<DashMap<ReferenceKey, String>>,
}

impl MemoryCaseStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored cases
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store holds no cases
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get all cases
    #[must_use]
    pub fn get_all(&self) -> Vec<ModCase> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    fn reference_key(case: &ModCase) -> Option<ReferenceKey> {
        match (&case.content_ref, case.rule_type) {
            (Some(content_ref), Some(rule_type)) => {
                Some((case.community_id, content_ref.clone(), rule_type))
            }
            _ => None,
        }
    }

    fn insert_unindexed(&self, case: ModCase) {
        self.records.insert(case.id.clone(), case);
    }

    /// Load cases from a YAML snapshot
    ///
    /// A missing file yields an empty store. Lift claims are not restored, a
    /// claim cannot outlive the process that held it.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> EnforcementResult<Self> {
        let store = Self::new();
        let path = path.as_ref();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No case snapshot at {}, starting empty", path.display());
                return Ok(store);
            }
            Err(e) => return Err(e.into()),
        };

        let cases: Vec<ModCase> = serde_yaml::from_str(&content)?;
        for mut case in cases {
            case.lift_in_progress = false;
            if let Some(key) = Self::reference_key(&case) {
                store.references.insert(key, case.id.clone());
            }
            store.insert_unindexed(case);
        }

        info!("Loaded {} cases from {}", store.len(), path.display());
        Ok(store)
    }

    /// Save all cases to a YAML snapshot
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub async fn save(&self, path: impl AsRef<Path>) -> EnforcementResult<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let mut cases = self.get_all();
        cases.sort_by_key(|case| case.created_at);
        let yaml = serde_yaml::to_string(&cases)?;
        tokio::fs::write(path, yaml).await?;

        debug!("Saved {} cases to {}", cases.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn create(&self, case: ModCase) -> EnforcementResult<ModCase> {
        let Some(key) = Self::reference_key(&case) else {
            self.insert_unindexed(case.clone());
            return Ok(case);
        };

        match self.references.entry(key) {
            Entry::Occupied(entry) => {
                let (community_id, content_ref, _) = entry.key().clone();
                Err(EnforcementError::DuplicateTrigger {
                    community_id,
                    content_ref,
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(case.id.clone());
                self.insert_unindexed(case.clone());
                Ok(case)
            }
        }
    }

    async fn get(&self, case_id: &str) -> EnforcementResult<Option<ModCase>> {
        Ok(self.records.get(case_id).map(|e| e.value().clone()))
    }

    async fn find_by_reference(
        &self,
        community_id: u64,
        content_ref: &str,
        rule_type: RuleType,
    ) -> EnforcementResult<Option<ModCase>> {
        let key = (community_id, content_ref.to_string(), rule_type);
        let Some(case_id) = self.references.get(&key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        self.get(&case_id).await
    }

    async fn find_due_punishments(&self, now: DateTime<Utc>) -> EnforcementResult<Vec<ModCase>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().is_due_for_lift(now))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_active_flag(&self, case_id: &str, active: bool) -> EnforcementResult<bool> {
        let mut case = self
            .records
            .get_mut(case_id)
            .ok_or_else(|| EnforcementError::NotFound(case_id.to_string()))?;

        if active {
            let changed = !case.punishment_active;
            case.punishment_active = true;
            case.lifted_at = None;
            return Ok(changed);
        }

        Ok(case.lift(Utc::now()))
    }

    async fn begin_lift(&self, case_id: &str) -> EnforcementResult<bool> {
        let mut case = self
            .records
            .get_mut(case_id)
            .ok_or_else(|| EnforcementError::NotFound(case_id.to_string()))?;

        if !case.punishment_active || case.lift_in_progress || case.lift_failed {
            return Ok(false);
        }
        case.lift_in_progress = true;
        Ok(true)
    }

    async fn release_lift(&self, case_id: &str) -> EnforcementResult<()> {
        let mut case = self
            .records
            .get_mut(case_id)
            .ok_or_else(|| EnforcementError::NotFound(case_id.to_string()))?;
        case.lift_in_progress = false;
        Ok(())
    }

    async fn record_lift_failure(
        &self,
        case_id: &str,
        max_attempts: u32,
    ) -> EnforcementResult<ModCase> {
        let mut case = self
            .records
            .get_mut(case_id)
            .ok_or_else(|| EnforcementError::NotFound(case_id.to_string()))?;

        case.lift_in_progress = false;
        case.lift_attempts = case.lift_attempts.saturating_add(1);
        if case.lift_attempts >= max_attempts {
            case.lift_failed = true;
        }
        Ok(case.clone())
    }

    async fn mark_execution_failed(&self, case_id: &str) -> EnforcementResult<()> {
        let mut case = self
            .records
            .get_mut(case_id)
            .ok_or_else(|| EnforcementError::NotFound(case_id.to_string()))?;
        case.execution_failed = true;
        Ok(())
    }

    async fn find_automatic_since(
        &self,
        community_id: u64,
        user_id: u64,
        since: DateTime<Utc>,
    ) -> EnforcementResult<Vec<ModCase>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                let case = entry.value();
                case.community_id == community_id
                    && case.subject_user_id == user_id
                    && case.creation_type == CreationType::Automatic
                    && case.created_at >= since
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_failed_lifts(&self) -> EnforcementResult<Vec<ModCase>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().lift_failed && entry.value().punishment_active)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
