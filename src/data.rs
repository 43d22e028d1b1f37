use std::{ops::Deref, path::PathBuf, sync::Arc};

use crate::config::AppConfig;
use crate::enforcement::{EnforcementResult, MemoryCaseStore, SchedulerClient};
use tracing::info;

/// Shared state handed to every command
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(cases: MemoryCaseStore, scheduler: SchedulerClient, config: AppConfig) -> Self {
        Self(Arc::new(DataInner {
            snapshot_path: PathBuf::from(&config.case_snapshot),
            cases,
            scheduler,
            config,
        }))
    }
}

pub struct DataInner {
    /// All moderation cases
    pub cases: MemoryCaseStore,
    /// Requests to the expiry scheduler
    pub scheduler: SchedulerClient,
    /// Process configuration
    pub config: AppConfig,
    /// Where `save` writes the case snapshot
    pub snapshot_path: PathBuf,
}

impl DataInner {
    /// Save the case snapshot
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written.
    pub async fn save(&self) -> EnforcementResult<()> {
        self.cases.save(&self.snapshot_path).await?;
        info!("Saved {} cases to {}", self.cases.len(), self.snapshot_path.display());
        Ok(())
    }
}

impl std::fmt::Debug for DataInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataInner")
            .field("cases", &self.cases.len())
            .field("config", &self.config)
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Data").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::{
        CaseStore, CreationType, ExpiryScheduler, ModCase, ModerationAction, PunishmentExecutor,
        PunishmentType,
    };
    use crate::enforcement::MockModerationAction;
    use std::time::Duration;

    #[tokio::test]
    async fn test_data_save_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            case_snapshot: dir.path().join("cases.yaml").display().to_string(),
            ..Default::default()
        };

        let cases = MemoryCaseStore::new();
        let actions: Arc<dyn ModerationAction> = Arc::new(MockModerationAction::new());
        let executor = Arc::new(PunishmentExecutor::new(Arc::new(cases.clone()), actions));
        let handle = Arc::new(ExpiryScheduler::new(executor)).start(Duration::from_secs(3600));

        let data = Data::new(cases.clone(), handle.client(), config);
        cases
            .create(
                ModCase::new(1, 2, 3, PunishmentType::Warn, None, false, CreationType::Manual)
                    .unwrap(),
            )
            .await
            .unwrap();
        data.save().await.unwrap();

        let loaded = MemoryCaseStore::load(&data.snapshot_path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(format!("{data:?}").contains("DataInner"));

        handle.stop().await;
    }
}
