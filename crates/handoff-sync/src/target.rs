use handoff_adapters::TargetPlatform;
use handoff_core::{TargetTeam, TargetUser};
use handoff_storage::{StagingStore, TargetKind};
use tracing::info;

use crate::MigrationError;

/// Read-through cache of target-platform entities. The first lookup of a kind
/// fetches from the platform and persists; later lookups only read the store.
pub struct TargetDirectory<'a> {
    store: &'a StagingStore,
    platform: &'a dyn TargetPlatform,
}

impl<'a> TargetDirectory<'a> {
    pub fn new(store: &'a StagingStore, platform: &'a dyn TargetPlatform) -> Self {
        Self { store, platform }
    }

    pub async fn teams(&self) -> Result<Vec<TargetTeam>, MigrationError> {
        if !self.store.target_cache_filled(TargetKind::Teams).await? {
            let fetched = self.platform.list_teams().await.map_err(|e| {
                MigrationError::fetch(self.platform.platform_id(), "target teams", e)
            })?;
            info!(count = fetched.len(), platform = self.platform.platform_id(), "cached target teams");
            self.store.cache_target_teams(&fetched).await?;
        }
        Ok(self.store.target_teams().await?)
    }

    pub async fn users(&self) -> Result<Vec<TargetUser>, MigrationError> {
        if !self.store.target_cache_filled(TargetKind::Users).await? {
            let fetched = self.platform.list_users().await.map_err(|e| {
                MigrationError::fetch(self.platform.platform_id(), "target users", e)
            })?;
            info!(count = fetched.len(), platform = self.platform.platform_id(), "cached target users");
            self.store.cache_target_users(&fetched).await?;
        }
        Ok(self.store.target_users().await?)
    }
}
