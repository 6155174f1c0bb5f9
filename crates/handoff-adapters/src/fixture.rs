use std::fs;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use handoff_core::{
    LegacyEscalationPolicy, LegacySchedule, LegacyTeam, LegacyUser, TargetTeam, TargetUser,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{AdapterError, ProviderAdapter, TargetPlatform};

/// Captured legacy-provider state, one JSON document per environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    #[serde(default)]
    pub users: Vec<LegacyUser>,
    #[serde(default)]
    pub teams: Vec<LegacyTeam>,
    #[serde(default)]
    pub schedules: Vec<LegacySchedule>,
    #[serde(default)]
    pub escalation_policies: Vec<LegacyEscalationPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    #[serde(default)]
    pub teams: Vec<TargetTeam>,
    #[serde(default)]
    pub users: Vec<TargetUser>,
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct FixtureProvider {
    snapshot: ProviderSnapshot,
}

impl FixtureProvider {
    pub fn new(snapshot: ProviderSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        Ok(Self::new(read_json_file(path.as_ref())?))
    }
}

#[async_trait]
impl ProviderAdapter for FixtureProvider {
    fn provider_id(&self) -> &'static str {
        "fixture"
    }

    async fn list_teams(&self) -> Result<Vec<LegacyTeam>, AdapterError> {
        Ok(self.snapshot.teams.clone())
    }

    async fn list_users(&self) -> Result<Vec<LegacyUser>, AdapterError> {
        Ok(self.snapshot.users.clone())
    }

    async fn team_schedules(&self, team_id: &str) -> Result<Vec<LegacySchedule>, AdapterError> {
        Ok(self
            .snapshot
            .schedules
            .iter()
            .filter(|s| s.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn escalation_policies(&self) -> Result<Vec<LegacyEscalationPolicy>, AdapterError> {
        Ok(self.snapshot.escalation_policies.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FixtureTarget {
    snapshot: TargetSnapshot,
}

impl FixtureTarget {
    pub fn new(snapshot: TargetSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        Ok(Self::new(read_json_file(path.as_ref())?))
    }
}

#[async_trait]
impl TargetPlatform for FixtureTarget {
    fn platform_id(&self) -> &'static str {
        "fixture"
    }

    async fn list_teams(&self) -> Result<Vec<TargetTeam>, AdapterError> {
        Ok(self.snapshot.teams.clone())
    }

    async fn list_users(&self) -> Result<Vec<TargetUser>, AdapterError> {
        Ok(self.snapshot.users.clone())
    }
}
