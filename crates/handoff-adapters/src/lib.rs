//! Provider adapter and target platform contracts, plus the fixture-backed
//! and HTTP-backed implementations selected at startup.

mod firehydrant;
mod fixture;
pub mod http;
mod pagerduty;

use std::path::PathBuf;

use async_trait::async_trait;
use handoff_core::{
    LegacyEscalationPolicy, LegacySchedule, LegacyTeam, LegacyUser, TargetTeam, TargetUser,
};
use thiserror::Error;

pub use firehydrant::FireHydrantTarget;
pub use fixture::{FixtureProvider, FixtureTarget, ProviderSnapshot, TargetSnapshot};
pub use http::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
pub use pagerduty::PagerDutyProvider;

pub const CRATE_NAME: &str = "handoff-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("unknown {kind} adapter: {name}")]
    Unknown { kind: &'static str, name: String },
    #[error("{adapter} adapter requires {setting}")]
    MissingSetting {
        adapter: &'static str,
        setting: &'static str,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Legacy alerting provider. Implementations drain pagination before returning.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &'static str;

    async fn list_teams(&self) -> Result<Vec<LegacyTeam>, AdapterError>;

    async fn list_users(&self) -> Result<Vec<LegacyUser>, AdapterError>;

    async fn team_schedules(&self, team_id: &str) -> Result<Vec<LegacySchedule>, AdapterError>;

    async fn escalation_policies(&self) -> Result<Vec<LegacyEscalationPolicy>, AdapterError>;
}

/// Destination incident-management platform, read only.
#[async_trait]
pub trait TargetPlatform: Send + Sync {
    fn platform_id(&self) -> &'static str;

    async fn list_teams(&self) -> Result<Vec<TargetTeam>, AdapterError>;

    async fn list_users(&self) -> Result<Vec<TargetUser>, AdapterError>;
}

/// Where an adapter finds its data: a JSON snapshot or a live API.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub fixture_path: Option<PathBuf>,
    pub http: HttpClientConfig,
}

impl AdapterSettings {
    fn require_token(&self, adapter: &'static str) -> Result<&str, AdapterError> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AdapterError::MissingSetting {
                adapter,
                setting: "an API token",
            })
    }

    fn require_fixture(&self, adapter: &'static str) -> Result<&PathBuf, AdapterError> {
        self.fixture_path.as_ref().ok_or(AdapterError::MissingSetting {
            adapter,
            setting: "a fixture path",
        })
    }
}

pub fn provider_for(
    name: &str,
    settings: &AdapterSettings,
) -> Result<Box<dyn ProviderAdapter>, AdapterError> {
    match name {
        "fixture" => Ok(Box::new(FixtureProvider::load(
            settings.require_fixture("fixture provider")?,
        )?)),
        "pagerduty" => Ok(Box::new(PagerDutyProvider::new(
            &settings.http,
            settings.base_url.as_deref(),
            settings.require_token("pagerduty")?,
        )?)),
        other => Err(AdapterError::Unknown {
            kind: "provider",
            name: other.to_string(),
        }),
    }
}

pub fn target_for(
    name: &str,
    settings: &AdapterSettings,
) -> Result<Box<dyn TargetPlatform>, AdapterError> {
    match name {
        "fixture" => Ok(Box::new(FixtureTarget::load(
            settings.require_fixture("fixture target")?,
        )?)),
        "firehydrant" => Ok(Box::new(FireHydrantTarget::new(
            &settings.http,
            settings.base_url.as_deref(),
            settings.require_token("firehydrant")?,
        )?)),
        other => Err(AdapterError::Unknown {
            kind: "target",
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_reject_unknown_names() {
        let settings = AdapterSettings::default();
        assert!(matches!(
            provider_for("opsgenie", &settings),
            Err(AdapterError::Unknown { kind: "provider", .. })
        ));
        assert!(matches!(
            target_for("incidentio", &settings),
            Err(AdapterError::Unknown { kind: "target", .. })
        ));
    }

    #[test]
    fn live_adapters_need_a_token() {
        let settings = AdapterSettings::default();
        let err = provider_for("pagerduty", &settings).err().unwrap();
        assert!(err.to_string().contains("API token"));
        let with_token = AdapterSettings {
            token: Some("secret".into()),
            ..AdapterSettings::default()
        };
        let provider = provider_for("pagerduty", &with_token).unwrap();
        assert_eq!(provider.provider_id(), "pagerduty");
        let target = target_for("firehydrant", &with_token).unwrap();
        assert_eq!(target.platform_id(), "firehydrant");
    }
}
