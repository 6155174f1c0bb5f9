use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use handoff_adapters::{AdapterSettings, HttpClientConfig};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub provider: String,
    pub provider_settings: AdapterSettings,
    pub target: String,
    pub target_settings: AdapterSettings,
    /// File-backed staging store; `None` keeps everything in memory.
    pub staging_db: Option<PathBuf>,
    pub output_path: PathBuf,
    pub links_file: Option<PathBuf>,
}

impl MigrationConfig {
    pub fn from_env() -> Self {
        let http = HttpClientConfig {
            timeout: Duration::from_secs(
                std::env::var("HANDOFF_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
            user_agent: Some(
                std::env::var("HANDOFF_USER_AGENT")
                    .unwrap_or_else(|_| format!("handoff/{}", env!("CARGO_PKG_VERSION"))),
            ),
            ..Default::default()
        };
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            provider: var("HANDOFF_PROVIDER").unwrap_or_else(|| "fixture".to_string()),
            provider_settings: AdapterSettings {
                base_url: var("HANDOFF_PROVIDER_URL"),
                token: var("HANDOFF_PROVIDER_TOKEN"),
                fixture_path: var("HANDOFF_PROVIDER_FIXTURE").map(PathBuf::from),
                http: http.clone(),
            },
            target: var("HANDOFF_TARGET").unwrap_or_else(|| "fixture".to_string()),
            target_settings: AdapterSettings {
                base_url: var("HANDOFF_TARGET_URL"),
                token: var("HANDOFF_TARGET_TOKEN"),
                fixture_path: var("HANDOFF_TARGET_FIXTURE").map(PathBuf::from),
                http,
            },
            staging_db: var("HANDOFF_STAGING_DB").map(PathBuf::from),
            output_path: var("HANDOFF_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./handoff.tf")),
            links_file: var("HANDOFF_LINKS_FILE").map(PathBuf::from),
        }
    }
}

/// What to do when the links file has no entry for an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unanswered {
    #[default]
    NoMatch,
    Abort,
}

/// Pre-recorded answers for human resolution, keyed by legacy id. A `null`
/// target means "no match".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LinkAnswers {
    #[serde(default)]
    pub teams: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub users: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub on_unanswered: Unanswered,
}

impl LinkAnswers {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing links file")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading links file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_file_accepts_null_targets_and_policy() {
        let answers = LinkAnswers::from_yaml_str(
            r#"
teams:
  PSRE: F1
  POPS: null
on_unanswered: abort
"#,
        )
        .unwrap();
        assert_eq!(answers.teams.get("PSRE"), Some(&Some("F1".to_string())));
        assert_eq!(answers.teams.get("POPS"), Some(&None));
        assert!(answers.users.is_empty());
        assert_eq!(answers.on_unanswered, Unanswered::Abort);
    }

    #[test]
    fn empty_links_file_defaults_to_no_match() {
        let answers = LinkAnswers::from_yaml_str("{}").unwrap();
        assert_eq!(answers.on_unanswered, Unanswered::NoMatch);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(LinkAnswers::from_yaml_str("on_unanswered: guess").is_err());
    }
}
