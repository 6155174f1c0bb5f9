//! One migration run: ingest, link, consolidate, normalize, render, write.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use handoff_adapters::{provider_for, target_for, ProviderAdapter, TargetPlatform};
use handoff_storage::{DocumentWriter, StagingStore, StoreError, StoredDocument};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::consolidate::consolidate;
use crate::linker::{EntityLinker, LinkReport};
use crate::normalize::{default_policy, normalize_policy, normalize_schedule};
use crate::render::{render, RenderModel, RenderStats, RenderTeam};
use crate::resolve::Resolver;
use crate::target::TargetDirectory;
use crate::{MigrationError, RunWarning};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub users: usize,
    pub teams: usize,
    pub schedules: usize,
    pub escalation_policies: usize,
    pub skipped_memberships: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` for a re-render that never talked to a provider.
    pub provider: Option<String>,
    pub target: Option<String>,
    pub ingested: IngestSummary,
    pub links: LinkReport,
    pub rendered: RenderStats,
    pub document: StoredDocument,
    pub warnings: Vec<RunWarning>,
}

/// Opens the configured staging store, or a private in-memory one.
pub async fn open_store(staging_db: Option<&Path>) -> Result<StagingStore, StoreError> {
    match staging_db {
        Some(path) => StagingStore::open(path).await,
        None => StagingStore::open_in_memory().await,
    }
}

fn note(warnings: &mut Vec<RunWarning>, warning: RunWarning) {
    warn!(%warning, "migration degraded");
    warnings.push(warning);
}

pub struct MigrationPipeline {
    store: StagingStore,
    provider: Box<dyn ProviderAdapter>,
    target: Box<dyn TargetPlatform>,
    output_path: PathBuf,
}

impl MigrationPipeline {
    pub fn new(
        store: StagingStore,
        provider: Box<dyn ProviderAdapter>,
        target: Box<dyn TargetPlatform>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            provider,
            target,
            output_path: output_path.into(),
        }
    }

    pub async fn from_config(config: &MigrationConfig) -> anyhow::Result<Self> {
        let store = open_store(config.staging_db.as_deref())
            .await
            .context("opening staging store")?;
        let provider = provider_for(&config.provider, &config.provider_settings)
            .with_context(|| format!("configuring provider {}", config.provider))?;
        let target = target_for(&config.target, &config.target_settings)
            .with_context(|| format!("configuring target {}", config.target))?;
        Ok(Self::new(store, provider, target, config.output_path.clone()))
    }

    /// Full run. Any `Err` means no document was written by this run.
    pub async fn run_once<R: Resolver>(
        &self,
        resolver: &mut R,
    ) -> Result<MigrationRunSummary, MigrationError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!(
            "migration_run",
            %run_id,
            provider = self.provider.provider_id(),
            target = self.target.platform_id()
        );

        async {
            let mut warnings = Vec::new();
            // Target entities may have changed since a previous run on this store.
            self.store.invalidate_target_cache().await?;

            let ingested = self.ingest(&mut warnings).await?;

            let directory = TargetDirectory::new(&self.store, &*self.target);
            let linker = EntityLinker::new(&self.store, &directory);
            let users = linker.link_users(resolver, &mut warnings).await?;
            let teams = linker.link_teams(resolver, &mut warnings).await?;

            let (rendered, document) = StagedRenderer::new(&self.store, &self.output_path)
                .write(&mut warnings)
                .await?;

            let summary = MigrationRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                provider: Some(self.provider.provider_id().to_string()),
                target: Some(self.target.platform_id().to_string()),
                ingested,
                links: LinkReport { users, teams },
                rendered,
                document,
                warnings,
            };
            info!(
                warnings = summary.warnings.len(),
                sha256 = %summary.document.sha256,
                "migration run complete"
            );
            Ok::<_, MigrationError>(summary)
        }
        .instrument(span)
        .await
    }

    /// Re-render whatever the store already holds. Nothing is fetched or linked.
    pub async fn render_only(&self) -> Result<MigrationRunSummary, MigrationError> {
        let mut summary = StagedRenderer::new(&self.store, &self.output_path).run().await?;
        summary.provider = Some(self.provider.provider_id().to_string());
        summary.target = Some(self.target.platform_id().to_string());
        Ok(summary)
    }

    async fn ingest(
        &self,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<IngestSummary, MigrationError> {
        let provider_id = self.provider.provider_id();
        let fetch = |stage| move |e| MigrationError::fetch(provider_id, stage, e);

        let users = self.provider.list_users().await.map_err(fetch("users"))?;
        let mut summary = IngestSummary {
            users: self.store.ingest_users(&users).await?.upserted,
            ..IngestSummary::default()
        };

        let teams = self.provider.list_teams().await.map_err(fetch("teams"))?;
        let counts = self.store.ingest_teams(&teams).await?;
        summary.teams = counts.upserted;
        summary.skipped_memberships = counts.skipped_memberships;
        if counts.skipped_memberships > 0 {
            note(
                warnings,
                RunWarning::MembershipsSkipped {
                    count: counts.skipped_memberships,
                },
            );
        }
        for id in &counts.rejected {
            note(
                warnings,
                RunWarning::IngestRejected {
                    entity: "team",
                    id: id.clone(),
                    reason: "proxies for a team that was never ingested".to_string(),
                },
            );
        }

        let rejected_teams: HashSet<&str> = counts.rejected.iter().map(String::as_str).collect();
        for team in teams.iter().filter(|t| !rejected_teams.contains(t.id.as_str())) {
            let schedules = self
                .provider
                .team_schedules(&team.id)
                .await
                .map_err(fetch("schedules"))?;
            for schedule in &schedules {
                match self.store.ingest_schedule(schedule).await {
                    Ok(()) => summary.schedules += 1,
                    Err(err @ (StoreError::Constraint { .. } | StoreError::Invalid { .. })) => {
                        let reason = err.to_string();
                        self.store.reject_schedule(&schedule.id, &reason).await?;
                        note(
                            warnings,
                            RunWarning::IngestRejected {
                                entity: "schedule",
                                id: schedule.id.clone(),
                                reason,
                            },
                        );
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let policies = self
            .provider
            .escalation_policies()
            .await
            .map_err(fetch("escalation policies"))?;
        for policy in &policies {
            match self.store.ingest_escalation_policy(policy).await {
                Ok(()) => summary.escalation_policies += 1,
                Err(err @ StoreError::Constraint { .. }) => note(
                    warnings,
                    RunWarning::IngestRejected {
                        entity: "escalation_policy",
                        id: policy.id.clone(),
                        reason: err.to_string(),
                    },
                ),
                Err(err) => return Err(err.into()),
            }
        }

        info!(
            users = summary.users,
            teams = summary.teams,
            schedules = summary.schedules,
            escalation_policies = summary.escalation_policies,
            "ingested provider data"
        );
        Ok(summary)
    }
}

/// Builds the render model from a staging store and writes the document.
/// Works on any populated store, so a past run can be re-rendered offline.
pub struct StagedRenderer<'a> {
    store: &'a StagingStore,
    output_path: &'a Path,
}

impl<'a> StagedRenderer<'a> {
    pub fn new(store: &'a StagingStore, output_path: &'a Path) -> Self {
        Self { store, output_path }
    }

    /// Escalation steps pointing at schedules refused at ingestion, or
    /// skipped here, are dropped instead of failing the render.
    pub async fn model(&self, warnings: &mut Vec<RunWarning>) -> Result<RenderModel, MigrationError> {
        let consolidated = consolidate(self.store).await?;
        let mut skipped: HashSet<String> =
            self.store.rejected_schedule_ids().await?.into_iter().collect();
        let mut teams = Vec::with_capacity(consolidated.len());

        for group in consolidated {
            let mut rotations = Vec::with_capacity(group.schedules.len());
            for schedule in &group.schedules {
                if schedule.layer_count > 1 {
                    note(
                        warnings,
                        RunWarning::ExtraLayersIgnored {
                            schedule_id: schedule.id.clone(),
                            layers: schedule.layer_count,
                        },
                    );
                }
                let members = self.store.rotation_member_ids(&schedule.rotation_id).await?;
                match normalize_schedule(schedule, members) {
                    Ok(rotation) => rotations.push(rotation),
                    Err(err) => {
                        note(
                            warnings,
                            RunWarning::ScheduleSkipped {
                                schedule_id: err.schedule_id().to_string(),
                                reason: err.to_string(),
                            },
                        );
                        skipped.insert(schedule.id.clone());
                    }
                }
            }

            let mut policies = Vec::with_capacity(group.policies.len());
            for record in &group.policies {
                let mut policy = normalize_policy(record);
                policy.steps.retain(|step| {
                    if !skipped.contains(&step.schedule_id) {
                        return true;
                    }
                    note(
                        warnings,
                        RunWarning::StepDropped {
                            policy_id: record.id.clone(),
                            schedule_id: step.schedule_id.clone(),
                        },
                    );
                    false
                });
                if policy.steps.is_empty() {
                    warn!(policy_id = %policy.id, "escalation policy has no steps left; not rendered");
                    continue;
                }
                policies.push(policy);
            }
            if group.policies.is_empty() && !rotations.is_empty() {
                policies.push(default_policy(&group.team.id, &group.team.name, &rotations));
            }

            teams.push(RenderTeam {
                absorbed_ids: group.absorbed.iter().map(|t| t.id.clone()).collect(),
                team: group.team,
                member_ids: group.member_ids,
                rotations,
                policies,
            });
        }

        Ok(RenderModel {
            users: self.store.users().await?,
            teams,
        })
    }

    /// Renders fully in memory before touching the output path, so an
    /// integrity failure leaves any previous document in place.
    pub async fn write(
        &self,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<(RenderStats, StoredDocument), MigrationError> {
        let model = self.model(warnings).await?;
        let document = render(&model)?;
        let stored = DocumentWriter::new()
            .write(self.output_path, document.text.as_bytes())
            .await
            .map_err(|e| MigrationError::Output {
                path: self.output_path.to_path_buf(),
                message: format!("{e:#}"),
            })?;
        info!(
            path = %stored.path.display(),
            sha256 = %stored.sha256,
            unchanged = stored.unchanged,
            "wrote configuration document"
        );
        Ok((document.stats, stored))
    }

    pub async fn run(&self) -> Result<MigrationRunSummary, MigrationError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        async {
            let mut warnings = Vec::new();
            let (rendered, document) = self.write(&mut warnings).await?;
            Ok::<_, MigrationError>(MigrationRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                provider: None,
                target: None,
                ingested: IngestSummary::default(),
                links: LinkReport::default(),
                rendered,
                document,
                warnings,
            })
        }
        .instrument(info_span!("render_staged", %run_id))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use handoff_adapters::{
        AdapterError, FixtureProvider, FixtureTarget, ProviderSnapshot, TargetSnapshot,
    };
    use handoff_core::{
        EscalationLevel, LegacyEscalationPolicy, LegacySchedule, LegacyTeam, LegacyUser,
        RotationLayer, TargetUser,
    };

    use crate::resolve::ScriptedResolver;

    fn user(id: &str) -> LegacyUser {
        LegacyUser {
            id: id.into(),
            name: id.into(),
            email: format!("{id}@x.com"),
        }
    }

    fn schedule(id: &str, team_id: &str, members: &[&str]) -> LegacySchedule {
        LegacySchedule {
            id: id.into(),
            name: format!("{id} rotation"),
            description: String::new(),
            team_id: team_id.into(),
            time_zone: "UTC".into(),
            layers: vec![RotationLayer {
                id: format!("{id}-L1"),
                rotation_turn_length_seconds: 86_400,
                rotation_start: "2024-01-01T09:00:00Z".into(),
                member_ids: members.iter().map(|m| m.to_string()).collect(),
            }],
        }
    }

    fn snapshot() -> ProviderSnapshot {
        ProviderSnapshot {
            users: vec![user("alice")],
            teams: vec![LegacyTeam {
                id: "T1".into(),
                name: "Ops".into(),
                slug: "ops".into(),
                proxy_for: None,
                member_ids: vec!["alice".into()],
            }],
            schedules: vec![
                schedule("S1", "T1", &["alice"]),
                schedule("S2", "T1", &["alice", "ghost"]),
            ],
            escalation_policies: vec![LegacyEscalationPolicy {
                id: "P1".into(),
                name: "Ops".into(),
                team_id: "T1".into(),
                levels: vec![
                    EscalationLevel {
                        target_schedule_id: "S1".into(),
                        timeout_seconds: 300,
                    },
                    EscalationLevel {
                        target_schedule_id: "S2".into(),
                        timeout_seconds: 300,
                    },
                ],
            }],
        }
    }

    fn target() -> FixtureTarget {
        FixtureTarget::new(TargetSnapshot {
            teams: vec![],
            users: vec![TargetUser {
                id: "FU1".into(),
                name: "Alice".into(),
                email: "alice@x.com".into(),
            }],
        })
    }

    #[tokio::test]
    async fn schedules_refused_at_ingest_drop_their_steps() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.tf");
        let pipeline = MigrationPipeline::new(
            StagingStore::open_in_memory().await.unwrap(),
            Box::new(FixtureProvider::new(snapshot())),
            Box::new(target()),
            &out,
        );

        let summary = pipeline
            .run_once(&mut ScriptedResolver::default())
            .await
            .unwrap();

        assert_eq!(summary.ingested.schedules, 1);
        assert_eq!(summary.links.users.exact, 1);
        assert_eq!(summary.rendered.rotations, 1);
        assert_eq!(summary.rendered.escalation_policies, 1);
        assert!(summary.warnings.iter().any(|w| matches!(
            w,
            RunWarning::IngestRejected { entity: "schedule", id, .. } if id == "S2"
        )));
        assert!(summary.warnings.contains(&RunWarning::StepDropped {
            policy_id: "P1".into(),
            schedule_id: "S2".into(),
        }));
        assert!(out.exists());
    }

    #[tokio::test]
    async fn summary_serializes_warnings_with_their_kind() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = MigrationPipeline::new(
            StagingStore::open_in_memory().await.unwrap(),
            Box::new(FixtureProvider::new(snapshot())),
            Box::new(target()),
            dir.path().join("out.tf"),
        );
        let summary = pipeline
            .run_once(&mut ScriptedResolver::default())
            .await
            .unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["provider"], "fixture");
        assert_eq!(json["links"]["users"]["exact"], 1);
        let kinds: Vec<_> = json["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|w| w["kind"].as_str().unwrap().to_string())
            .collect();
        assert!(kinds.contains(&"ingest_rejected".to_string()));
        assert!(kinds.contains(&"step_dropped".to_string()));
    }

    struct FailingProvider;

    #[async_trait]
    impl ProviderAdapter for FailingProvider {
        fn provider_id(&self) -> &'static str {
            "failing"
        }

        async fn list_teams(&self) -> Result<Vec<LegacyTeam>, AdapterError> {
            Err(AdapterError::Message("teams endpoint down".into()))
        }

        async fn list_users(&self) -> Result<Vec<LegacyUser>, AdapterError> {
            Ok(vec![user("alice")])
        }

        async fn team_schedules(&self, _team_id: &str) -> Result<Vec<LegacySchedule>, AdapterError> {
            Ok(vec![])
        }

        async fn escalation_policies(&self) -> Result<Vec<LegacyEscalationPolicy>, AdapterError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn fetch_failure_aborts_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.tf");
        let pipeline = MigrationPipeline::new(
            StagingStore::open_in_memory().await.unwrap(),
            Box::new(FailingProvider),
            Box::new(target()),
            &out,
        );

        let err = pipeline
            .run_once(&mut ScriptedResolver::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::ProviderFetch { stage: "teams", ref adapter, .. } if adapter == "failing"
        ));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn render_only_reuses_a_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("staging.db");
        let first = dir.path().join("first.tf");
        let second = dir.path().join("second.tf");

        {
            let pipeline = MigrationPipeline::new(
                StagingStore::open(&db).await.unwrap(),
                Box::new(FixtureProvider::new(snapshot())),
                Box::new(target()),
                &first,
            );
            let summary = pipeline
                .run_once(&mut ScriptedResolver::default())
                .await
                .unwrap();
            assert!(summary.warnings.contains(&RunWarning::StepDropped {
                policy_id: "P1".into(),
                schedule_id: "S2".into(),
            }));
        }

        // S2 was refused by the run; the re-render must still drop its step.
        let store = StagingStore::open(&db).await.unwrap();
        let summary = StagedRenderer::new(&store, &second).run().await.unwrap();
        assert!(summary.provider.is_none());
        assert_eq!(summary.ingested, IngestSummary::default());
        assert!(summary.warnings.contains(&RunWarning::StepDropped {
            policy_id: "P1".into(),
            schedule_id: "S2".into(),
        }));
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());

        // A provider that cannot even list teams is never consulted.
        let third = dir.path().join("third.tf");
        let offline = MigrationPipeline::new(store, Box::new(FailingProvider), Box::new(target()), &third);
        let summary = offline.render_only().await.unwrap();
        assert_eq!(summary.provider.as_deref(), Some("failing"));
        assert_eq!(summary.document.sha256, DocumentWriter::digest(&std::fs::read(&first).unwrap()));
    }

    #[tokio::test]
    async fn schedule_fixed_upstream_returns_on_the_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("staging.db");
        let out = dir.path().join("out.tf");

        let first = MigrationPipeline::new(
            StagingStore::open(&db).await.unwrap(),
            Box::new(FixtureProvider::new(snapshot())),
            Box::new(target()),
            &out,
        )
        .run_once(&mut ScriptedResolver::default())
        .await
        .unwrap();
        assert_eq!(first.rendered.rotations, 1);

        let mut fixed = snapshot();
        fixed.schedules[1] = schedule("S2", "T1", &["alice"]);
        let second = MigrationPipeline::new(
            StagingStore::open(&db).await.unwrap(),
            Box::new(FixtureProvider::new(fixed)),
            Box::new(target()),
            &out,
        )
        .run_once(&mut ScriptedResolver::default())
        .await
        .unwrap();
        assert_eq!(second.rendered.rotations, 2);
        assert!(second.warnings.is_empty(), "{:?}", second.warnings);
    }

    #[tokio::test]
    async fn empty_store_renders_just_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.tf");
        let store = StagingStore::open_in_memory().await.unwrap();

        let summary = StagedRenderer::new(&store, &out).run().await.unwrap();
        assert_eq!(summary.rendered, RenderStats::default());
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("provider \"firehydrant\""));
        assert!(!text.contains("data \"firehydrant_user\""));
    }
}
