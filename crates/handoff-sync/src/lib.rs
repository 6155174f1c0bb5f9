//! Migration pipeline: link legacy entities to the target platform, fold
//! proxied teams, normalize rotations and policies, render the document.

use std::fmt;

use serde::Serialize;

pub mod config;
pub mod consolidate;
mod error;
pub mod linker;
pub mod naming;
pub mod normalize;
pub mod pipeline;
pub mod render;
pub mod resolve;
pub mod target;

pub use config::{LinkAnswers, MigrationConfig, Unanswered};
pub use consolidate::{ConsolidatedTeam, ConsolidationError};
pub use error::MigrationError;
pub use linker::{EntityLinker, LinkReport, LinkTally};
pub use naming::RenderIntegrityError;
pub use normalize::{NormalizedPolicy, NormalizedRotation, ScheduleClassificationError};
pub use pipeline::{IngestSummary, MigrationPipeline, MigrationRunSummary, StagedRenderer};
pub use render::{render, RenderModel, RenderStats, RenderedDocument};
pub use resolve::{
    Candidate, EntityKind, ResolutionAborted, ResolutionRequest, Resolver, ScriptedResolver,
    Selection,
};
pub use target::TargetDirectory;

pub const CRATE_NAME: &str = "handoff-sync";

/// Entity-level degradation. The run carries on and reports these in its
/// summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    IngestRejected {
        entity: &'static str,
        id: String,
        reason: String,
    },
    MembershipsSkipped {
        count: usize,
    },
    ExtraLayersIgnored {
        schedule_id: String,
        layers: i64,
    },
    ScheduleSkipped {
        schedule_id: String,
        reason: String,
    },
    LinkRejected {
        entity: EntityKind,
        legacy_id: String,
        target_id: String,
        reason: String,
    },
    StepDropped {
        policy_id: String,
        schedule_id: String,
    },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunWarning::IngestRejected { entity, id, reason } => {
                write!(f, "{entity} {id} not staged: {reason}")
            }
            RunWarning::MembershipsSkipped { count } => {
                write!(f, "{count} memberships name users that were never ingested")
            }
            RunWarning::ExtraLayersIgnored {
                schedule_id,
                layers,
            } => write!(
                f,
                "schedule {schedule_id} has {layers} layers; only the earliest was migrated"
            ),
            RunWarning::ScheduleSkipped {
                schedule_id,
                reason,
            } => write!(f, "schedule {schedule_id} skipped: {reason}"),
            RunWarning::LinkRejected {
                entity,
                legacy_id,
                target_id,
                reason,
            } => write!(f, "{entity} {legacy_id} not linked to {target_id}: {reason}"),
            RunWarning::StepDropped {
                policy_id,
                schedule_id,
            } => write!(
                f,
                "escalation policy {policy_id} lost its step for skipped schedule {schedule_id}"
            ),
        }
    }
}
