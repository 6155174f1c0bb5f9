//! Human resolution of legacy entities that have no exact target match.

use std::fmt;

use handoff_core::{TargetTeam, TargetUser};
use serde::Serialize;
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::warn;

use crate::config::{LinkAnswers, Unanswered};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Team,
    User,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Team => "team",
            EntityKind::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target-platform entity that can be offered as a link.
pub trait Candidate: Clone + Send + Sync {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// Field compared against the legacy entity when ranking.
    fn match_key(&self) -> &str;

    fn label(&self) -> String;
}

impl Candidate for TargetTeam {
    const KIND: EntityKind = EntityKind::Team;

    fn id(&self) -> &str {
        &self.id
    }

    fn match_key(&self) -> &str {
        &self.name
    }

    fn label(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}

impl Candidate for TargetUser {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &str {
        &self.id
    }

    fn match_key(&self) -> &str {
        &self.email
    }

    fn label(&self) -> String {
        format!("{} <{}> ({})", self.name, self.email, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    Selected(T),
    NoMatch,
}

#[derive(Debug, Clone)]
pub struct ResolutionRequest<T> {
    pub legacy_id: String,
    pub prompt: String,
    /// Every target entity of the same kind, most similar first.
    pub candidates: Vec<T>,
}

impl<T: Candidate> ResolutionRequest<T> {
    pub fn new(legacy_id: impl Into<String>, prompt: impl Into<String>, needle: &str, candidates: Vec<T>) -> Self {
        Self {
            legacy_id: legacy_id.into(),
            prompt: prompt.into(),
            candidates: rank_candidates(needle, candidates),
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resolution aborted while resolving {kind} {legacy_id}")]
pub struct ResolutionAborted {
    pub kind: EntityKind,
    pub legacy_id: String,
}

impl ResolutionAborted {
    pub fn for_request<T: Candidate>(request: &ResolutionRequest<T>) -> Self {
        Self {
            kind: T::KIND,
            legacy_id: request.legacy_id.clone(),
        }
    }
}

/// Blocking decision point. An `Err` aborts the whole run.
pub trait Resolver {
    fn resolve<T: Candidate>(
        &mut self,
        request: ResolutionRequest<T>,
    ) -> Result<Selection<T>, ResolutionAborted>;
}

/// Orders candidates by similarity to `needle`; equal scores keep platform order.
pub fn rank_candidates<T: Candidate>(needle: &str, candidates: Vec<T>) -> Vec<T> {
    let needle = needle.trim().to_lowercase();
    let mut scored: Vec<(f64, T)> = candidates
        .into_iter()
        .map(|c| (jaro_winkler(&needle, &c.match_key().trim().to_lowercase()), c))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, c)| c).collect()
}

/// Answers resolution requests from a links file.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResolver {
    answers: LinkAnswers,
}

impl ScriptedResolver {
    pub fn new(answers: LinkAnswers) -> Self {
        Self { answers }
    }
}

impl Resolver for ScriptedResolver {
    fn resolve<T: Candidate>(
        &mut self,
        request: ResolutionRequest<T>,
    ) -> Result<Selection<T>, ResolutionAborted> {
        let answers = match T::KIND {
            EntityKind::Team => &self.answers.teams,
            EntityKind::User => &self.answers.users,
        };
        match answers.get(&request.legacy_id) {
            Some(Some(target_id)) => {
                match request.candidates.iter().find(|c| c.id() == target_id) {
                    Some(candidate) => Ok(Selection::Selected(candidate.clone())),
                    None => {
                        warn!(
                            kind = %T::KIND,
                            legacy_id = %request.legacy_id,
                            target_id = %target_id,
                            "links file names a target that does not exist; leaving unlinked"
                        );
                        Ok(Selection::NoMatch)
                    }
                }
            }
            Some(None) => Ok(Selection::NoMatch),
            None => match self.answers.on_unanswered {
                Unanswered::NoMatch => Ok(Selection::NoMatch),
                Unanswered::Abort => Err(ResolutionAborted::for_request(&request)),
            },
        }
    }
}
