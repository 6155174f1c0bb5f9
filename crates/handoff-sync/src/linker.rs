//! Entity linking: exact matches first, a human for everything else.

use handoff_core::{TeamRecord, UserRecord};
use handoff_storage::{StagingStore, StoreError};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::resolve::{EntityKind, ResolutionRequest, Resolver, Selection};
use crate::target::TargetDirectory;
use crate::{MigrationError, RunWarning};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkTally {
    /// Linked by an exact match, no human involved.
    pub exact: usize,
    pub resolved: usize,
    pub unmatched: usize,
    pub already_linked: usize,
    /// Link writes refused by the store.
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub users: LinkTally,
    pub teams: LinkTally,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct EntityLinker<'a> {
    store: &'a StagingStore,
    directory: &'a TargetDirectory<'a>,
}

impl<'a> EntityLinker<'a> {
    pub fn new(store: &'a StagingStore, directory: &'a TargetDirectory<'a>) -> Self {
        Self { store, directory }
    }

    /// Users link on case-insensitive email. Anything but a single exact hit
    /// goes to the resolver, unless the platform has no users at all.
    pub async fn link_users<R: Resolver>(
        &self,
        resolver: &mut R,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<LinkTally, MigrationError> {
        let span = info_span!("link_users");
        async {
            let candidates = self.directory.users().await?;
            let released = self.store.release_retired_user_links().await?;
            release(EntityKind::User, released, warnings);
            let mut tally = LinkTally::default();

            for user in self.store.users().await? {
                if user.target.is_some() {
                    tally.already_linked += 1;
                    continue;
                }
                let email = normalize_email(&user.email);
                let exact: Vec<_> = candidates
                    .iter()
                    .filter(|c| normalize_email(&c.email) == email)
                    .collect();

                let (selection, by_human) = if let [only] = exact.as_slice() {
                    (Selection::Selected((*only).clone()), false)
                } else if candidates.is_empty() {
                    (Selection::NoMatch, false)
                } else {
                    let request = ResolutionRequest::new(
                        user.id.clone(),
                        user_prompt(&user, exact.len()),
                        &user.email,
                        candidates.clone(),
                    );
                    (resolver.resolve(request)?, true)
                };

                match selection {
                    Selection::Selected(target) => {
                        if self
                            .persist(EntityKind::User, &user.id, &target.id, warnings)
                            .await?
                        {
                            if by_human {
                                tally.resolved += 1;
                            } else {
                                tally.exact += 1;
                            }
                        } else {
                            tally.rejected += 1;
                        }
                    }
                    Selection::NoMatch => {
                        debug!(user_id = %user.id, "user left unlinked");
                        tally.unmatched += 1;
                    }
                }
            }

            info!(?tally, "linked users");
            Ok::<_, MigrationError>(tally)
        }
        .instrument(span)
        .await
    }

    /// Root teams link on exact name. Proxied teams are never linked on their
    /// own; they ride along with the team they fold into.
    pub async fn link_teams<R: Resolver>(
        &self,
        resolver: &mut R,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<LinkTally, MigrationError> {
        let span = info_span!("link_teams");
        async {
            let candidates = self.directory.teams().await?;
            let released = self.store.release_retired_team_links().await?;
            release(EntityKind::Team, released, warnings);
            let mut tally = LinkTally::default();

            for team in self.store.teams().await? {
                if team.is_proxied() {
                    continue;
                }
                if team.target.is_some() {
                    tally.already_linked += 1;
                    continue;
                }
                let exact: Vec<_> = candidates
                    .iter()
                    .filter(|c| c.name.trim() == team.name.trim())
                    .collect();

                let (selection, by_human) = if let [only] = exact.as_slice() {
                    (Selection::Selected((*only).clone()), false)
                } else if candidates.is_empty() {
                    (Selection::NoMatch, false)
                } else {
                    let request = ResolutionRequest::new(
                        team.id.clone(),
                        team_prompt(&team, exact.len()),
                        &team.name,
                        candidates.clone(),
                    );
                    (resolver.resolve(request)?, true)
                };

                match selection {
                    Selection::Selected(target) => {
                        if self
                            .persist(EntityKind::Team, &team.id, &target.id, warnings)
                            .await?
                        {
                            if by_human {
                                tally.resolved += 1;
                            } else {
                                tally.exact += 1;
                            }
                        } else {
                            tally.rejected += 1;
                        }
                    }
                    Selection::NoMatch => {
                        debug!(team_id = %team.id, "team left unlinked");
                        tally.unmatched += 1;
                    }
                }
            }

            info!(?tally, "linked teams");
            Ok::<_, MigrationError>(tally)
        }
        .instrument(span)
        .await
    }

    /// Returns whether the link was written. Constraint failures stay local
    /// to the entity.
    async fn persist(
        &self,
        kind: EntityKind,
        legacy_id: &str,
        target_id: &str,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<bool, MigrationError> {
        let result = match kind {
            EntityKind::User => self.store.link_user(legacy_id, target_id).await,
            EntityKind::Team => self.store.link_team(legacy_id, target_id).await,
        };
        match result {
            Ok(()) => Ok(true),
            Err(err @ (StoreError::Constraint { .. } | StoreError::NotFound { .. })) => {
                warn!(%kind, legacy_id, target_id, error = %err, "link rejected");
                warnings.push(RunWarning::LinkRejected {
                    entity: kind,
                    legacy_id: legacy_id.to_string(),
                    target_id: target_id.to_string(),
                    reason: err.to_string(),
                });
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Links whose target left the platform were cleared by the store; the
/// entities go through matching again like any unlinked one.
fn release(kind: EntityKind, released: Vec<(String, String)>, warnings: &mut Vec<RunWarning>) {
    for (legacy_id, target_id) in released {
        warn!(%kind, %legacy_id, %target_id, "link target retired");
        warnings.push(RunWarning::LinkRejected {
            entity: kind,
            legacy_id,
            target_id,
            reason: "target no longer exists on the platform".to_string(),
        });
    }
}

fn user_prompt(user: &UserRecord, exact_matches: usize) -> String {
    if exact_matches > 1 {
        format!(
            "{} target users share the email of legacy user {} <{}>. Which one is it?",
            exact_matches, user.name, user.email
        )
    } else {
        format!(
            "No target user has the email of legacy user {} <{}>. Which one is it?",
            user.name, user.email
        )
    }
}

fn team_prompt(team: &TeamRecord, exact_matches: usize) -> String {
    if exact_matches > 1 {
        format!(
            "{} target teams are named \"{}\". Which one is legacy team {}?",
            exact_matches, team.name, team.id
        )
    } else {
        format!(
            "No target team is named \"{}\". Which one is legacy team {}?",
            team.name, team.id
        )
    }
}
