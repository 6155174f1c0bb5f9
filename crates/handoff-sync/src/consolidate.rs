//! Folding proxied legacy teams into the team they proxy for.

use std::collections::{HashMap, HashSet};

use handoff_core::{EscalationPolicyRecord, ScheduleRecord, TeamRecord};
use handoff_storage::StagingStore;
use thiserror::Error;
use tracing::debug;

use crate::MigrationError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsolidationError {
    #[error("team {team_id} proxies for itself")]
    SelfProxy { team_id: String },
    #[error("team {team_id} proxies for {proxy_id}, which proxies for {next_id}; proxy chains are not supported")]
    ProxyChain {
        team_id: String,
        proxy_id: String,
        next_id: String,
    },
    #[error("team {team_id} proxies for unknown team {proxy_id}")]
    UnknownProxy { team_id: String, proxy_id: String },
}

/// A root team with every proxied team's members, schedules and policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedTeam {
    pub team: TeamRecord,
    pub absorbed: Vec<TeamRecord>,
    /// Deduplicated, in user ingestion order.
    pub member_ids: Vec<String>,
    /// Root's own first, then each absorbed team's in team order.
    pub schedules: Vec<ScheduleRecord>,
    pub policies: Vec<EscalationPolicyRecord>,
}

/// Groups teams under their roots, keeping team ingestion order for both
/// roots and the teams absorbed into each.
pub fn plan(teams: &[TeamRecord]) -> Result<Vec<(TeamRecord, Vec<TeamRecord>)>, ConsolidationError> {
    let by_id: HashMap<&str, &TeamRecord> = teams.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut absorbed: HashMap<&str, Vec<TeamRecord>> = HashMap::new();

    for team in teams {
        let Some(proxy_id) = team.proxy_for.as_deref() else {
            continue;
        };
        if proxy_id == team.id {
            return Err(ConsolidationError::SelfProxy {
                team_id: team.id.clone(),
            });
        }
        let proxy = by_id
            .get(proxy_id)
            .ok_or_else(|| ConsolidationError::UnknownProxy {
                team_id: team.id.clone(),
                proxy_id: proxy_id.to_string(),
            })?;
        if let Some(next_id) = &proxy.proxy_for {
            return Err(ConsolidationError::ProxyChain {
                team_id: team.id.clone(),
                proxy_id: proxy_id.to_string(),
                next_id: next_id.clone(),
            });
        }
        absorbed.entry(proxy_id).or_default().push(team.clone());
    }

    Ok(teams
        .iter()
        .filter(|t| !t.is_proxied())
        .map(|root| {
            let folded = absorbed.remove(root.id.as_str()).unwrap_or_default();
            (root.clone(), folded)
        })
        .collect())
}

pub async fn consolidate(store: &StagingStore) -> Result<Vec<ConsolidatedTeam>, MigrationError> {
    let teams = store.teams().await?;
    let groups = plan(&teams)?;
    let user_order: HashMap<String, usize> = store
        .users()
        .await?
        .into_iter()
        .enumerate()
        .map(|(idx, u)| (u.id, idx))
        .collect();

    let mut out = Vec::with_capacity(groups.len());
    for (team, absorbed) in groups {
        let mut seen = HashSet::new();
        let mut member_ids = Vec::new();
        let mut schedules = Vec::new();
        let mut policies = Vec::new();

        for source in std::iter::once(&team).chain(absorbed.iter()) {
            for member in store.team_member_ids(&source.id).await? {
                if seen.insert(member.clone()) {
                    member_ids.push(member);
                }
            }
            schedules.extend(store.team_schedules(&source.id).await?);
            policies.extend(store.team_escalation_policies(&source.id).await?);
        }
        member_ids.sort_by_key(|id| user_order.get(id).copied().unwrap_or(usize::MAX));

        if !absorbed.is_empty() {
            debug!(team_id = %team.id, absorbed = absorbed.len(), members = member_ids.len(), "consolidated proxied teams");
        }
        out.push(ConsolidatedTeam {
            team,
            absorbed,
            member_ids,
            schedules,
            policies,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::{LegacyTeam, LegacyUser};

    fn record(id: &str, proxy_for: Option<&str>) -> TeamRecord {
        TeamRecord {
            id: id.into(),
            name: id.into(),
            slug: id.to_lowercase(),
            proxy_for: proxy_for.map(str::to_string),
            target: None,
        }
    }

    #[test]
    fn chains_and_self_proxies_are_rejected() {
        let chain = [record("K", None), record("S1", Some("K")), record("S2", Some("S1"))];
        assert!(matches!(plan(&chain), Err(ConsolidationError::ProxyChain { .. })));

        let selfish = [record("K", Some("K"))];
        assert!(matches!(plan(&selfish), Err(ConsolidationError::SelfProxy { .. })));
    }

    #[test]
    fn roots_keep_ingestion_order() {
        let teams = [
            record("S1", Some("K")),
            record("A", None),
            record("K", None),
            record("S2", Some("K")),
        ];
        let groups = plan(&teams).unwrap();
        let ids: Vec<_> = groups
            .iter()
            .map(|(root, folded)| {
                (
                    root.id.as_str(),
                    folded.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
                )
            })
            .collect();
        assert_eq!(ids, vec![("A", vec![]), ("K", vec!["S1", "S2"])]);
    }

    #[tokio::test]
    async fn proxy_members_are_the_deduplicated_union() {
        let store = StagingStore::open_in_memory().await.unwrap();
        let users: Vec<_> = ["u1", "u2", "u3", "u4"]
            .iter()
            .map(|id| LegacyUser {
                id: id.to_string(),
                name: id.to_string(),
                email: format!("{id}@x.com"),
            })
            .collect();
        store.ingest_users(&users).await.unwrap();
        let team = |id: &str, proxy: Option<&str>, members: &[&str]| LegacyTeam {
            id: id.into(),
            name: id.into(),
            slug: id.to_lowercase(),
            proxy_for: proxy.map(str::to_string),
            member_ids: members.iter().map(|m| m.to_string()).collect(),
        };
        store
            .ingest_teams(&[
                team("K", None, &["u4"]),
                team("S1", Some("K"), &["u2", "u1"]),
                team("S2", Some("K"), &["u3", "u2"]),
            ])
            .await
            .unwrap();

        let consolidated = consolidate(&store).await.unwrap();
        assert_eq!(consolidated.len(), 1);
        let k = &consolidated[0];
        assert_eq!(k.team.id, "K");
        assert_eq!(k.member_ids, vec!["u1", "u2", "u3", "u4"]);
        assert_eq!(k.absorbed.len(), 2);
    }
}
