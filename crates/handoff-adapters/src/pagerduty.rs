//! PagerDuty REST v2 provider. Every list endpoint is drained through offset
//! pagination before the adapter returns.

use async_trait::async_trait;
use handoff_core::{
    local_slug, EscalationLevel, LegacyEscalationPolicy, LegacySchedule, LegacyTeam, LegacyUser,
    RotationLayer,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::http::{HttpClientConfig, HttpFetcher};
use crate::{AdapterError, ProviderAdapter};

pub const DEFAULT_BASE_URL: &str = "https://api.pagerduty.com";
const PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize)]
struct Reference {
    id: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PdUser {
    id: String,
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct PdTeam {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PdMember {
    user: Reference,
}

#[derive(Debug, Clone, Deserialize)]
struct PdScheduleSummary {
    id: String,
    #[serde(default)]
    teams: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct PdLayerUser {
    user: Reference,
}

#[derive(Debug, Deserialize)]
struct PdLayer {
    id: String,
    rotation_virtual_start: String,
    rotation_turn_length_seconds: i64,
    #[serde(default)]
    users: Vec<PdLayerUser>,
}

#[derive(Debug, Deserialize)]
struct PdSchedule {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    time_zone: String,
    #[serde(default)]
    schedule_layers: Vec<PdLayer>,
}

#[derive(Debug, Deserialize)]
struct ScheduleEnvelope {
    schedule: PdSchedule,
}

#[derive(Debug, Deserialize)]
struct PdRule {
    escalation_delay_in_minutes: i64,
    #[serde(default)]
    targets: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct PdPolicy {
    id: String,
    name: String,
    #[serde(default)]
    teams: Vec<Reference>,
    #[serde(default)]
    escalation_rules: Vec<PdRule>,
}

trait Paged {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, bool);
}

macro_rules! paged {
    ($page:ident, $field:ident, $item:ty) => {
        #[derive(Debug, Deserialize)]
        struct $page {
            #[serde(default)]
            $field: Vec<$item>,
            #[serde(default)]
            more: bool,
        }

        impl Paged for $page {
            type Item = $item;
            fn into_parts(self) -> (Vec<$item>, bool) {
                (self.$field, self.more)
            }
        }
    };
}

paged!(UsersPage, users, PdUser);
paged!(TeamsPage, teams, PdTeam);
paged!(MembersPage, members, PdMember);
paged!(SchedulesPage, schedules, PdScheduleSummary);
paged!(PoliciesPage, escalation_policies, PdPolicy);

#[derive(Debug, Clone)]
pub struct PagerDutyProvider {
    http: HttpFetcher,
    /// `/schedules` has no team filter; it is listed once and shared by
    /// every `team_schedules` call.
    schedule_summaries: OnceCell<Vec<PdScheduleSummary>>,
}

impl PagerDutyProvider {
    pub fn new(
        config: &HttpClientConfig,
        base_url: Option<&str>,
        token: &str,
    ) -> Result<Self, AdapterError> {
        let http = HttpFetcher::new(
            config,
            base_url.unwrap_or(DEFAULT_BASE_URL),
            &[
                ("authorization", format!("Token token={token}")),
                ("accept", "application/vnd.pagerduty+json;version=2".to_string()),
            ],
        )?;
        Ok(Self {
            http,
            schedule_summaries: OnceCell::new(),
        })
    }

    async fn schedule_summaries(&self) -> Result<&[PdScheduleSummary], AdapterError> {
        let summaries = self
            .schedule_summaries
            .get_or_try_init(|| async {
                let listed = self.drain::<SchedulesPage>("schedules").await?;
                info!(count = listed.len(), "listed pagerduty schedules");
                Ok::<_, AdapterError>(listed)
            })
            .await?;
        Ok(summaries)
    }

    async fn drain<P>(&self, path: &str) -> Result<Vec<P::Item>, AdapterError>
    where
        P: Paged + DeserializeOwned,
    {
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let query = [
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
            ];
            let page: P = self.http.get_json(path, &query).await?;
            let (items, more) = page.into_parts();
            let fetched = items.len();
            out.extend(items);
            debug!(path, offset, fetched, more, "pagerduty page");
            if !more || fetched == 0 {
                return Ok(out);
            }
            offset += fetched;
        }
    }
}

fn owned_by<'s>(
    summaries: &'s [PdScheduleSummary],
    team_id: &'s str,
) -> impl Iterator<Item = &'s str> + 's {
    summaries
        .iter()
        .filter(move |s| s.teams.iter().any(|t| t.id == team_id))
        .map(|s| s.id.as_str())
}

fn schedule_from_wire(team_id: &str, schedule: PdSchedule) -> LegacySchedule {
    LegacySchedule {
        id: schedule.id,
        name: schedule.name,
        description: schedule.description.unwrap_or_default(),
        team_id: team_id.to_string(),
        time_zone: schedule.time_zone,
        layers: schedule
            .schedule_layers
            .into_iter()
            .map(|layer| RotationLayer {
                id: layer.id,
                rotation_turn_length_seconds: layer.rotation_turn_length_seconds,
                rotation_start: layer.rotation_virtual_start,
                member_ids: layer.users.into_iter().map(|u| u.user.id).collect(),
            })
            .collect(),
    }
}

/// Each rule becomes one level aimed at its first schedule target. Rules that
/// only page users or services have no rotation to point at and are dropped.
fn policy_from_wire(policy: PdPolicy) -> Option<LegacyEscalationPolicy> {
    let team_id = policy.teams.into_iter().next()?.id;
    let levels = policy
        .escalation_rules
        .into_iter()
        .filter_map(|rule| {
            let target = rule.targets.into_iter().find(|t| {
                matches!(
                    t.kind.as_deref(),
                    Some("schedule_reference") | Some("schedule")
                )
            })?;
            Some(EscalationLevel {
                target_schedule_id: target.id,
                timeout_seconds: rule.escalation_delay_in_minutes * 60,
            })
        })
        .collect();
    Some(LegacyEscalationPolicy {
        id: policy.id,
        name: policy.name,
        team_id,
        levels,
    })
}

#[async_trait]
impl ProviderAdapter for PagerDutyProvider {
    fn provider_id(&self) -> &'static str {
        "pagerduty"
    }

    async fn list_teams(&self) -> Result<Vec<LegacyTeam>, AdapterError> {
        let teams = self.drain::<TeamsPage>("teams").await?;
        let mut out = Vec::with_capacity(teams.len());
        for team in teams {
            let members = self
                .drain::<MembersPage>(&format!("teams/{}/members", team.id))
                .await?;
            out.push(LegacyTeam {
                slug: local_slug(&team.name),
                id: team.id,
                name: team.name,
                proxy_for: None,
                member_ids: members.into_iter().map(|m| m.user.id).collect(),
            });
        }
        info!(count = out.len(), "listed pagerduty teams");
        Ok(out)
    }

    async fn list_users(&self) -> Result<Vec<LegacyUser>, AdapterError> {
        let users = self.drain::<UsersPage>("users").await?;
        Ok(users
            .into_iter()
            .map(|u| LegacyUser {
                id: u.id,
                name: u.name,
                email: u.email,
            })
            .collect())
    }

    async fn team_schedules(&self, team_id: &str) -> Result<Vec<LegacySchedule>, AdapterError> {
        let summaries = self.schedule_summaries().await?;
        let mut out = Vec::new();
        for schedule_id in owned_by(summaries, team_id) {
            let envelope: ScheduleEnvelope = self
                .http
                .get_json(&format!("schedules/{schedule_id}"), &[])
                .await?;
            out.push(schedule_from_wire(team_id, envelope.schedule));
        }
        Ok(out)
    }

    async fn escalation_policies(&self) -> Result<Vec<LegacyEscalationPolicy>, AdapterError> {
        let policies = self.drain::<PoliciesPage>("escalation_policies").await?;
        let mut out = Vec::with_capacity(policies.len());
        for policy in policies {
            let id = policy.id.clone();
            match policy_from_wire(policy) {
                Some(policy) => out.push(policy),
                None => debug!(policy_id = %id, "skipping escalation policy without a team"),
            }
        }
        Ok(out)
    }
}
