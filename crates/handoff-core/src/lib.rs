//! Core domain model for on-call migration: legacy entities, target entities,
//! staged records carrying link state, and the normalized rotation vocabulary.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "handoff-core";

/// Team as represented by the legacy alerting provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTeam {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Legacy team that subsumes this one. Proxied teams are folded into their proxy.
    #[serde(default)]
    pub proxy_for: Option<String>,
    /// Legacy user ids; staged as unordered memberships.
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMembership {
    pub user_id: String,
    pub team_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRotationMember {
    pub rotation_id: String,
    pub user_id: String,
    pub order: i64,
}

/// One rotation layer of a legacy schedule, members in handoff sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationLayer {
    pub id: String,
    pub rotation_turn_length_seconds: i64,
    /// RFC 3339 timestamp of the first handoff.
    pub rotation_start: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySchedule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub team_id: String,
    pub time_zone: String,
    #[serde(default)]
    pub layers: Vec<RotationLayer>,
}

impl LegacySchedule {
    /// The earliest-starting layer; ties keep provider order and unparseable
    /// starts sort last.
    pub fn first_layer(&self) -> Option<&RotationLayer> {
        self.layers
            .iter()
            .enumerate()
            .min_by_key(|(idx, layer)| {
                let start = DateTime::parse_from_rfc3339(&layer.rotation_start).ok();
                (start.is_none(), start, *idx)
            })
            .map(|(_, layer)| layer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub target_schedule_id: String,
    pub timeout_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEscalationPolicy {
    pub id: String,
    pub name: String,
    pub team_id: String,
    #[serde(default)]
    pub levels: Vec<EscalationLevel>,
}

/// Team that already exists on the destination platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTeam {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Staged legacy team left-joined with its current link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub proxy_for: Option<String>,
    pub target: Option<TargetTeam>,
}

impl TeamRecord {
    pub fn is_proxied(&self) -> bool {
        self.proxy_for.is_some()
    }
}

/// Staged legacy user left-joined with its current link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub target: Option<TargetUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub team_id: String,
    pub time_zone: String,
    pub rotation_id: String,
    pub rotation_turn_length_seconds: i64,
    pub rotation_start: String,
    /// Number of layers the provider reported; only the first is staged.
    pub layer_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicyRecord {
    pub id: String,
    pub name: String,
    pub team_id: String,
    pub levels: Vec<EscalationLevel>,
}

/// Normalized on-call cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    Daily,
    Weekly,
    /// Reserved; no turn length classifies to it.
    Fortnightly,
    Unknown,
}

impl Strategy {
    pub const DAY_SECONDS: i64 = 86_400;
    pub const WEEK_SECONDS: i64 = 604_800;

    pub fn from_turn_length(seconds: i64) -> Self {
        match seconds {
            Self::DAY_SECONDS => Strategy::Daily,
            Self::WEEK_SECONDS => Strategy::Weekly,
            _ => Strategy::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Daily => "daily",
            Strategy::Weekly => "weekly",
            Strategy::Fortnightly => "fortnightly",
            Strategy::Unknown => "unknown",
        }
    }

    /// Whether the target rotation needs a weekday for its handoff point.
    pub fn uses_handoff_day(&self) -> bool {
        matches!(self, Strategy::Weekly | Strategy::Fortnightly)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-cases ASCII, collapses every non-alphanumeric run into `separator`
/// and trims separators from both ends.
pub fn slugify(input: &str, separator: char) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;
    for ch in input.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push(separator);
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Slug used for locally generated `slug` fields on legacy teams.
pub fn local_slug(name: &str) -> String {
    slugify(name, '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_runs_and_trims() {
        assert_eq!(slugify("  Site Reliability -- Team! ", '_'), "site_reliability_team");
        assert_eq!(slugify("a.b@x.com", '_'), "a_b_x_com");
        assert_eq!(slugify("!!!", '_'), "");
        assert_eq!(local_slug("SRE On-Call"), "sre-on-call");
    }

    #[test]
    fn strategy_classification_by_turn_length() {
        assert_eq!(Strategy::from_turn_length(86_400), Strategy::Daily);
        assert_eq!(Strategy::from_turn_length(604_800), Strategy::Weekly);
        assert_eq!(Strategy::from_turn_length(100), Strategy::Unknown);
        assert_eq!(Strategy::from_turn_length(1_209_600), Strategy::Unknown);
    }

    #[test]
    fn first_layer_prefers_earliest_start() {
        let layer = |id: &str, start: &str| RotationLayer {
            id: id.to_string(),
            rotation_turn_length_seconds: 86_400,
            rotation_start: start.to_string(),
            member_ids: vec![],
        };
        let schedule = LegacySchedule {
            id: "S".into(),
            name: "Primary".into(),
            description: String::new(),
            team_id: "T".into(),
            time_zone: "UTC".into(),
            layers: vec![
                layer("late", "2024-02-01T00:00:00Z"),
                layer("early", "2024-01-01T00:00:00Z"),
                layer("early-dup", "2024-01-01T00:00:00Z"),
            ],
        };
        assert_eq!(schedule.first_layer().map(|l| l.id.as_str()), Some("early"));
    }

    #[test]
    fn legacy_team_deserializes_without_optional_fields() {
        let team: LegacyTeam =
            serde_json::from_str(r#"{"id":"T1","name":"SRE","slug":"sre"}"#).unwrap();
        assert_eq!(team.proxy_for, None);
        assert!(team.member_ids.is_empty());
    }
}
