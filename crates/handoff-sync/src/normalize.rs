//! Legacy rotations and escalation policies in the target platform's vocabulary.

use chrono::{DateTime, Datelike, NaiveTime, Weekday};
use chrono_tz::Tz;
use handoff_core::{EscalationPolicyRecord, ScheduleRecord, Strategy};
use serde::Serialize;
use thiserror::Error;

/// Step timeout for policies synthesized for teams that had none.
pub const DEFAULT_STEP_TIMEOUT_SECONDS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleClassificationError {
    #[error("schedule {schedule_id} has an unsupported rotation turn length of {seconds}s")]
    UnknownStrategy { schedule_id: String, seconds: i64 },
    #[error("schedule {schedule_id} has an unknown time zone {time_zone:?}")]
    InvalidTimeZone {
        schedule_id: String,
        time_zone: String,
    },
    #[error("schedule {schedule_id} has an unparseable rotation start {start:?}")]
    InvalidStart { schedule_id: String, start: String },
}

impl ScheduleClassificationError {
    pub fn schedule_id(&self) -> &str {
        match self {
            ScheduleClassificationError::UnknownStrategy { schedule_id, .. }
            | ScheduleClassificationError::InvalidTimeZone { schedule_id, .. }
            | ScheduleClassificationError::InvalidStart { schedule_id, .. } => schedule_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRotation {
    pub schedule_id: String,
    pub name: String,
    pub description: String,
    pub time_zone: String,
    pub strategy: Strategy,
    pub handoff_time: NaiveTime,
    pub handoff_day: Weekday,
    /// Handoff sequence exactly as staged, repeats included.
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedStep {
    pub schedule_id: String,
    pub timeout_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedPolicy {
    pub id: String,
    pub name: String,
    pub steps: Vec<NormalizedStep>,
    pub synthesized: bool,
}

pub fn classify(rotation_turn_length_seconds: i64) -> Strategy {
    Strategy::from_turn_length(rotation_turn_length_seconds)
}

/// The handoff point is the rotation start seen from the schedule's own zone.
pub fn normalize_schedule(
    schedule: &ScheduleRecord,
    member_ids: Vec<String>,
) -> Result<NormalizedRotation, ScheduleClassificationError> {
    let strategy = classify(schedule.rotation_turn_length_seconds);
    if strategy == Strategy::Unknown {
        return Err(ScheduleClassificationError::UnknownStrategy {
            schedule_id: schedule.id.clone(),
            seconds: schedule.rotation_turn_length_seconds,
        });
    }

    let tz: Tz = schedule.time_zone.parse().map_err(|_| {
        ScheduleClassificationError::InvalidTimeZone {
            schedule_id: schedule.id.clone(),
            time_zone: schedule.time_zone.clone(),
        }
    })?;
    let start = DateTime::parse_from_rfc3339(&schedule.rotation_start)
        .map_err(|_| ScheduleClassificationError::InvalidStart {
            schedule_id: schedule.id.clone(),
            start: schedule.rotation_start.clone(),
        })?
        .with_timezone(&tz);

    Ok(NormalizedRotation {
        schedule_id: schedule.id.clone(),
        name: schedule.name.clone(),
        description: schedule.description.clone(),
        time_zone: schedule.time_zone.clone(),
        strategy,
        handoff_time: start.time(),
        handoff_day: start.weekday(),
        member_ids,
    })
}

/// One step per level, in level order.
pub fn normalize_policy(policy: &EscalationPolicyRecord) -> NormalizedPolicy {
    NormalizedPolicy {
        id: policy.id.clone(),
        name: policy.name.clone(),
        steps: policy
            .levels
            .iter()
            .map(|level| NormalizedStep {
                schedule_id: level.target_schedule_id.clone(),
                timeout_seconds: level.timeout_seconds,
            })
            .collect(),
        synthesized: false,
    }
}

/// Fallback policy paging each of the team's rotations in turn.
pub fn default_policy(team_id: &str, team_name: &str, rotations: &[NormalizedRotation]) -> NormalizedPolicy {
    NormalizedPolicy {
        id: format!("{team_id}-default"),
        name: format!("{team_name} default escalation"),
        steps: rotations
            .iter()
            .map(|r| NormalizedStep {
                schedule_id: r.schedule_id.clone(),
                timeout_seconds: DEFAULT_STEP_TIMEOUT_SECONDS,
            })
            .collect(),
        synthesized: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::EscalationLevel;

    fn schedule(turn: i64, tz: &str, start: &str) -> ScheduleRecord {
        ScheduleRecord {
            id: "S1".into(),
            name: "SRE Primary".into(),
            description: String::new(),
            team_id: "T1".into(),
            time_zone: tz.into(),
            rotation_id: "R1".into(),
            rotation_turn_length_seconds: turn,
            rotation_start: start.into(),
            layer_count: 1,
        }
    }

    #[test]
    fn turn_lengths_classify_and_unknown_is_an_error() {
        assert_eq!(classify(86_400), Strategy::Daily);
        assert_eq!(classify(604_800), Strategy::Weekly);
        assert_eq!(classify(100), Strategy::Unknown);

        let err = normalize_schedule(&schedule(100, "UTC", "2024-01-01T09:00:00Z"), vec![])
            .unwrap_err();
        assert_eq!(
            err,
            ScheduleClassificationError::UnknownStrategy {
                schedule_id: "S1".into(),
                seconds: 100
            }
        );
    }

    #[test]
    fn weekly_handoff_comes_from_the_start_timestamp() {
        let members = vec!["alice".to_string(), "bob".to_string(), "bob".to_string()];
        let rotation =
            normalize_schedule(&schedule(604_800, "UTC", "2024-01-01T09:00:00Z"), members.clone())
                .unwrap();
        assert_eq!(rotation.strategy, Strategy::Weekly);
        assert_eq!(rotation.handoff_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(rotation.handoff_day, Weekday::Mon);
        assert_eq!(rotation.member_ids, members);
    }

    #[test]
    fn handoff_is_read_in_the_schedule_time_zone() {
        // 02:30 UTC on a Monday is still Sunday evening in New York.
        let rotation = normalize_schedule(
            &schedule(86_400, "America/New_York", "2024-01-08T02:30:00Z"),
            vec![],
        )
        .unwrap();
        assert_eq!(rotation.handoff_time, NaiveTime::from_hms_opt(21, 30, 0).unwrap());
        assert_eq!(rotation.handoff_day, Weekday::Sun);
    }

    #[test]
    fn bad_zone_and_start_are_classification_errors() {
        assert!(matches!(
            normalize_schedule(&schedule(86_400, "Mars/Olympus", "2024-01-01T00:00:00Z"), vec![]),
            Err(ScheduleClassificationError::InvalidTimeZone { .. })
        ));
        assert!(matches!(
            normalize_schedule(&schedule(86_400, "UTC", "yesterday"), vec![]),
            Err(ScheduleClassificationError::InvalidStart { .. })
        ));
    }

    #[test]
    fn policy_levels_keep_their_order() {
        let policy = EscalationPolicyRecord {
            id: "P1".into(),
            name: "SRE".into(),
            team_id: "T1".into(),
            levels: vec![
                EscalationLevel {
                    target_schedule_id: "S2".into(),
                    timeout_seconds: 1800,
                },
                EscalationLevel {
                    target_schedule_id: "S1".into(),
                    timeout_seconds: 60,
                },
            ],
        };
        let normalized = normalize_policy(&policy);
        let order: Vec<_> = normalized.steps.iter().map(|s| s.schedule_id.as_str()).collect();
        assert_eq!(order, vec!["S2", "S1"]);
        assert!(!normalized.synthesized);
    }
}
