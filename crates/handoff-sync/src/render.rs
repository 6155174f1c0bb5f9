//! Deterministic HCL rendering of the reconciled model.
//!
//! Output order is fixed: header, users in ingestion order, then each
//! consolidated team in ingestion order with its memberships, rotations and
//! escalation policies. Nothing here iterates a hash map while writing.

use chrono::Weekday;
use handoff_core::{TeamRecord, UserRecord};
use serde::Serialize;

use crate::naming::{canonical_name, composite_name, NameRegistry, RenderIntegrityError};
use crate::normalize::{NormalizedPolicy, NormalizedRotation};

const USER_BLOCK: &str = "firehydrant_user";
const TEAM_BLOCK: &str = "firehydrant_team";
const MEMBERSHIP_BLOCK: &str = "firehydrant_team_membership";
const ROTATION_BLOCK: &str = "firehydrant_on_call_schedule";
const POLICY_BLOCK: &str = "firehydrant_escalation_policy";

const HEADER: &str = r#"# Generated by handoff from a reconciled staging store.
# Unlinked teams and users keep their legacy identity and will not apply cleanly.

terraform {
  required_providers {
    firehydrant = {
      source  = "firehydrant/firehydrant"
      version = "~> 0.8"
    }
  }
}

provider "firehydrant" {}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTeam {
    pub team: TeamRecord,
    /// Ids of proxied teams folded into this one.
    pub absorbed_ids: Vec<String>,
    pub member_ids: Vec<String>,
    pub rotations: Vec<NormalizedRotation>,
    pub policies: Vec<NormalizedPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderModel {
    pub users: Vec<UserRecord>,
    pub teams: Vec<RenderTeam>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub users: usize,
    pub teams: usize,
    pub memberships: usize,
    pub rotations: usize,
    pub escalation_policies: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub text: String,
    pub stats: RenderStats,
}

enum Value {
    Str(String),
    Expr(String),
    List(Vec<Value>),
}

struct Block {
    header: String,
    comments: Vec<String>,
    attrs: Vec<(&'static str, Value)>,
    children: Vec<Block>,
}

impl Block {
    fn new(header: String) -> Self {
        Self {
            header,
            comments: Vec::new(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    fn comment(mut self, text: impl AsRef<str>) -> Self {
        self.comments.push(text.as_ref().replace(['\n', '\r'], " "));
        self
    }

    fn attr(mut self, key: &'static str, value: Value) -> Self {
        self.attrs.push((key, value));
        self
    }

    fn child(mut self, block: Block) -> Self {
        self.children.push(block);
        self
    }

    fn write(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        for comment in &self.comments {
            out.push_str(&format!("{pad}# {comment}\n"));
        }
        if self.attrs.is_empty() && self.children.is_empty() {
            out.push_str(&format!("{pad}{} {{}}\n", self.header));
            return;
        }
        out.push_str(&format!("{pad}{} {{\n", self.header));
        let width = self.attrs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in &self.attrs {
            out.push_str(&format!("{pad}  {key:<width$} = "));
            write_value(out, value, depth + 1);
            out.push('\n');
        }
        for (idx, child) in self.children.iter().enumerate() {
            if idx > 0 || !self.attrs.is_empty() {
                out.push('\n');
            }
            child.write(out, depth + 1);
        }
        out.push_str(&format!("{pad}}}\n"));
    }
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Str(s) => {
            out.push('"');
            out.push_str(&escape(s));
            out.push('"');
        }
        Value::Expr(e) => out.push_str(e),
        Value::List(items) if items.is_empty() => out.push_str("[]"),
        Value::List(items) => {
            let pad = "  ".repeat(depth);
            out.push_str("[\n");
            for item in items {
                out.push_str(&pad);
                out.push_str("  ");
                write_value(out, item, depth + 1);
                out.push_str(",\n");
            }
            out.push_str(&pad);
            out.push(']');
        }
    }
}

/// Escapes a string for an HCL quoted literal, template sequences included.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(ch);
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}

/// ISO 8601 duration, e.g. `PT5M` or `PT1H30M`.
pub fn iso_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if seconds == 0 {
        return "PT0S".to_string();
    }
    let mut out = String::from("PT");
    if h > 0 {
        out.push_str(&format!("{h}H"));
    }
    if m > 0 {
        out.push_str(&format!("{m}M"));
    }
    if s > 0 {
        out.push_str(&format!("{s}S"));
    }
    out
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn data_ref(block: &str, name: &str) -> Value {
    Value::Expr(format!("data.{block}.{name}.id"))
}

fn resource_ref(block: &str, name: &str) -> Value {
    Value::Expr(format!("{block}.{name}.id"))
}

fn membership_key(team_id: &str, user_id: &str) -> String {
    format!("{team_id}/{user_id}")
}

/// Claims every block name up front so forward references (a step pointing at
/// another team's rotation) resolve and collisions fail before any output.
/// Each entity gets its plain name when free, else the name qualified with
/// its legacy id. Claims run in model order, so names are stable per store.
fn claim_names(model: &RenderModel) -> Result<NameRegistry, RenderIntegrityError> {
    let mut names = NameRegistry::new();
    for user in &model.users {
        names.claim_or_qualify(
            USER_BLOCK,
            &user.id,
            canonical_name(&user.email),
            composite_name(&[&user.email, &user.id]),
        )?;
    }
    for rt in &model.teams {
        let team = &rt.team;
        names.claim_or_qualify(
            TEAM_BLOCK,
            &team.id,
            canonical_name(&team.name),
            composite_name(&[&team.name, &team.id]),
        )?;
        for user_id in &rt.member_ids {
            let user = model
                .users
                .iter()
                .find(|u| &u.id == user_id)
                .ok_or_else(|| RenderIntegrityError::DanglingReference {
                    block: MEMBERSHIP_BLOCK,
                    from: team.id.clone(),
                    to: user_id.clone(),
                })?;
            names.claim_or_qualify(
                MEMBERSHIP_BLOCK,
                &membership_key(&team.id, user_id),
                composite_name(&[&team.name, &user.email]),
                composite_name(&[&team.name, &user.email, user_id]),
            )?;
        }
        for rotation in &rt.rotations {
            names.claim_or_qualify(
                ROTATION_BLOCK,
                &rotation.schedule_id,
                composite_name(&[&team.name, &rotation.name]),
                composite_name(&[&team.name, &rotation.name, &rotation.schedule_id]),
            )?;
        }
        for policy in &rt.policies {
            names.claim_or_qualify(
                POLICY_BLOCK,
                &policy.id,
                composite_name(&[&team.name, &policy.name]),
                composite_name(&[&team.name, &policy.name, &policy.id]),
            )?;
        }
    }
    Ok(names)
}

fn lookup<'n>(
    names: &'n NameRegistry,
    block: &'static str,
    from: &str,
    to: &str,
) -> Result<&'n str, RenderIntegrityError> {
    names
        .lookup(block, to)
        .ok_or_else(|| RenderIntegrityError::DanglingReference {
            block,
            from: from.to_string(),
            to: to.to_string(),
        })
}

pub fn render(model: &RenderModel) -> Result<RenderedDocument, RenderIntegrityError> {
    let names = claim_names(model)?;
    let mut stats = RenderStats::default();
    let mut blocks = Vec::new();

    for user in &model.users {
        let name = lookup(&names, USER_BLOCK, &user.id, &user.id)?;
        let block = Block::new(format!("data \"{USER_BLOCK}\" \"{name}\""));
        let block = match &user.target {
            Some(target) => block.attr("email", Value::Str(target.email.clone())),
            None => block
                .comment(format!("unlinked: legacy user {} ({})", user.id, user.name))
                .attr("email", Value::Str(user.email.clone())),
        };
        blocks.push(block);
        stats.users += 1;
    }

    for rt in &model.teams {
        let team = &rt.team;
        let team_name = lookup(&names, TEAM_BLOCK, &team.id, &team.id)?;

        let mut block = Block::new(format!("data \"{TEAM_BLOCK}\" \"{team_name}\""));
        block = match &team.target {
            Some(target) => block
                .comment(format!("legacy team {} ({})", team.id, team.name))
                .attr("id", Value::Str(target.id.clone())),
            None => block
                .comment(format!("unlinked: legacy team {} ({})", team.id, team.name))
                .attr("id", Value::Str(team.id.clone())),
        };
        if !rt.absorbed_ids.is_empty() {
            block = block.comment(format!("absorbs proxied teams: {}", rt.absorbed_ids.join(", ")));
        }
        blocks.push(block);
        stats.teams += 1;

        for user_id in &rt.member_ids {
            let key = membership_key(&team.id, user_id);
            let name = lookup(&names, MEMBERSHIP_BLOCK, &team.id, &key)?;
            let user_name = lookup(&names, USER_BLOCK, &team.id, user_id)?;
            blocks.push(
                Block::new(format!("resource \"{MEMBERSHIP_BLOCK}\" \"{name}\""))
                    .attr("team_id", data_ref(TEAM_BLOCK, team_name))
                    .attr("user_id", data_ref(USER_BLOCK, user_name)),
            );
            stats.memberships += 1;
        }

        for rotation in &rt.rotations {
            let name = lookup(&names, ROTATION_BLOCK, &team.id, &rotation.schedule_id)?;
            let members = rotation
                .member_ids
                .iter()
                .map(|id| {
                    lookup(&names, USER_BLOCK, &rotation.schedule_id, id)
                        .map(|user| data_ref(USER_BLOCK, user))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut strategy = Block::new("strategy".to_string())
                .attr("type", Value::Str(rotation.strategy.as_str().to_string()))
                .attr(
                    "handoff_time",
                    Value::Str(rotation.handoff_time.format("%H:%M:%S").to_string()),
                );
            if rotation.strategy.uses_handoff_day() {
                strategy = strategy.attr("handoff_day", Value::Str(day_name(rotation.handoff_day).to_string()));
            }

            blocks.push(
                Block::new(format!("resource \"{ROTATION_BLOCK}\" \"{name}\""))
                    .attr("team_id", data_ref(TEAM_BLOCK, team_name))
                    .attr("name", Value::Str(rotation.name.clone()))
                    .attr("description", Value::Str(rotation.description.clone()))
                    .attr("time_zone", Value::Str(rotation.time_zone.clone()))
                    .attr("member_ids", Value::List(members))
                    .child(strategy),
            );
            stats.rotations += 1;
        }

        for policy in &rt.policies {
            let name = lookup(&names, POLICY_BLOCK, &team.id, &policy.id)?;
            let mut block = Block::new(format!("resource \"{POLICY_BLOCK}\" \"{name}\""));
            if policy.synthesized {
                block = block.comment("synthesized: legacy team had no escalation policy");
            }
            block = block
                .attr("team_id", data_ref(TEAM_BLOCK, team_name))
                .attr("name", Value::Str(policy.name.clone()));
            for step in &policy.steps {
                let rotation = lookup(&names, ROTATION_BLOCK, &policy.id, &step.schedule_id)?;
                block = block.child(
                    Block::new("step".to_string())
                        .attr("timeout", Value::Str(iso_duration(step.timeout_seconds)))
                        .child(
                            Block::new("targets".to_string())
                                .attr("type", Value::Str("OnCallSchedule".to_string()))
                                .attr("id", resource_ref(ROTATION_BLOCK, rotation)),
                        ),
                );
            }
            blocks.push(block);
            stats.escalation_policies += 1;
        }
    }

    let mut text = String::from(HEADER);
    for block in &blocks {
        text.push('\n');
        block.write(&mut text, 0);
    }
    Ok(RenderedDocument { text, stats })
}
