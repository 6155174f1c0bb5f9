use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use handoff_core::{
    EscalationLevel, EscalationPolicyRecord, LegacyEscalationPolicy, LegacySchedule, LegacyTeam,
    LegacyUser, ScheduleRecord, TargetTeam, TargetUser, TeamRecord, UserRecord,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

use crate::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS target_teams (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    retired_at TEXT
);

CREATE TABLE IF NOT EXISTS target_users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    retired_at TEXT
);

CREATE TABLE IF NOT EXISTS target_fetches (
    kind TEXT PRIMARY KEY,
    fetched_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ext_users (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    target_user_id TEXT REFERENCES target_users(id)
);

CREATE TABLE IF NOT EXISTS ext_teams (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    target_team_id TEXT REFERENCES target_teams(id),
    proxy_for TEXT REFERENCES ext_teams(id) DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS ext_memberships (
    user_id TEXT NOT NULL REFERENCES ext_users(id),
    team_id TEXT NOT NULL REFERENCES ext_teams(id),
    PRIMARY KEY (user_id, team_id)
);

CREATE TABLE IF NOT EXISTS ext_schedules (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    team_id TEXT NOT NULL REFERENCES ext_teams(id),
    time_zone TEXT NOT NULL,
    rotation_id TEXT NOT NULL,
    rotation_turn_length_seconds INTEGER NOT NULL,
    rotation_start TEXT NOT NULL,
    layer_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ext_rotation_members (
    rotation_id TEXT NOT NULL,
    user_id TEXT NOT NULL REFERENCES ext_users(id),
    member_order INTEGER NOT NULL,
    PRIMARY KEY (rotation_id, member_order)
);

CREATE TABLE IF NOT EXISTS ext_escalation_policies (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    team_id TEXT NOT NULL REFERENCES ext_teams(id)
);

CREATE TABLE IF NOT EXISTS ext_escalation_levels (
    policy_id TEXT NOT NULL REFERENCES ext_escalation_policies(id),
    level_order INTEGER NOT NULL,
    target_schedule_id TEXT NOT NULL,
    timeout_seconds INTEGER NOT NULL,
    PRIMARY KEY (policy_id, level_order)
);

CREATE TABLE IF NOT EXISTS ext_rejected_schedules (
    id TEXT PRIMARY KEY,
    reason TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ext_memberships_team_idx ON ext_memberships(team_id);
CREATE INDEX IF NOT EXISTS ext_schedules_team_idx ON ext_schedules(team_id);
CREATE INDEX IF NOT EXISTS ext_escalation_policies_team_idx ON ext_escalation_policies(team_id);
"#;

/// Which target-platform cache a read-through lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Teams,
    Users,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Teams => "teams",
            TargetKind::Users => "users",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestCounts {
    pub upserted: usize,
    /// Legacy ids that were not staged.
    pub rejected: Vec<String>,
    pub skipped_memberships: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub users: i64,
    pub linked_users: i64,
    pub teams: i64,
    pub linked_teams: i64,
    pub proxied_teams: i64,
    pub schedules: i64,
    pub escalation_policies: i64,
    pub target_teams: i64,
    pub target_users: i64,
}

/// Embedded relational projection of legacy entities, cached target entities
/// and the links between them. Holds no migration semantics of its own.
#[derive(Debug, Clone)]
pub struct StagingStore {
    pool: SqlitePool,
}

impl StagingStore {
    /// A private store that lives as long as this handle.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::from_sqlx("parsing in-memory connect options", e))?
            .foreign_keys(true);
        // A single connection that never idles out: dropping it drops the database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::from_sqlx("opening in-memory staging store", e))?;
        Self::with_pool(pool).await
    }

    /// Create or reopen a file-backed store.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| {
                StoreError::from_sqlx(format!("opening staging store {}", path.display()), e)
            })?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::from_sqlx("creating staging schema", e))?;
        Ok(Self { pool })
    }

    #[instrument(skip_all, fields(count = users.len()))]
    pub async fn ingest_users(&self, users: &[LegacyUser]) -> StoreResult<IngestCounts> {
        let mut tx = self.begin("ingesting users").await?;
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO ext_users (id, name, email)
                VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email
                "#,
            )
            .bind(&user.id)
            .bind(&user.name)
            .bind(&user.email)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("ingesting user {}", user.id), e))?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx("committing users", e))?;

        Ok(IngestCounts {
            upserted: users.len(),
            ..IngestCounts::default()
        })
    }

    /// Upserts teams and replaces each team's membership set. Teams whose
    /// proxy is neither accepted from the batch nor already staged are
    /// skipped, as are memberships naming users that were never ingested.
    #[instrument(skip_all, fields(count = teams.len()))]
    pub async fn ingest_teams(&self, teams: &[LegacyTeam]) -> StoreResult<IngestCounts> {
        let staged: HashSet<String> = self.team_ids().await?.into_iter().collect();
        let accepted = accepted_teams(teams, &staged);
        let known_users: HashSet<String> = self.user_ids().await?.into_iter().collect();

        let mut counts = IngestCounts::default();
        let mut tx = self.begin("ingesting teams").await?;
        for team in teams {
            if !accepted.contains(team.id.as_str()) {
                warn!(
                    team_id = %team.id,
                    proxy_for = team.proxy_for.as_deref().unwrap_or_default(),
                    "skipping team with unknown proxy"
                );
                counts.rejected.push(team.id.clone());
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO ext_teams (id, name, slug, proxy_for)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    slug = excluded.slug,
                    proxy_for = excluded.proxy_for
                "#,
            )
            .bind(&team.id)
            .bind(&team.name)
            .bind(&team.slug)
            .bind(&team.proxy_for)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("ingesting team {}", team.id), e))?;

            sqlx::query("DELETE FROM ext_memberships WHERE team_id = ?")
                .bind(&team.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::from_sqlx(format!("clearing members of {}", team.id), e))?;

            for user_id in &team.member_ids {
                if !known_users.contains(user_id) {
                    debug!(team_id = %team.id, user_id = %user_id, "skipping membership of unknown user");
                    counts.skipped_memberships += 1;
                    continue;
                }
                sqlx::query("INSERT OR IGNORE INTO ext_memberships (user_id, team_id) VALUES (?, ?)")
                    .bind(user_id)
                    .bind(&team.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        StoreError::from_sqlx(format!("adding {user_id} to team {}", team.id), e)
                    })?;
            }
            counts.upserted += 1;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx("committing teams", e))?;
        Ok(counts)
    }

    /// Stages a schedule and its first rotation layer, members in order 0..n.
    pub async fn ingest_schedule(&self, schedule: &LegacySchedule) -> StoreResult<()> {
        let layer = schedule.first_layer().ok_or_else(|| StoreError::Invalid {
            kind: "schedule",
            id: schedule.id.clone(),
            reason: "schedule has no rotation layers".to_string(),
        })?;
        if schedule.layers.len() > 1 {
            warn!(
                schedule_id = %schedule.id,
                layers = schedule.layers.len(),
                rotation_id = %layer.id,
                "only the first rotation layer is migrated"
            );
        }

        let mut tx = self.begin("ingesting schedule").await?;
        sqlx::query(
            r#"
            INSERT INTO ext_schedules (
                id, name, description, team_id, time_zone, rotation_id,
                rotation_turn_length_seconds, rotation_start, layer_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                team_id = excluded.team_id,
                time_zone = excluded.time_zone,
                rotation_id = excluded.rotation_id,
                rotation_turn_length_seconds = excluded.rotation_turn_length_seconds,
                rotation_start = excluded.rotation_start,
                layer_count = excluded.layer_count
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.name)
        .bind(&schedule.description)
        .bind(&schedule.team_id)
        .bind(&schedule.time_zone)
        .bind(&layer.id)
        .bind(layer.rotation_turn_length_seconds)
        .bind(&layer.rotation_start)
        .bind(schedule.layers.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("ingesting schedule {}", schedule.id), e))?;

        sqlx::query("DELETE FROM ext_rotation_members WHERE rotation_id = ?")
            .bind(&layer.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("clearing rotation {}", layer.id), e))?;

        for (order, user_id) in layer.member_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO ext_rotation_members (rotation_id, user_id, member_order) VALUES (?, ?, ?)",
            )
            .bind(&layer.id)
            .bind(user_id)
            .bind(order as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::from_sqlx(format!("adding {user_id} to rotation {}", layer.id), e)
            })?;
        }

        sqlx::query("DELETE FROM ext_rejected_schedules WHERE id = ?")
            .bind(&schedule.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("clearing rejection of {}", schedule.id), e))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx(format!("committing schedule {}", schedule.id), e))
    }

    /// Records a schedule refused at ingestion and drops any copy staged by
    /// an earlier run, so every later render of this store treats it alike.
    pub async fn reject_schedule(&self, schedule_id: &str, reason: &str) -> StoreResult<()> {
        let mut tx = self.begin("rejecting schedule").await?;
        sqlx::query(
            r#"
            DELETE FROM ext_rotation_members
             WHERE rotation_id IN (SELECT rotation_id FROM ext_schedules WHERE id = ?)
            "#,
        )
        .bind(schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("clearing rotation of {schedule_id}"), e))?;

        sqlx::query("DELETE FROM ext_schedules WHERE id = ?")
            .bind(schedule_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("unstaging schedule {schedule_id}"), e))?;

        sqlx::query(
            r#"
            INSERT INTO ext_rejected_schedules (id, reason) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET reason = excluded.reason
            "#,
        )
        .bind(schedule_id)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("rejecting schedule {schedule_id}"), e))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx(format!("committing rejection of {schedule_id}"), e))
    }

    pub async fn rejected_schedule_ids(&self) -> StoreResult<Vec<String>> {
        self.ids(
            "SELECT id FROM ext_rejected_schedules ORDER BY id",
            "listing rejected schedules",
        )
        .await
    }

    pub async fn ingest_escalation_policy(&self, policy: &LegacyEscalationPolicy) -> StoreResult<()> {
        let mut tx = self.begin("ingesting escalation policy").await?;
        sqlx::query(
            r#"
            INSERT INTO ext_escalation_policies (id, name, team_id)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                team_id = excluded.team_id
            "#,
        )
        .bind(&policy.id)
        .bind(&policy.name)
        .bind(&policy.team_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("ingesting escalation policy {}", policy.id), e))?;

        sqlx::query("DELETE FROM ext_escalation_levels WHERE policy_id = ?")
            .bind(&policy.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("clearing levels of {}", policy.id), e))?;

        for (order, level) in policy.levels.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO ext_escalation_levels (policy_id, level_order, target_schedule_id, timeout_seconds)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&policy.id)
            .bind(order as i64)
            .bind(&level.target_schedule_id)
            .bind(level.timeout_seconds)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("adding level {order} to {}", policy.id), e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx(format!("committing escalation policy {}", policy.id), e))
    }

    pub async fn target_cache_filled(&self, kind: TargetKind) -> StoreResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM target_fetches WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("reading target cache state", e))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::from_sqlx("reading target cache state", e))?;
        Ok(n > 0)
    }

    /// Forget which target caches were filled so the next lookup refetches.
    /// Cached rows stay because links may reference them.
    pub async fn invalidate_target_cache(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM target_fetches")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("invalidating target cache", e))?;
        Ok(())
    }

    /// Replaces the cached target teams with a fresh fetch. Rows missing
    /// from it are kept, since links may name them, but marked retired.
    pub async fn cache_target_teams(&self, teams: &[TargetTeam]) -> StoreResult<()> {
        let mut tx = self.begin("caching target teams").await?;
        retire_all(&mut tx, TargetKind::Teams).await?;
        for team in teams {
            sqlx::query(
                r#"
                INSERT INTO target_teams (id, name, slug, retired_at) VALUES (?, ?, ?, NULL)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    slug = excluded.slug,
                    retired_at = NULL
                "#,
            )
            .bind(&team.id)
            .bind(&team.name)
            .bind(&team.slug)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("caching target team {}", team.id), e))?;
        }
        mark_fetched(&mut tx, TargetKind::Teams).await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx("committing target teams", e))
    }

    pub async fn cache_target_users(&self, users: &[TargetUser]) -> StoreResult<()> {
        let mut tx = self.begin("caching target users").await?;
        retire_all(&mut tx, TargetKind::Users).await?;
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO target_users (id, name, email, retired_at) VALUES (?, ?, ?, NULL)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    retired_at = NULL
                "#,
            )
            .bind(&user.id)
            .bind(&user.name)
            .bind(&user.email)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("caching target user {}", user.id), e))?;
        }
        mark_fetched(&mut tx, TargetKind::Users).await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx("committing target users", e))
    }

    /// Live target teams, retired ones excluded.
    pub async fn target_teams(&self) -> StoreResult<Vec<TargetTeam>> {
        let rows = sqlx::query(
            "SELECT id, name, slug FROM target_teams WHERE retired_at IS NULL ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("listing target teams", e))?;
        rows.iter()
            .map(|row| {
                Ok(TargetTeam {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    slug: row.try_get("slug")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::from_sqlx("decoding target teams", e))
    }

    pub async fn target_users(&self) -> StoreResult<Vec<TargetUser>> {
        let rows = sqlx::query(
            "SELECT id, name, email FROM target_users WHERE retired_at IS NULL ORDER BY email, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("listing target users", e))?;
        rows.iter()
            .map(|row| {
                Ok(TargetUser {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::from_sqlx("decoding target users", e))
    }

    /// Unlinks every legacy team whose target has been retired and returns
    /// the dropped `(legacy_id, target_id)` pairs in ingestion order.
    pub async fn release_retired_team_links(&self) -> StoreResult<Vec<(String, String)>> {
        self.release_retired_links(TargetKind::Teams).await
    }

    pub async fn release_retired_user_links(&self) -> StoreResult<Vec<(String, String)>> {
        self.release_retired_links(TargetKind::Users).await
    }

    async fn release_retired_links(&self, kind: TargetKind) -> StoreResult<Vec<(String, String)>> {
        let (legacy, column, target) = match kind {
            TargetKind::Teams => ("ext_teams", "target_team_id", "target_teams"),
            TargetKind::Users => ("ext_users", "target_user_id", "target_users"),
        };
        let operation = format!("releasing retired {} links", kind.as_str());
        let mut tx = self.begin(&operation).await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT l.id, l.{column} AS target_id
              FROM {legacy} l
              JOIN {target} t ON t.id = l.{column}
             WHERE t.retired_at IS NOT NULL
             ORDER BY l.seq
            "#
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(operation.as_str(), e))?;
        let released = rows
            .iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("target_id")?)))
            .collect::<Result<Vec<(String, String)>, sqlx::Error>>()
            .map_err(|e| StoreError::from_sqlx(operation.as_str(), e))?;

        sqlx::query(&format!(
            r#"
            UPDATE {legacy} SET {column} = NULL
             WHERE {column} IN (SELECT id FROM {target} WHERE retired_at IS NOT NULL)
            "#
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(operation.as_str(), e))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx(operation.as_str(), e))?;
        Ok(released)
    }

    /// All legacy teams in ingestion order, left-joined with their link.
    pub async fn teams(&self) -> StoreResult<Vec<TeamRecord>> {
        let rows = sqlx::query(&format!("{TEAM_SELECT} ORDER BY t.seq"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("listing teams", e))?;
        rows.iter()
            .map(team_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx("decoding teams", e))
    }

    pub async fn team(&self, id: &str) -> StoreResult<Option<TeamRecord>> {
        let row = sqlx::query(&format!("{TEAM_SELECT} WHERE t.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("loading team {id}"), e))?;
        row.as_ref()
            .map(team_from_row)
            .transpose()
            .map_err(|e| StoreError::from_sqlx(format!("decoding team {id}"), e))
    }

    /// All legacy users in ingestion order, left-joined with their link.
    pub async fn users(&self) -> StoreResult<Vec<UserRecord>> {
        let rows = sqlx::query(&format!("{USER_SELECT} ORDER BY u.seq"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("listing users", e))?;
        rows.iter()
            .map(user_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx("decoding users", e))
    }

    pub async fn user(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE u.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(format!("loading user {id}"), e))?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| StoreError::from_sqlx(format!("decoding user {id}"), e))
    }

    /// Member ids of a team, ordered by user ingestion order.
    pub async fn team_member_ids(&self, team_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT m.user_id
              FROM ext_memberships m
              JOIN ext_users u ON u.id = m.user_id
             WHERE m.team_id = ?
             ORDER BY u.seq
            "#,
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("listing members of {team_id}"), e))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("user_id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx("decoding memberships", e))
    }

    /// Schedules owned by a team, in ingestion order.
    pub async fn team_schedules(&self, team_id: &str) -> StoreResult<Vec<ScheduleRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, team_id, time_zone, rotation_id,
                   rotation_turn_length_seconds, rotation_start, layer_count
              FROM ext_schedules
             WHERE team_id = ?
             ORDER BY seq
            "#,
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("listing schedules of {team_id}"), e))?;
        rows.iter()
            .map(schedule_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx("decoding schedules", e))
    }

    pub async fn schedule_ids(&self) -> StoreResult<Vec<String>> {
        self.ids("SELECT id FROM ext_schedules ORDER BY seq", "listing schedule ids")
            .await
    }

    /// Rotation members sorted by `member_order`, duplicates kept.
    pub async fn rotation_member_ids(&self, rotation_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT user_id FROM ext_rotation_members WHERE rotation_id = ? ORDER BY member_order",
        )
        .bind(rotation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("listing rotation {rotation_id}"), e))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("user_id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx("decoding rotation members", e))
    }

    /// Escalation policies owned by a team, in ingestion order, levels in level order.
    pub async fn team_escalation_policies(
        &self,
        team_id: &str,
    ) -> StoreResult<Vec<EscalationPolicyRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, team_id FROM ext_escalation_policies WHERE team_id = ? ORDER BY seq",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("listing escalation policies of {team_id}"), e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| StoreError::from_sqlx("decoding escalation policy", e))?;
            let name: String = row
                .try_get("name")
                .map_err(|e| StoreError::from_sqlx("decoding escalation policy", e))?;
            let levels = self.escalation_levels(&id).await?;
            out.push(EscalationPolicyRecord {
                id,
                name,
                team_id: team_id.to_string(),
                levels,
            });
        }
        Ok(out)
    }

    async fn escalation_levels(&self, policy_id: &str) -> StoreResult<Vec<EscalationLevel>> {
        let rows = sqlx::query(
            r#"
            SELECT target_schedule_id, timeout_seconds
              FROM ext_escalation_levels
             WHERE policy_id = ?
             ORDER BY level_order
            "#,
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(format!("listing levels of {policy_id}"), e))?;
        rows.iter()
            .map(|row| {
                Ok(EscalationLevel {
                    target_schedule_id: row.try_get("target_schedule_id")?,
                    timeout_seconds: row.try_get("timeout_seconds")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::from_sqlx("decoding escalation levels", e))
    }

    /// Point a legacy team at a cached target team. Unknown or retired
    /// targets fail with [`StoreError::Constraint`].
    pub async fn link_team(&self, team_id: &str, target_team_id: &str) -> StoreResult<()> {
        let operation = format!("linking team {team_id} to {target_team_id}");
        self.ensure_live(TargetKind::Teams, target_team_id, &operation)
            .await?;
        let result = sqlx::query("UPDATE ext_teams SET target_team_id = ? WHERE id = ?")
            .bind(target_team_id)
            .bind(team_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(operation.as_str(), e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "team",
                id: team_id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn link_user(&self, user_id: &str, target_user_id: &str) -> StoreResult<()> {
        let operation = format!("linking user {user_id} to {target_user_id}");
        self.ensure_live(TargetKind::Users, target_user_id, &operation)
            .await?;
        let result = sqlx::query("UPDATE ext_users SET target_user_id = ? WHERE id = ?")
            .bind(target_user_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(operation.as_str(), e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "user",
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// A target missing from the cache is left to the foreign key.
    async fn ensure_live(&self, kind: TargetKind, target_id: &str, operation: &str) -> StoreResult<()> {
        let table = match kind {
            TargetKind::Teams => "target_teams",
            TargetKind::Users => "target_users",
        };
        let retired: Option<Option<String>> =
            sqlx::query_scalar(&format!("SELECT retired_at FROM {table} WHERE id = ?"))
                .bind(target_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::from_sqlx(operation, e))?;
        match retired {
            Some(Some(at)) => Err(StoreError::Constraint {
                operation: operation.to_string(),
                message: format!("target {target_id} was retired at {at}"),
            }),
            _ => Ok(()),
        }
    }

    pub async fn stats(&self) -> StoreResult<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM ext_users) AS users,
                (SELECT COUNT(*) FROM ext_users WHERE target_user_id IS NOT NULL) AS linked_users,
                (SELECT COUNT(*) FROM ext_teams) AS teams,
                (SELECT COUNT(*) FROM ext_teams WHERE target_team_id IS NOT NULL) AS linked_teams,
                (SELECT COUNT(*) FROM ext_teams WHERE proxy_for IS NOT NULL) AS proxied_teams,
                (SELECT COUNT(*) FROM ext_schedules) AS schedules,
                (SELECT COUNT(*) FROM ext_escalation_policies) AS escalation_policies,
                (SELECT COUNT(*) FROM target_teams WHERE retired_at IS NULL) AS target_teams,
                (SELECT COUNT(*) FROM target_users WHERE retired_at IS NULL) AS target_users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("reading store stats", e))?;

        let get = |col: &str| -> StoreResult<i64> {
            row.try_get(col)
                .map_err(|e| StoreError::from_sqlx("decoding store stats", e))
        };
        Ok(StoreStats {
            users: get("users")?,
            linked_users: get("linked_users")?,
            teams: get("teams")?,
            linked_teams: get("linked_teams")?,
            proxied_teams: get("proxied_teams")?,
            schedules: get("schedules")?,
            escalation_policies: get("escalation_policies")?,
            target_teams: get("target_teams")?,
            target_users: get("target_users")?,
        })
    }

    async fn team_ids(&self) -> StoreResult<Vec<String>> {
        self.ids("SELECT id FROM ext_teams ORDER BY seq", "listing team ids")
            .await
    }

    async fn user_ids(&self) -> StoreResult<Vec<String>> {
        self.ids("SELECT id FROM ext_users ORDER BY seq", "listing user ids")
            .await
    }

    async fn ids(&self, sql: &str, operation: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(operation, e))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx(operation, e))
    }

    async fn begin(&self, operation: &str) -> StoreResult<sqlx::Transaction<'_, sqlx::Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::from_sqlx(format!("{operation}: begin"), e))
    }
}

const TEAM_SELECT: &str = r#"
    SELECT t.id, t.name, t.slug, t.proxy_for,
           tt.id AS target_id, tt.name AS target_name, tt.slug AS target_slug
      FROM ext_teams t
      LEFT JOIN target_teams tt ON tt.id = t.target_team_id
"#;

const USER_SELECT: &str = r#"
    SELECT u.id, u.name, u.email,
           tu.id AS target_id, tu.name AS target_name, tu.email AS target_email
      FROM ext_users u
      LEFT JOIN target_users tu ON tu.id = u.target_user_id
"#;

/// Batch teams that can be staged. Refusing a team can strand teams that
/// proxy for it, so refusals repeat until none are left.
fn accepted_teams<'t>(teams: &'t [LegacyTeam], staged: &HashSet<String>) -> HashSet<&'t str> {
    let mut accepted: HashSet<&str> = teams.iter().map(|t| t.id.as_str()).collect();
    loop {
        let stranded: Vec<&str> = teams
            .iter()
            .filter(|t| accepted.contains(t.id.as_str()))
            .filter(|t| {
                t.proxy_for
                    .as_deref()
                    .is_some_and(|p| !accepted.contains(p) && !staged.contains(p))
            })
            .map(|t| t.id.as_str())
            .collect();
        if stranded.is_empty() {
            return accepted;
        }
        for id in stranded {
            accepted.remove(id);
        }
    }
}

/// Marks every live cached row of `kind` retired; the fetch that follows
/// revives what the platform still has.
async fn retire_all(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    kind: TargetKind,
) -> StoreResult<()> {
    let table = match kind {
        TargetKind::Teams => "target_teams",
        TargetKind::Users => "target_users",
    };
    sqlx::query(&format!(
        "UPDATE {table} SET retired_at = ? WHERE retired_at IS NULL"
    ))
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::from_sqlx(format!("retiring cached target {}", kind.as_str()), e))?;
    Ok(())
}

async fn mark_fetched(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    kind: TargetKind,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO target_fetches (kind, fetched_at) VALUES (?, ?)
        ON CONFLICT(kind) DO UPDATE SET fetched_at = excluded.fetched_at
        "#,
    )
    .bind(kind.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::from_sqlx(format!("marking target {} fetched", kind.as_str()), e))?;
    Ok(())
}

fn team_from_row(row: &SqliteRow) -> Result<TeamRecord, sqlx::Error> {
    let target_id: Option<String> = row.try_get("target_id")?;
    let target = match target_id {
        Some(id) => Some(TargetTeam {
            id,
            name: row.try_get("target_name")?,
            slug: row.try_get("target_slug")?,
        }),
        None => None,
    };
    Ok(TeamRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        proxy_for: row.try_get("proxy_for")?,
        target,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, sqlx::Error> {
    let target_id: Option<String> = row.try_get("target_id")?;
    let target = match target_id {
        Some(id) => Some(TargetUser {
            id,
            name: row.try_get("target_name")?,
            email: row.try_get("target_email")?,
        }),
        None => None,
    };
    Ok(UserRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        target,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<ScheduleRecord, sqlx::Error> {
    Ok(ScheduleRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        team_id: row.try_get("team_id")?,
        time_zone: row.try_get("time_zone")?,
        rotation_id: row.try_get("rotation_id")?,
        rotation_turn_length_seconds: row.try_get("rotation_turn_length_seconds")?,
        rotation_start: row.try_get("rotation_start")?,
        layer_count: row.try_get("layer_count")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::RotationLayer;

    fn user(id: &str, email: &str) -> LegacyUser {
        LegacyUser {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: email.to_string(),
        }
    }

    fn team(id: &str, name: &str, proxy_for: Option<&str>, members: &[&str]) -> LegacyTeam {
        LegacyTeam {
            id: id.to_string(),
            name: name.to_string(),
            slug: handoff_core::local_slug(name),
            proxy_for: proxy_for.map(str::to_string),
            member_ids: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn schedule(id: &str, team_id: &str, rotation_id: &str, members: &[&str]) -> LegacySchedule {
        LegacySchedule {
            id: id.to_string(),
            name: format!("{id} rotation"),
            description: String::new(),
            team_id: team_id.to_string(),
            time_zone: "UTC".to_string(),
            layers: vec![RotationLayer {
                id: rotation_id.to_string(),
                rotation_turn_length_seconds: 604_800,
                rotation_start: "2024-01-01T09:00:00Z".to_string(),
                member_ids: members.iter().map(|m| m.to_string()).collect(),
            }],
        }
    }

    async fn seeded() -> StagingStore {
        let store = StagingStore::open_in_memory().await.expect("open store");
        store
            .ingest_users(&[user("a", "a@x.com"), user("b", "b@x.com"), user("c", "c@x.com")])
            .await
            .expect("users");
        store
            .ingest_teams(&[team("T1", "SRE", None, &["a", "b"])])
            .await
            .expect("teams");
        store
    }

    #[tokio::test]
    async fn reingesting_the_same_response_does_not_duplicate_rows() {
        let store = seeded().await;
        store
            .ingest_users(&[user("a", "a@x.com"), user("b", "b@x.com"), user("c", "c@x.com")])
            .await
            .unwrap();
        store
            .ingest_teams(&[team("T1", "SRE", None, &["a", "b"])])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.users, 3);
        assert_eq!(stats.teams, 1);
        assert_eq!(store.team_member_ids("T1").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reingestion_overwrites_fields_but_keeps_order_and_links() {
        let store = seeded().await;
        store
            .cache_target_users(&[TargetUser {
                id: "F-a".into(),
                name: "A".into(),
                email: "a@x.com".into(),
            }])
            .await
            .unwrap();
        store.link_user("a", "F-a").await.unwrap();

        store
            .ingest_users(&[user("b", "b@new.com"), user("a", "a@x.com")])
            .await
            .unwrap();

        let users = store.users().await.unwrap();
        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(users[1].email, "b@new.com");
        assert_eq!(users[0].target.as_ref().map(|t| t.id.as_str()), Some("F-a"));
    }

    #[tokio::test]
    async fn rotation_members_keep_submission_order() {
        let store = seeded().await;
        store
            .ingest_schedule(&schedule("S1", "T1", "R1", &["c", "a", "b", "b"]))
            .await
            .unwrap();
        assert_eq!(
            store.rotation_member_ids("R1").await.unwrap(),
            vec!["c", "a", "b", "b"]
        );
        let stored: Vec<(String, i64)> = sqlx::query_as(
            "SELECT user_id, member_order FROM ext_rotation_members WHERE rotation_id = ? ORDER BY member_order",
        )
        .bind("R1")
        .fetch_all(&store.pool)
        .await
        .unwrap();
        assert_eq!(
            stored,
            vec![
                ("c".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("b".to_string(), 3),
            ]
        );

        store
            .ingest_schedule(&schedule("S1", "T1", "R1", &["a", "b", "c"]))
            .await
            .unwrap();
        assert_eq!(store.rotation_member_ids("R1").await.unwrap(), vec!["a", "b", "c"]);
        let orders: Vec<i64> = sqlx::query_scalar(
            "SELECT member_order FROM ext_rotation_members WHERE rotation_id = ? ORDER BY member_order",
        )
        .bind("R1")
        .fetch_all(&store.pool)
        .await
        .unwrap();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(store.team_schedules("T1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn linking_to_unknown_target_is_a_constraint_error() {
        let store = seeded().await;
        let err = store.link_team("T1", "does-not-exist").await.unwrap_err();
        assert!(err.is_constraint(), "unexpected error: {err:?}");
        let team = store.team("T1").await.unwrap().unwrap();
        assert!(team.target.is_none());
    }

    #[tokio::test]
    async fn link_persists_across_queries() {
        let store = seeded().await;
        store
            .cache_target_teams(&[TargetTeam {
                id: "F1".into(),
                name: "site-reliability".into(),
                slug: "site-reliability".into(),
            }])
            .await
            .unwrap();
        store.link_team("T1", "F1").await.unwrap();

        for _ in 0..3 {
            let team = store.team("T1").await.unwrap().unwrap();
            assert_eq!(team.target.map(|t| t.id), Some("F1".to_string()));
        }
        assert!(matches!(
            store.link_team("missing", "F1").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn proxied_teams_may_precede_their_proxy_in_a_batch() {
        let store = seeded().await;
        let counts = store
            .ingest_teams(&[
                team("S1", "Sub one", Some("K"), &["a"]),
                team("K", "Keystone", None, &[]),
                team("S2", "Sub two", Some("nowhere"), &["b"]),
            ])
            .await
            .unwrap();
        assert_eq!(
            counts,
            IngestCounts {
                upserted: 2,
                rejected: vec!["S2".to_string()],
                skipped_memberships: 0,
            }
        );

        let teams = store.teams().await.unwrap();
        let s1 = teams.iter().find(|t| t.id == "S1").unwrap();
        assert_eq!(s1.proxy_for.as_deref(), Some("K"));
        assert!(teams.iter().all(|t| t.id != "S2"));
    }

    #[tokio::test]
    async fn refusing_a_proxy_target_refuses_its_dependents() {
        let store = seeded().await;
        let counts = store
            .ingest_teams(&[
                team("K", "Keystone", Some("nowhere"), &[]),
                team("S1", "Sub one", Some("K"), &["a"]),
                team("A", "Alpha", None, &["b"]),
            ])
            .await
            .unwrap();
        assert_eq!(counts.upserted, 1);
        assert_eq!(counts.rejected, vec!["K".to_string(), "S1".to_string()]);

        let ids: Vec<_> = store.teams().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["T1", "A"]);
        assert_eq!(store.team_member_ids("A").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn memberships_of_unknown_users_are_skipped() {
        let store = seeded().await;
        let counts = store
            .ingest_teams(&[team("T2", "Ops", None, &["a", "ghost"])])
            .await
            .unwrap();
        assert_eq!(counts.skipped_memberships, 1);
        assert_eq!(store.team_member_ids("T2").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn schedule_with_unknown_rotation_member_is_rejected_whole() {
        let store = seeded().await;
        let err = store
            .ingest_schedule(&schedule("S9", "T1", "R9", &["a", "ghost"]))
            .await
            .unwrap_err();
        assert!(err.is_constraint());
        assert!(store.team_schedules("T1").await.unwrap().is_empty());
        assert!(store.rotation_member_ids("R9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_schedules_are_remembered_until_staged() {
        let store = seeded().await;
        store
            .ingest_schedule(&schedule("S1", "T1", "R1", &["a"]))
            .await
            .unwrap();

        store.reject_schedule("S1", "unknown member").await.unwrap();
        store.reject_schedule("S0", "no layers").await.unwrap();
        assert_eq!(store.rejected_schedule_ids().await.unwrap(), vec!["S0", "S1"]);
        assert!(store.team_schedules("T1").await.unwrap().is_empty());
        assert!(store.rotation_member_ids("R1").await.unwrap().is_empty());

        store
            .ingest_schedule(&schedule("S1", "T1", "R1", &["b"]))
            .await
            .unwrap();
        assert_eq!(store.rejected_schedule_ids().await.unwrap(), vec!["S0"]);
        assert_eq!(store.rotation_member_ids("R1").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn refetch_retires_targets_and_releases_their_links() {
        let store = seeded().await;
        let sre = TargetTeam {
            id: "F1".into(),
            name: "sre".into(),
            slug: "sre".into(),
        };
        let ops = TargetTeam {
            id: "F2".into(),
            name: "ops".into(),
            slug: "ops".into(),
        };
        store.cache_target_teams(&[sre.clone(), ops.clone()]).await.unwrap();
        store.link_team("T1", "F1").await.unwrap();

        store.cache_target_teams(&[ops.clone()]).await.unwrap();
        assert_eq!(store.target_teams().await.unwrap(), vec![ops]);
        assert_eq!(store.stats().await.unwrap().target_teams, 1);

        let err = store.link_team("T1", "F1").await.unwrap_err();
        assert!(err.is_constraint(), "unexpected error: {err:?}");

        assert_eq!(
            store.release_retired_team_links().await.unwrap(),
            vec![("T1".to_string(), "F1".to_string())]
        );
        assert!(store.team("T1").await.unwrap().unwrap().target.is_none());
        assert!(store.release_retired_team_links().await.unwrap().is_empty());

        // Back on the platform: linkable again.
        store.cache_target_teams(&[sre]).await.unwrap();
        store.link_team("T1", "F1").await.unwrap();
        assert!(store.release_retired_user_links().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn target_cache_state_is_tracked_per_kind() {
        let store = seeded().await;
        assert!(!store.target_cache_filled(TargetKind::Teams).await.unwrap());
        store.cache_target_teams(&[]).await.unwrap();
        assert!(store.target_cache_filled(TargetKind::Teams).await.unwrap());
        assert!(!store.target_cache_filled(TargetKind::Users).await.unwrap());
        store.invalidate_target_cache().await.unwrap();
        assert!(!store.target_cache_filled(TargetKind::Teams).await.unwrap());
    }

    #[tokio::test]
    async fn escalation_levels_keep_level_order() {
        let store = seeded().await;
        store
            .ingest_escalation_policy(&LegacyEscalationPolicy {
                id: "P1".into(),
                name: "SRE escalation".into(),
                team_id: "T1".into(),
                levels: vec![
                    EscalationLevel {
                        target_schedule_id: "S2".into(),
                        timeout_seconds: 1800,
                    },
                    EscalationLevel {
                        target_schedule_id: "S1".into(),
                        timeout_seconds: 300,
                    },
                ],
            })
            .await
            .unwrap();
        let policies = store.team_escalation_policies("T1").await.unwrap();
        assert_eq!(policies.len(), 1);
        let targets: Vec<_> = policies[0]
            .levels
            .iter()
            .map(|l| l.target_schedule_id.as_str())
            .collect();
        assert_eq!(targets, vec!["S2", "S1"]);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staging.db");
        {
            let store = StagingStore::open(&path).await.unwrap();
            store.ingest_users(&[user("a", "a@x.com")]).await.unwrap();
        }
        let store = StagingStore::open(&path).await.unwrap();
        assert_eq!(store.users().await.unwrap().len(), 1);
    }
}
