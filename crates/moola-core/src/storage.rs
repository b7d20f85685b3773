use crate::error::MoolaError;
use crate::store::{BalanceChange, CasOutcome, ClaimOutcome, MemberStore};
use crate::types::{LinkToken, Member, MemberId, Team};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Member datastore backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Keep members and link tokens in process memory only.
    Memory,
    /// Persist members and link tokens in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Open the configured backend, creating the schema when needed.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn MemberStore>, MoolaError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryMemberStore::new())),
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresMemberStore::connect(database_url, *max_connections).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    members: BTreeMap<MemberId, Member>,
    tokens: BTreeMap<String, LinkToken>,
}

/// In-process store. A single lock guards members and tokens so every batch
/// is observed either fully applied or not at all.
#[derive(Debug, Default)]
pub struct MemoryMemberStore {
    state: RwLock<MemoryState>,
}

impl MemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing members.
    pub fn with_members(members: impl IntoIterator<Item = Member>) -> Self {
        let members = members
            .into_iter()
            .map(|member| (member.external_id.clone(), member))
            .collect();
        Self {
            state: RwLock::new(MemoryState {
                members,
                tokens: BTreeMap::new(),
            }),
        }
    }

    pub async fn upsert_member(&self, member: Member) {
        let mut state = self.state.write().await;
        state.members.insert(member.external_id.clone(), member);
    }

    pub async fn total_points(&self) -> u128 {
        let state = self.state.read().await;
        state
            .members
            .values()
            .map(|member| u128::from(member.points))
            .sum()
    }
}

#[async_trait]
impl MemberStore for MemoryMemberStore {
    fn label(&self) -> &'static str {
        "memory"
    }

    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, MoolaError> {
        Ok(self.state.read().await.members.get(id).cloned())
    }

    async fn list_members(&self, team: Option<Team>) -> Result<Vec<Member>, MoolaError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .values()
            .filter(|member| team.is_none() || member.team == team)
            .cloned()
            .collect())
    }

    async fn team_points(&self, team: Team) -> Result<u64, MoolaError> {
        let state = self.state.read().await;
        state
            .members
            .values()
            .filter(|member| member.team == Some(team))
            .try_fold(0u64, |total, member| total.checked_add(member.points))
            .ok_or_else(|| MoolaError::Storage(format!("{team} point total overflows")))
    }

    async fn apply_balance_changes(
        &self,
        changes: &[BalanceChange],
    ) -> Result<CasOutcome, MoolaError> {
        let mut state = self.state.write().await;
        let all_current = changes.iter().all(|change| {
            state
                .members
                .get(&change.member)
                .map(|member| member.points == change.expected)
                .unwrap_or(false)
        });
        if !all_current {
            return Ok(CasOutcome::Conflict);
        }

        for change in changes {
            if let Some(member) = state.members.get_mut(&change.member) {
                member.points = change.new;
            }
        }
        Ok(CasOutcome::Applied)
    }

    async fn assign_team(&self, id: &MemberId, team: Team) -> Result<bool, MoolaError> {
        let mut state = self.state.write().await;
        match state.members.get_mut(id) {
            Some(member) if member.team.is_none() => {
                member.team = Some(team);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_link_token(&self, token: &LinkToken) -> Result<(), MoolaError> {
        let mut state = self.state.write().await;
        if state.tokens.contains_key(&token.token) {
            return Err(MoolaError::Storage(format!(
                "duplicate link token '{}'",
                token.token
            )));
        }
        state.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn claim_link_token(
        &self,
        token: &str,
        external_id: &MemberId,
        address: &str,
    ) -> Result<ClaimOutcome, MoolaError> {
        let mut state = self.state.write().await;
        match state.tokens.get_mut(token) {
            Some(entry) if !entry.consumed && &entry.external_id == external_id => {
                entry.consumed = true;
            }
            _ => return Ok(ClaimOutcome::Unavailable),
        }

        let created = !state.members.contains_key(external_id);
        let member = state
            .members
            .entry(external_id.clone())
            .or_insert_with(|| Member::new(external_id.clone()));
        member.address = Some(address.to_string());
        Ok(ClaimOutcome::Claimed {
            member: member.clone(),
            created,
        })
    }

    async fn pending_link_tokens(&self, id: &MemberId) -> Result<usize, MoolaError> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .values()
            .filter(|token| &token.external_id == id && !token.consumed)
            .count())
    }
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PostgresMemberStore {
    pool: PgPool,
}

impl PostgresMemberStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, MoolaError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| MoolaError::storage("postgres connect failed", e))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), MoolaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moola_members (
                external_id TEXT PRIMARY KEY,
                address TEXT NULL,
                points BIGINT NOT NULL DEFAULT 0 CHECK (points >= 0),
                team TEXT NULL CHECK (team IN ('bullas', 'beras'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres schema create failed", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moola_link_tokens (
                token TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                consumed BOOLEAN NOT NULL DEFAULT FALSE,
                issued_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres schema create failed", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_moola_members_team ON moola_members (team)")
            .execute(&self.pool)
            .await
            .map_err(|e| MoolaError::storage("postgres index create failed", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_moola_link_tokens_member ON moola_link_tokens (external_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres index create failed", e))?;

        Ok(())
    }
}

#[async_trait]
impl MemberStore for PostgresMemberStore {
    fn label(&self) -> &'static str {
        "postgres"
    }

    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, MoolaError> {
        let row = sqlx::query(
            "SELECT external_id, address, points, team FROM moola_members WHERE external_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres member lookup failed", e))?;

        row.as_ref().map(decode_member).transpose()
    }

    async fn list_members(&self, team: Option<Team>) -> Result<Vec<Member>, MoolaError> {
        let rows = match team {
            Some(team) => sqlx::query(
                "SELECT external_id, address, points, team FROM moola_members WHERE team = $1",
            )
            .bind(team.as_str())
            .fetch_all(&self.pool)
            .await,
            None => {
                sqlx::query("SELECT external_id, address, points, team FROM moola_members")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| MoolaError::storage("postgres member listing failed", e))?;

        rows.iter().map(decode_member).collect()
    }

    async fn team_points(&self, team: Team) -> Result<u64, MoolaError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(points), 0)::BIGINT FROM moola_members WHERE team = $1",
        )
        .bind(team.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres team sum failed", e))?;

        to_points(total)
    }

    async fn apply_balance_changes(
        &self,
        changes: &[BalanceChange],
    ) -> Result<CasOutcome, MoolaError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MoolaError::storage("postgres begin failed", e))?;

        for change in changes {
            let result = sqlx::query(
                "UPDATE moola_members SET points = $3 WHERE external_id = $1 AND points = $2",
            )
            .bind(change.member.as_str())
            .bind(to_column(change.expected)?)
            .bind(to_column(change.new)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| MoolaError::storage("postgres balance update failed", e))?;

            if result.rows_affected() != 1 {
                tx.rollback()
                    .await
                    .map_err(|e| MoolaError::storage("postgres rollback failed", e))?;
                return Ok(CasOutcome::Conflict);
            }
        }

        tx.commit()
            .await
            .map_err(|e| MoolaError::storage("postgres commit failed", e))?;
        Ok(CasOutcome::Applied)
    }

    async fn assign_team(&self, id: &MemberId, team: Team) -> Result<bool, MoolaError> {
        let result = sqlx::query(
            "UPDATE moola_members SET team = $2 WHERE external_id = $1 AND team IS NULL",
        )
        .bind(id.as_str())
        .bind(team.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres team assignment failed", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_link_token(&self, token: &LinkToken) -> Result<(), MoolaError> {
        sqlx::query(
            r#"
            INSERT INTO moola_link_tokens (token, external_id, consumed, issued_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token.token)
        .bind(token.external_id.as_str())
        .bind(token.consumed)
        .bind(token.issued_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres token insert failed", e))?;

        Ok(())
    }

    async fn claim_link_token(
        &self,
        token: &str,
        external_id: &MemberId,
        address: &str,
    ) -> Result<ClaimOutcome, MoolaError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MoolaError::storage("postgres begin failed", e))?;

        let consumed = sqlx::query(
            r#"
            UPDATE moola_link_tokens SET consumed = TRUE
            WHERE token = $1 AND external_id = $2 AND consumed = FALSE
            "#,
        )
        .bind(token)
        .bind(external_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| MoolaError::storage("postgres token consume failed", e))?;

        if consumed.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| MoolaError::storage("postgres rollback failed", e))?;
            return Ok(ClaimOutcome::Unavailable);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO moola_members (external_id, address, points, team)
            VALUES ($1, $2, 0, NULL)
            ON CONFLICT (external_id) DO UPDATE SET address = EXCLUDED.address
            RETURNING external_id, address, points, team, (xmax = 0) AS created
            "#,
        )
        .bind(external_id.as_str())
        .bind(address)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MoolaError::storage("postgres member upsert failed", e))?;

        let member = decode_member(&row)?;
        let created: bool = row
            .try_get("created")
            .map_err(|e| MoolaError::storage("postgres decode created failed", e))?;

        tx.commit()
            .await
            .map_err(|e| MoolaError::storage("postgres commit failed", e))?;

        Ok(ClaimOutcome::Claimed { member, created })
    }

    async fn pending_link_tokens(&self, id: &MemberId) -> Result<usize, MoolaError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM moola_link_tokens WHERE external_id = $1 AND consumed = FALSE",
        )
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MoolaError::storage("postgres token count failed", e))?;

        usize::try_from(count)
            .map_err(|_| MoolaError::Storage("negative token count in storage".to_string()))
    }
}

fn decode_member(row: &PgRow) -> Result<Member, MoolaError> {
    let external_id: String = row
        .try_get("external_id")
        .map_err(|e| MoolaError::storage("postgres decode external_id failed", e))?;
    let points: i64 = row
        .try_get("points")
        .map_err(|e| MoolaError::storage("postgres decode points failed", e))?;
    let team: Option<String> = row
        .try_get("team")
        .map_err(|e| MoolaError::storage("postgres decode team failed", e))?;

    Ok(Member {
        external_id: MemberId::new(external_id),
        address: row
            .try_get("address")
            .map_err(|e| MoolaError::storage("postgres decode address failed", e))?,
        points: to_points(points)?,
        team: team
            .map(|value| value.parse::<Team>().map_err(MoolaError::Storage))
            .transpose()?,
    })
}

fn to_points(value: i64) -> Result<u64, MoolaError> {
    u64::try_from(value).map_err(|_| MoolaError::Storage("negative points in storage".to_string()))
}

fn to_column(value: u64) -> Result<i64, MoolaError> {
    i64::try_from(value)
        .map_err(|_| MoolaError::Storage("points exceed postgres BIGINT range".to_string()))
}
