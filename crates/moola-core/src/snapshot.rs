//! Standings snapshot: the top of each team plus everyone, with tier flags.

use crate::config::{RoleCatalog, SnapshotLimits, Tier};
use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::leaderboard::standing_order;
use crate::roles::RoleDirectory;
use crate::store::MemberStore;
use crate::teams::{TeamAggregator, TeamTotals};
use crate::types::{Member, MemberId, Team};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub member: MemberId,
    pub address: String,
    pub points: u64,
    pub team: Team,
    pub has_wl: bool,
    pub has_ml: bool,
    pub has_free_mint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub totals: TeamTotals,
    pub winning: Team,
    pub losing: Team,
    pub winning_top: Vec<SnapshotRow>,
    pub losing_top: Vec<SnapshotRow>,
    pub everyone: Vec<SnapshotRow>,
}

pub struct SnapshotBuilder {
    store: Arc<dyn MemberStore>,
    directory: Arc<dyn RoleDirectory>,
    teams: Arc<TeamAggregator>,
    catalog: RoleCatalog,
    limits: SnapshotLimits,
    timeout: Duration,
    concurrency: usize,
}

impl SnapshotBuilder {
    pub fn new(
        store: Arc<dyn MemberStore>,
        directory: Arc<dyn RoleDirectory>,
        teams: Arc<TeamAggregator>,
        catalog: RoleCatalog,
        limits: SnapshotLimits,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            directory,
            teams,
            catalog,
            limits,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn snapshot(&self) -> Result<StandingsSnapshot, MoolaError> {
        let totals = self.teams.team_totals().await?;
        let winning = totals.leading();
        let losing = totals.trailing();

        let winners = self.team_rows(winning).await?;
        let losers = self.team_rows(losing).await?;

        let mut everyone: Vec<SnapshotRow> = winners.iter().chain(losers.iter()).cloned().collect();
        everyone.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.member.cmp(&b.member)));

        let snapshot = StandingsSnapshot {
            taken_at: Utc::now(),
            totals,
            winning,
            losing,
            winning_top: winners.into_iter().take(self.limits.winning_top).collect(),
            losing_top: losers.into_iter().take(self.limits.losing_top).collect(),
            everyone,
        };
        info!(
            winning = %winning,
            winning_rows = snapshot.winning_top.len(),
            losing_rows = snapshot.losing_top.len(),
            everyone = snapshot.everyone.len(),
            "Standings snapshot taken"
        );
        Ok(snapshot)
    }

    async fn team_rows(&self, team: Team) -> Result<Vec<SnapshotRow>, MoolaError> {
        let mut members = bounded(
            self.timeout,
            "member listing",
            self.store.list_members(Some(team)),
        )
        .await?;
        members.retain(Member::is_linked);
        members.sort_by(standing_order);

        Ok(stream::iter(members)
            .map(|member| self.row(member, team))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await)
    }

    async fn row(&self, member: Member, team: Team) -> SnapshotRow {
        let held = match bounded(
            self.timeout,
            "member roles",
            self.directory.member_roles(&member.external_id),
        )
        .await
        {
            Ok(held) => Some(held),
            Err(err) => {
                warn!(member = %member.external_id, error = %err, "Role lookup failed; reporting no tiers");
                None
            }
        };
        let has = |tier: Tier| {
            held.as_ref()
                .map(|roles| self.catalog.tier(tier).held_by(roles))
                .unwrap_or(false)
        };

        SnapshotRow {
            has_wl: has(Tier::Whitelist),
            has_ml: has(Tier::Moolalist),
            has_free_mint: has(Tier::FreeMint),
            address: member.address.unwrap_or_default(),
            member: member.external_id,
            points: member.points,
            team,
        }
    }
}
