//! Leaderboard pages.
//!
//! Rankings are recomputed from the store on every request: linked members
//! only, excluded identities dropped, points descending with the member id as
//! the tie-break.

use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::store::MemberStore;
use crate::types::{team_glyph, Member, MemberId, Team};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Population a leaderboard ranks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardScope {
    All,
    Team(Team),
}

impl LeaderboardScope {
    fn team(&self) -> Option<Team> {
        match self {
            Self::All => None,
            Self::Team(team) => Some(*team),
        }
    }
}

impl fmt::Display for LeaderboardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Team(team) => write!(f, "{team}"),
        }
    }
}

impl FromStr for LeaderboardScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        value
            .parse::<Team>()
            .map(Self::Team)
            .map_err(|_| format!("unknown scope '{value}'; expected all, bullas or beras"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub member: MemberId,
    pub points: u64,
    pub team: Option<Team>,
    pub glyph: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub scope: LeaderboardScope,
    pub page: i64,
    pub page_size: usize,
    pub total_pages: usize,
    pub entries: Vec<LeaderboardEntry>,
    /// The requesting member's standing in the full filtered ordering.
    pub requester: Option<LeaderboardEntry>,
    pub has_previous: bool,
    pub has_next: bool,
}

impl LeaderboardPage {
    pub fn requester_rank(&self) -> Option<usize> {
        self.requester.as_ref().map(|entry| entry.rank)
    }
}

/// Leaderboard ordering: points descending, then member id ascending.
pub fn standing_order(a: &Member, b: &Member) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| a.external_id.cmp(&b.external_id))
}

/// Rank already filtered members and cut one page out of the ordering.
pub fn build_page(
    mut ranked: Vec<Member>,
    scope: LeaderboardScope,
    page: i64,
    page_size: usize,
    requester: Option<&MemberId>,
) -> LeaderboardPage {
    let page_size = page_size.max(1);
    ranked.sort_by(standing_order);

    let total_pages = ranked.len().div_ceil(page_size);
    let to_entry = |index: usize, member: &Member| LeaderboardEntry {
        rank: index + 1,
        member: member.external_id.clone(),
        points: member.points,
        team: member.team,
        glyph: team_glyph(member.team).to_string(),
    };

    let entries = if page >= 1 && (page as usize) <= total_pages {
        let start = (page as usize - 1) * page_size;
        ranked
            .iter()
            .enumerate()
            .skip(start)
            .take(page_size)
            .map(|(index, member)| to_entry(index, member))
            .collect()
    } else {
        Vec::new()
    };

    let requester = requester.and_then(|id| {
        ranked
            .iter()
            .position(|member| &member.external_id == id)
            .map(|index| to_entry(index, &ranked[index]))
    });

    LeaderboardPage {
        scope,
        page,
        page_size,
        total_pages,
        entries,
        requester,
        has_previous: page > 1 && total_pages > 0 && page as usize <= total_pages + 1,
        has_next: page >= 0 && (page as usize) < total_pages,
    }
}

pub struct LeaderboardView {
    store: Arc<dyn MemberStore>,
    excluded: BTreeSet<MemberId>,
    page_size: usize,
    timeout: Duration,
}

impl LeaderboardView {
    pub fn new(
        store: Arc<dyn MemberStore>,
        excluded: impl IntoIterator<Item = MemberId>,
        page_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            excluded: excluded.into_iter().collect(),
            page_size: page_size.max(1),
            timeout,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_excluded(&self, id: &MemberId) -> bool {
        self.excluded.contains(id)
    }

    pub async fn page(
        &self,
        scope: LeaderboardScope,
        page: i64,
        requester: Option<&MemberId>,
    ) -> Result<LeaderboardPage, MoolaError> {
        let ranked = self.ranked_members(scope).await?;
        let result = build_page(ranked, scope, page, self.page_size, requester);
        debug!(
            scope = %scope,
            page,
            total_pages = result.total_pages,
            entries = result.entries.len(),
            "Computed leaderboard page"
        );
        Ok(result)
    }

    /// Members eligible for ranking in `scope`, already in leaderboard order.
    pub async fn ranked_members(&self, scope: LeaderboardScope) -> Result<Vec<Member>, MoolaError> {
        let mut members = bounded(
            self.timeout,
            "member listing",
            self.store.list_members(scope.team()),
        )
        .await?;
        members.retain(|member| member.is_linked() && !self.excluded.contains(&member.external_id));
        members.sort_by(standing_order);
        Ok(members)
    }
}
