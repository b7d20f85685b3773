use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::store::MemberStore;
use crate::types::Team;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Team used when both totals are equal.
pub const TIE_LEADER: Team = Team::Bullas;

/// Point sums per team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamTotals {
    pub bullas: u64,
    pub beras: u64,
}

impl TeamTotals {
    pub fn of(&self, team: Team) -> u64 {
        match team {
            Team::Bullas => self.bullas,
            Team::Beras => self.beras,
        }
    }

    pub fn leading(&self) -> Team {
        match self.bullas.cmp(&self.beras) {
            std::cmp::Ordering::Greater => Team::Bullas,
            std::cmp::Ordering::Less => Team::Beras,
            std::cmp::Ordering::Equal => TIE_LEADER,
        }
    }

    pub fn trailing(&self) -> Team {
        self.leading().opposite()
    }
}

/// A team named directly or by its current standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamSelector {
    Winning,
    Losing,
    Explicit(Team),
}

impl TeamSelector {
    pub fn resolve(&self, totals: &TeamTotals) -> Team {
        match self {
            Self::Winning => totals.leading(),
            Self::Losing => totals.trailing(),
            Self::Explicit(team) => *team,
        }
    }
}

impl FromStr for TeamSelector {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "winning" => Ok(Self::Winning),
            "losing" => Ok(Self::Losing),
            other => other
                .parse::<Team>()
                .map(Self::Explicit)
                .map_err(|_| {
                    format!("unknown team '{other}'; expected winning, losing, bullas or beras")
                }),
        }
    }
}

pub struct TeamAggregator {
    store: Arc<dyn MemberStore>,
    timeout: Duration,
}

impl TeamAggregator {
    pub fn new(store: Arc<dyn MemberStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn team_totals(&self) -> Result<TeamTotals, MoolaError> {
        let (bullas, beras) = tokio::try_join!(
            bounded(
                self.timeout,
                "team sum",
                self.store.team_points(Team::Bullas)
            ),
            bounded(self.timeout, "team sum", self.store.team_points(Team::Beras)),
        )?;
        Ok(TeamTotals { bullas, beras })
    }

    pub async fn leading_team(&self) -> Result<Team, MoolaError> {
        Ok(self.team_totals().await?.leading())
    }

    pub async fn trailing_team(&self) -> Result<Team, MoolaError> {
        Ok(self.team_totals().await?.trailing())
    }

    pub async fn resolve(&self, selector: TeamSelector) -> Result<Team, MoolaError> {
        match selector {
            TeamSelector::Explicit(team) => Ok(team),
            other => Ok(other.resolve(&self.team_totals().await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryMemberStore;
    use crate::types::Member;

    #[test]
    fn tie_goes_to_bullas() {
        let totals = TeamTotals {
            bullas: 10,
            beras: 10,
        };
        assert_eq!(totals.leading(), Team::Bullas);
        assert_eq!(totals.trailing(), Team::Beras);
    }

    #[test]
    fn selector_parses_standings_and_names() {
        assert_eq!(
            "Winning".parse::<TeamSelector>().unwrap(),
            TeamSelector::Winning
        );
        assert_eq!(
            "beras".parse::<TeamSelector>().unwrap(),
            TeamSelector::Explicit(Team::Beras)
        );
        assert!("middle".parse::<TeamSelector>().is_err());
    }

    #[tokio::test]
    async fn totals_follow_membership() {
        let store = Arc::new(MemoryMemberStore::with_members([
            Member::new("a").with_points(50).with_team(Team::Bullas),
            Member::new("b").with_points(60).with_team(Team::Beras),
            Member::new("c").with_points(500),
        ]));
        let aggregator = TeamAggregator::new(store, Duration::from_secs(1));

        let totals = aggregator.team_totals().await.unwrap();
        assert_eq!(totals, TeamTotals { bullas: 50, beras: 60 });
        assert_eq!(aggregator.leading_team().await.unwrap(), Team::Beras);
        assert_eq!(aggregator.trailing_team().await.unwrap(), Team::Bullas);
        assert_eq!(
            aggregator.resolve(TeamSelector::Losing).await.unwrap(),
            Team::Bullas
        );
    }

    #[tokio::test]
    async fn credited_team_sum_overflow_is_reported_not_wrapped() {
        use crate::ledger::PointsLedger;

        let store = Arc::new(MemoryMemberStore::with_members(
            ["a", "b", "c"].map(|id| Member::new(id).with_team(Team::Bullas)),
        ));
        let ledger = PointsLedger::new(store.clone(), Duration::from_secs(1), 3);
        for id in ["a", "b", "c"] {
            ledger.credit(&id.into(), i64::MAX as u64).await.unwrap();
        }

        let aggregator = TeamAggregator::new(store, Duration::from_secs(1));
        let err = aggregator.team_totals().await.unwrap_err();
        assert!(matches!(err, MoolaError::Storage(_)));
        assert!(aggregator.resolve(TeamSelector::Winning).await.is_err());
    }
}
