use crate::config::RoleCatalog;
use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::roles::RoleDirectory;
use crate::store::MemberStore;
use crate::types::{MemberId, RoleId, Team};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "team", rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined(Team),
    /// Stored team restored after the member lost its marker role.
    Rejoined(Team),
}

impl JoinOutcome {
    pub fn team(&self) -> Team {
        match self {
            Self::Joined(team) | Self::Rejoined(team) => *team,
        }
    }
}

/// Team choice and the marker roles that mirror it.
pub struct TeamMembership {
    store: Arc<dyn MemberStore>,
    directory: Arc<dyn RoleDirectory>,
    catalog: RoleCatalog,
    timeout: Duration,
}

impl TeamMembership {
    pub fn new(
        store: Arc<dyn MemberStore>,
        directory: Arc<dyn RoleDirectory>,
        catalog: RoleCatalog,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            catalog,
            timeout,
        }
    }

    /// A team, once stored, is permanent; a member who lost the marker role
    /// gets the stored team's marker back regardless of `requested`.
    pub async fn join_team(&self, id: &MemberId, requested: Team) -> Result<JoinOutcome, MoolaError> {
        let member = bounded(self.timeout, "member lookup", self.store.get_member(id))
            .await?
            .ok_or_else(|| MoolaError::NotLinked(id.clone()))?;
        let held = bounded(self.timeout, "member roles", self.directory.member_roles(id)).await?;

        if let Some(stored) = member.team {
            let has_marker = Team::ALL
                .iter()
                .any(|team| held.contains(self.catalog.team_marker(*team)));
            if has_marker {
                return Err(MoolaError::AlreadyOnTeam(stored));
            }
            self.grant(id, self.catalog.team_marker(stored)).await?;
            self.drop_newcomer(id, &held).await?;
            info!(member = %id, team = %stored, "Member rejoined stored team");
            return Ok(JoinOutcome::Rejoined(stored));
        }

        let assigned = bounded(
            self.timeout,
            "team assignment",
            self.store.assign_team(id, requested),
        )
        .await?;
        if !assigned {
            let current = bounded(self.timeout, "member lookup", self.store.get_member(id))
                .await?
                .and_then(|member| member.team)
                .unwrap_or(requested);
            return Err(MoolaError::AlreadyOnTeam(current));
        }

        let opposite = self.catalog.team_marker(requested.opposite());
        if held.contains(opposite) {
            self.revoke(id, opposite).await?;
        }
        self.drop_newcomer(id, &held).await?;
        self.grant(id, self.catalog.team_marker(requested)).await?;

        info!(member = %id, team = %requested, "Member joined team");
        Ok(JoinOutcome::Joined(requested))
    }

    /// Give a member who just arrived in the community the newcomer role.
    pub async fn welcome_member(&self, id: &MemberId) -> Result<(), MoolaError> {
        self.grant(id, &self.catalog.newcomer).await?;
        info!(member = %id, "Welcomed new member");
        Ok(())
    }

    async fn drop_newcomer(&self, id: &MemberId, held: &BTreeSet<RoleId>) -> Result<(), MoolaError> {
        if held.contains(&self.catalog.newcomer) {
            self.revoke(id, &self.catalog.newcomer).await?;
        }
        Ok(())
    }

    async fn grant(&self, id: &MemberId, role: &RoleId) -> Result<(), MoolaError> {
        bounded(self.timeout, "role grant", self.directory.grant_role(id, role)).await
    }

    async fn revoke(&self, id: &MemberId, role: &RoleId) -> Result<(), MoolaError> {
        bounded(self.timeout, "role revoke", self.directory.revoke_role(id, role)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryMemberStore;
    use crate::test_support::RecordingDirectory;
    use crate::types::Member;

    fn membership(members: Vec<Member>) -> (Arc<MemoryMemberStore>, Arc<RecordingDirectory>, TeamMembership) {
        let catalog = RoleCatalog::default();
        let store = Arc::new(MemoryMemberStore::with_members(members));
        let directory = Arc::new(RecordingDirectory::with_catalog(&catalog));
        let membership = TeamMembership::new(
            store.clone(),
            directory.clone(),
            catalog,
            Duration::from_secs(1),
        );
        (store, directory, membership)
    }

    #[tokio::test]
    async fn unknown_member_cannot_join() {
        let (_, _, membership) = membership(vec![]);
        let err = membership.join_team(&"x".into(), Team::Bullas).await.unwrap_err();
        assert!(matches!(err, MoolaError::NotLinked(_)));
    }

    #[tokio::test]
    async fn first_join_assigns_team_and_swaps_roles() {
        let (store, directory, membership) =
            membership(vec![Member::new("a").with_address("0xaaaaaaaa")]);
        directory.give("a", "mootard");

        let outcome = membership.join_team(&"a".into(), Team::Beras).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Joined(Team::Beras));
        assert!(directory.holds("a", "bear"));
        assert!(!directory.holds("a", "mootard"));
        let stored = store.get_member(&"a".into()).await.unwrap().unwrap();
        assert_eq!(stored.team, Some(Team::Beras));
    }

    #[tokio::test]
    async fn member_with_marker_is_already_on_team() {
        let (_, directory, membership) = membership(vec![Member::new("a")
            .with_address("0xaaaaaaaa")
            .with_team(Team::Bullas)]);
        directory.give("a", "bull");

        let err = membership.join_team(&"a".into(), Team::Beras).await.unwrap_err();
        assert!(matches!(err, MoolaError::AlreadyOnTeam(Team::Bullas)));
        assert_eq!(directory.grant_count(), 0);
    }

    #[tokio::test]
    async fn lost_marker_restores_stored_team() {
        let (store, directory, membership) = membership(vec![Member::new("a")
            .with_address("0xaaaaaaaa")
            .with_team(Team::Bullas)]);
        directory.give("a", "mootard");

        let outcome = membership.join_team(&"a".into(), Team::Beras).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Rejoined(Team::Bullas));
        assert!(directory.holds("a", "bull"));
        assert!(!directory.holds("a", "bear"));
        assert!(!directory.holds("a", "mootard"));
        let stored = store.get_member(&"a".into()).await.unwrap().unwrap();
        assert_eq!(stored.team, Some(Team::Bullas));
    }

    #[tokio::test]
    async fn welcome_grants_newcomer_role() {
        let (_, directory, membership) = membership(vec![]);
        membership.welcome_member(&"fresh".into()).await.unwrap();
        assert!(directory.holds("fresh", "mootard"));
    }
}
