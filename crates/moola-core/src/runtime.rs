use crate::config::MoolaEngineConfig;
use crate::error::MoolaError;
use crate::identity::{IdentityRegistry, LinkRequest};
use crate::leaderboard::{LeaderboardPage, LeaderboardScope, LeaderboardView};
use crate::ledger::PointsLedger;
use crate::membership::{JoinOutcome, TeamMembership};
use crate::policy::{OperatorPolicy, ThresholdPolicy};
use crate::reconcile::{ReconcileReport, RoleReconciler, RoleThresholdSet};
use crate::roles::RoleDirectory;
use crate::snapshot::{SnapshotBuilder, StandingsSnapshot};
use crate::storage::open_store;
use crate::store::MemberStore;
use crate::teams::{TeamAggregator, TeamSelector, TeamTotals};
use crate::types::{BalanceReceipt, Member, MemberId, Team, TransferReceipt};
use std::sync::Arc;
use tracing::info;

/// Moola engine wiring the ledger, team, role and leaderboard components over
/// one member store and one role directory.
pub struct MoolaEngine {
    store: Arc<dyn MemberStore>,
    directory: Arc<dyn RoleDirectory>,
    identity: IdentityRegistry,
    ledger: PointsLedger,
    teams: Arc<TeamAggregator>,
    reconciler: RoleReconciler,
    leaderboard: LeaderboardView,
    membership: TeamMembership,
    snapshots: SnapshotBuilder,
    thresholds: ThresholdPolicy,
    operators: OperatorPolicy,
    config: MoolaEngineConfig,
}

impl MoolaEngine {
    /// Open the configured store and wire the engine around it.
    pub async fn bootstrap(
        config: MoolaEngineConfig,
        directory: Arc<dyn RoleDirectory>,
    ) -> Result<Self, MoolaError> {
        config.validate()?;
        let store = open_store(&config.storage).await?;
        Self::with_store(config, store, directory)
    }

    pub fn with_store(
        config: MoolaEngineConfig,
        store: Arc<dyn MemberStore>,
        directory: Arc<dyn RoleDirectory>,
    ) -> Result<Self, MoolaError> {
        config.validate()?;
        let timeout = config.external_call_timeout();

        let teams = Arc::new(TeamAggregator::new(store.clone(), timeout));
        let engine = Self {
            identity: IdentityRegistry::new(store.clone(), config.claim_base_url.clone(), timeout),
            ledger: PointsLedger::new(store.clone(), timeout, config.max_balance_retries),
            reconciler: RoleReconciler::new(
                store.clone(),
                directory.clone(),
                teams.clone(),
                config.roles.clone(),
                timeout,
                config.reconcile_concurrency,
            ),
            leaderboard: LeaderboardView::new(
                store.clone(),
                config.excluded_members.iter().cloned(),
                config.leaderboard_page_size,
                timeout,
            ),
            membership: TeamMembership::new(
                store.clone(),
                directory.clone(),
                config.roles.clone(),
                timeout,
            ),
            snapshots: SnapshotBuilder::new(
                store.clone(),
                directory.clone(),
                teams.clone(),
                config.roles.clone(),
                config.snapshot.clone(),
                timeout,
                config.reconcile_concurrency,
            ),
            thresholds: ThresholdPolicy::new(config.thresholds),
            operators: OperatorPolicy::new(directory.clone(), config.roles.clone(), timeout),
            teams,
            store,
            directory,
            config,
        };

        info!(
            storage = engine.store.label(),
            directory = engine.directory.directory_id(),
            "Moola engine ready"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &MoolaEngineConfig {
        &self.config
    }

    pub fn storage_label(&self) -> &'static str {
        self.store.label()
    }

    pub fn directory_id(&self) -> &'static str {
        self.directory.directory_id()
    }

    pub async fn request_link(&self, id: &MemberId) -> Result<LinkRequest, MoolaError> {
        self.identity.request_link(id).await
    }

    pub async fn request_wallet_update(&self, id: &MemberId) -> Result<LinkRequest, MoolaError> {
        self.identity.request_wallet_update(id).await
    }

    pub async fn claim_link(
        &self,
        token: &str,
        id: &MemberId,
        address: &str,
    ) -> Result<Member, MoolaError> {
        self.identity.claim(token, id, address).await
    }

    pub async fn pending_link_tokens(&self, id: &MemberId) -> Result<usize, MoolaError> {
        self.identity.pending_tokens(id).await
    }

    pub async fn balance(&self, id: &MemberId) -> Result<u64, MoolaError> {
        self.ledger.balance(id).await
    }

    pub async fn transfer(
        &self,
        from: &MemberId,
        to: &MemberId,
        amount: u64,
    ) -> Result<TransferReceipt, MoolaError> {
        self.ledger.transfer(from, to, amount).await
    }

    pub async fn fine(&self, target: &MemberId, amount: u64) -> Result<BalanceReceipt, MoolaError> {
        self.ledger.fine(target, amount).await
    }

    pub async fn credit(&self, target: &MemberId, amount: u64) -> Result<BalanceReceipt, MoolaError> {
        self.ledger.credit(target, amount).await
    }

    pub async fn team_totals(&self) -> Result<TeamTotals, MoolaError> {
        self.teams.team_totals().await
    }

    pub async fn leading_team(&self) -> Result<Team, MoolaError> {
        self.teams.leading_team().await
    }

    pub async fn join_team(&self, id: &MemberId, team: Team) -> Result<JoinOutcome, MoolaError> {
        self.membership.join_team(id, team).await
    }

    pub async fn welcome_member(&self, id: &MemberId) -> Result<(), MoolaError> {
        self.membership.welcome_member(id).await
    }

    /// Reconcile tier roles for one team; `None` uses the current default thresholds.
    pub async fn reconcile_roles(
        &self,
        selector: TeamSelector,
        thresholds: Option<RoleThresholdSet>,
    ) -> Result<ReconcileReport, MoolaError> {
        let thresholds = match thresholds {
            Some(thresholds) => thresholds,
            None => self.thresholds.current().await,
        };
        self.reconciler.run(selector, thresholds).await
    }

    pub async fn leaderboard_page(
        &self,
        scope: LeaderboardScope,
        page: i64,
        requester: Option<&MemberId>,
    ) -> Result<LeaderboardPage, MoolaError> {
        self.leaderboard.page(scope, page, requester).await
    }

    pub async fn snapshot(&self) -> Result<StandingsSnapshot, MoolaError> {
        self.snapshots.snapshot().await
    }

    pub async fn current_thresholds(&self) -> RoleThresholdSet {
        self.thresholds.current().await
    }

    pub async fn update_whitelist_minimum(&self, minimum: u64) -> Result<u64, MoolaError> {
        self.thresholds.update_whitelist_minimum(minimum).await
    }

    pub async fn authorize_operator(&self, actor: &MemberId) -> Result<(), MoolaError> {
        self.operators.authorize_operator(actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryMemberStore;
    use crate::test_support::RecordingDirectory;

    fn engine(members: Vec<Member>) -> (Arc<MemoryMemberStore>, Arc<RecordingDirectory>, MoolaEngine) {
        let config = MoolaEngineConfig::default();
        let store = Arc::new(MemoryMemberStore::with_members(members));
        let directory = Arc::new(RecordingDirectory::with_catalog(&config.roles));
        let engine = MoolaEngine::with_store(config, store.clone(), directory.clone()).unwrap();
        (store, directory, engine)
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = MoolaEngineConfig {
            max_balance_retries: 0,
            ..MoolaEngineConfig::default()
        };
        let directory = Arc::new(RecordingDirectory::default());
        let err = MoolaEngine::bootstrap(config, directory).await.err().unwrap();
        assert!(matches!(err, MoolaError::Configuration(_)));
    }

    #[tokio::test]
    async fn worked_example_end_to_end() {
        let (store, directory, engine) = engine(vec![
            Member::new("a").with_address("0xaaaaaa").with_points(100).with_team(Team::Bullas),
            Member::new("b").with_address("0xbbbbbb").with_points(30).with_team(Team::Bullas),
        ]);
        let a = MemberId::new("a");
        let b = MemberId::new("b");

        engine.transfer(&a, &b, 50).await.unwrap();
        assert!(matches!(
            engine.transfer(&a, &b, 100).await,
            Err(MoolaError::InsufficientBalance { .. })
        ));
        assert_eq!(engine.fine(&b, 20).await.unwrap().new_balance, 60);
        assert_eq!(store.total_points().await, 110);

        let run = RoleThresholdSet::new(40, 1_000, 1_000);
        let first = engine
            .reconcile_roles(TeamSelector::Explicit(Team::Bullas), Some(run))
            .await
            .unwrap();
        assert_eq!(first.updated_count, 2);
        let second = engine
            .reconcile_roles(TeamSelector::Explicit(Team::Bullas), Some(run))
            .await
            .unwrap();
        assert_eq!(second.updated_count, 0);
        assert_eq!(directory.grant_count(), 2);
    }

    #[tokio::test]
    async fn default_thresholds_follow_whitelist_minimum() {
        let (_, directory, engine) = engine(vec![Member::new("a")
            .with_address("0xaaaaaa")
            .with_points(60)
            .with_team(Team::Beras)]);

        let report = engine.reconcile_roles(TeamSelector::Winning, None).await.unwrap();
        assert_eq!(report.team, Team::Beras);
        assert!(report.grants.is_empty());

        engine.update_whitelist_minimum(50).await.unwrap();
        let report = engine.reconcile_roles(TeamSelector::Winning, None).await.unwrap();
        assert_eq!(report.grants.len(), 1);
        assert!(directory.holds("a", "whitelist"));
    }

    #[tokio::test]
    async fn link_claim_then_join_and_rank() {
        let (_, _, engine) = engine(vec![]);
        let me = MemberId::new("1001");

        let link = engine.request_link(&me).await.unwrap();
        engine.claim_link(&link.token, &me, "0x9876543210").await.unwrap();
        engine.credit(&me, 15).await.unwrap();
        engine.join_team(&me, Team::Bullas).await.unwrap();

        let page = engine
            .leaderboard_page(LeaderboardScope::Team(Team::Bullas), 1, Some(&me))
            .await
            .unwrap();
        assert_eq!(page.requester_rank(), Some(1));
        assert_eq!(page.entries[0].points, 15);
        assert_eq!(engine.team_totals().await.unwrap().bullas, 15);
    }
}
