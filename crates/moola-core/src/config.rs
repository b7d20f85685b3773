use crate::error::MoolaError;
use crate::reconcile::RoleThresholdSet;
use crate::storage::StorageConfig;
use crate::types::{MemberId, RoleId, Team};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Role-granting tiers, each with its own threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Whitelist,
    Moolalist,
    FreeMint,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Whitelist, Tier::Moolalist, Tier::FreeMint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whitelist => "wl",
            Self::Moolalist => "ml",
            Self::FreeMint => "free_mint",
        }
    }
}

/// Base role of a tier plus its optional permanent winner role.
///
/// Holding either one counts as holding the tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRoles {
    pub base: RoleId,
    #[serde(default)]
    pub winner: Option<RoleId>,
}

impl TierRoles {
    pub fn new(base: impl Into<RoleId>, winner: Option<RoleId>) -> Self {
        Self {
            base: base.into(),
            winner,
        }
    }

    pub fn held_by(&self, roles: &BTreeSet<RoleId>) -> bool {
        roles.contains(&self.base)
            || self
                .winner
                .as_ref()
                .map(|winner| roles.contains(winner))
                .unwrap_or(false)
    }
}

/// Every role identifier the engine reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCatalog {
    pub whitelist: TierRoles,
    pub moolalist: TierRoles,
    pub free_mint: TierRoles,
    pub bullas_marker: RoleId,
    pub beras_marker: RoleId,
    pub newcomer: RoleId,
    #[serde(default)]
    pub operators: Vec<RoleId>,
}

impl RoleCatalog {
    pub fn tier(&self, tier: Tier) -> &TierRoles {
        match tier {
            Tier::Whitelist => &self.whitelist,
            Tier::Moolalist => &self.moolalist,
            Tier::FreeMint => &self.free_mint,
        }
    }

    pub fn team_marker(&self, team: Team) -> &RoleId {
        match team {
            Team::Bullas => &self.bullas_marker,
            Team::Beras => &self.beras_marker,
        }
    }

    /// Roles that must exist before a reconciliation run may start.
    pub fn reconciliation_roles(&self) -> Vec<&RoleId> {
        Tier::ALL
            .iter()
            .flat_map(|tier| {
                let roles = self.tier(*tier);
                std::iter::once(&roles.base).chain(roles.winner.iter())
            })
            .collect()
    }

    pub fn is_operator(&self, roles: &BTreeSet<RoleId>) -> bool {
        self.operators.iter().any(|role| roles.contains(role))
    }
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self {
            whitelist: TierRoles::new("whitelist", Some(RoleId::new("wl-winner"))),
            moolalist: TierRoles::new("moolalist", Some(RoleId::new("ml-winner"))),
            free_mint: TierRoles::new("free-mint", Some(RoleId::new("free-mint-winner"))),
            bullas_marker: RoleId::new("bull"),
            beras_marker: RoleId::new("bear"),
            newcomer: RoleId::new("mootard"),
            operators: vec![RoleId::new("admin")],
        }
    }
}

/// How many rows each standings snapshot list carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLimits {
    pub winning_top: usize,
    pub losing_top: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            winning_top: 2000,
            losing_top: 700,
        }
    }
}

/// Moola engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoolaEngineConfig {
    /// Base URL of the web claim flow; link tokens are appended as query params.
    pub claim_base_url: String,
    /// Upper bound on every datastore and role directory call.
    pub external_call_timeout_ms: u64,
    /// Compare-and-set attempts before a balance mutation gives up.
    pub max_balance_retries: u32,
    /// Members reconciled concurrently within one run.
    pub reconcile_concurrency: usize,
    pub leaderboard_page_size: usize,
    /// Operator-maintained identities never ranked on the leaderboard.
    pub excluded_members: Vec<MemberId>,
    pub roles: RoleCatalog,
    pub snapshot: SnapshotLimits,
    /// Thresholds used when a reconciliation request does not supply its own.
    pub thresholds: RoleThresholdSet,
    pub storage: StorageConfig,
}

impl Default for MoolaEngineConfig {
    fn default() -> Self {
        Self {
            claim_base_url: "http://localhost:3000".to_string(),
            external_call_timeout_ms: 5_000,
            max_balance_retries: 5,
            reconcile_concurrency: 1,
            leaderboard_page_size: 10,
            excluded_members: Vec::new(),
            roles: RoleCatalog::default(),
            snapshot: SnapshotLimits::default(),
            thresholds: RoleThresholdSet::default(),
            storage: StorageConfig::Memory,
        }
    }
}

impl MoolaEngineConfig {
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), MoolaError> {
        if self.external_call_timeout_ms == 0 {
            return Err(MoolaError::Configuration(
                "external_call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_balance_retries == 0 {
            return Err(MoolaError::Configuration(
                "max_balance_retries must be at least 1".to_string(),
            ));
        }
        if self.reconcile_concurrency == 0 {
            return Err(MoolaError::Configuration(
                "reconcile_concurrency must be at least 1".to_string(),
            ));
        }
        if self.leaderboard_page_size == 0 {
            return Err(MoolaError::Configuration(
                "leaderboard_page_size must be at least 1".to_string(),
            ));
        }
        if self.claim_base_url.trim().is_empty() {
            return Err(MoolaError::Configuration(
                "claim_base_url is required".to_string(),
            ));
        }
        Ok(())
    }
}
