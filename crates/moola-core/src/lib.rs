//! Moola core: the points ledger and role reconciliation engine behind the
//! two-team community game.
//!
//! Balances only change through compare-and-set batches, tier roles are only
//! ever granted, and every datastore or role directory call is bounded by a
//! timeout so no command blocks indefinitely.

#![deny(unsafe_code)]

pub mod config;
mod deadline;
pub mod error;
pub mod identity;
pub mod leaderboard;
pub mod ledger;
pub mod membership;
pub mod policy;
pub mod reconcile;
pub mod roles;
pub mod runtime;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod teams;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{MoolaEngineConfig, RoleCatalog, SnapshotLimits, Tier, TierRoles};
pub use error::{ErrorKind, MoolaError};
pub use identity::{mask_address, IdentityRegistry, LinkPurpose, LinkRequest};
pub use leaderboard::{LeaderboardEntry, LeaderboardPage, LeaderboardScope, LeaderboardView};
pub use ledger::PointsLedger;
pub use membership::{JoinOutcome, TeamMembership};
pub use policy::{OperatorPolicy, ThresholdPolicy};
pub use reconcile::{ReconcileReport, RoleGrant, RoleReconciler, RoleThresholdSet, SkippedMember};
pub use roles::RoleDirectory;
pub use runtime::MoolaEngine;
pub use snapshot::{SnapshotBuilder, SnapshotRow, StandingsSnapshot};
pub use storage::{open_store, MemoryMemberStore, PostgresMemberStore, StorageConfig};
pub use store::{BalanceChange, CasOutcome, ClaimOutcome, MemberStore};
pub use teams::{TeamAggregator, TeamSelector, TeamTotals, TIE_LEADER};
pub use types::{
    team_glyph, BalanceReceipt, LinkToken, Member, MemberId, RoleId, Team, TransferReceipt,
    NO_TEAM_GLYPH,
};
