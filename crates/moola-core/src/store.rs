use crate::error::MoolaError;
use crate::types::{LinkToken, Member, MemberId, Team};
use async_trait::async_trait;

/// Conditional write of one member's balance.
///
/// Applies only while the stored points still equal `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub member: MemberId,
    pub expected: u64,
    pub new: u64,
}

impl BalanceChange {
    pub fn new(member: MemberId, expected: u64, new: u64) -> Self {
        Self {
            member,
            expected,
            new,
        }
    }
}

/// Outcome of an all-or-nothing batch of balance changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// At least one row was missing or had moved on; nothing was written.
    Conflict,
}

/// Outcome of consuming a link token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Token consumed; `created` is true when the member record was new.
    Claimed { member: Member, created: bool },
    Unavailable,
}

/// Transactional member datastore.
#[async_trait]
pub trait MemberStore: Send + Sync {
    fn label(&self) -> &'static str;

    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, MoolaError>;

    /// All members, or only those on `team`.
    async fn list_members(&self, team: Option<Team>) -> Result<Vec<Member>, MoolaError>;

    async fn team_points(&self, team: Team) -> Result<u64, MoolaError>;

    async fn apply_balance_changes(
        &self,
        changes: &[BalanceChange],
    ) -> Result<CasOutcome, MoolaError>;

    /// Set the member's team only while it is still unset.
    async fn assign_team(&self, id: &MemberId, team: Team) -> Result<bool, MoolaError>;

    async fn insert_link_token(&self, token: &LinkToken) -> Result<(), MoolaError>;

    async fn claim_link_token(
        &self,
        token: &str,
        external_id: &MemberId,
        address: &str,
    ) -> Result<ClaimOutcome, MoolaError>;

    async fn pending_link_tokens(&self, id: &MemberId) -> Result<usize, MoolaError>;
}
