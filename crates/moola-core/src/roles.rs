use crate::error::MoolaError;
use crate::types::{MemberId, RoleId};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Role grant capability of the chat platform.
///
/// Implementations report failures as `MoolaError::RoleDirectory`, including
/// members that have left the community.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    fn directory_id(&self) -> &'static str;

    async fn role_exists(&self, role: &RoleId) -> Result<bool, MoolaError>;

    async fn member_roles(&self, member: &MemberId) -> Result<BTreeSet<RoleId>, MoolaError>;

    async fn grant_role(&self, member: &MemberId, role: &RoleId) -> Result<(), MoolaError>;

    async fn revoke_role(&self, member: &MemberId, role: &RoleId) -> Result<(), MoolaError>;
}
