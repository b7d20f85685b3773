//! Role directory adapters for moola.

#![deny(unsafe_code)]

use async_trait::async_trait;
use moola_core::config::RoleCatalog;
use moola_core::error::MoolaError;
use moola_core::roles::RoleDirectory;
use moola_core::types::{MemberId, RoleId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct DirectoryState {
    roles: BTreeSet<RoleId>,
    members: BTreeMap<MemberId, BTreeSet<RoleId>>,
    departed: BTreeSet<MemberId>,
}

/// In-process role directory for local runs and tests.
///
/// Members marked as departed fail every role call, the way a chat platform
/// rejects calls for someone who left the community.
#[derive(Debug, Default)]
pub struct MemoryRoleDirectory {
    state: RwLock<DirectoryState>,
    latency: Option<Duration>,
}

impl MemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory with every role the catalog names already registered.
    pub fn with_catalog(catalog: &RoleCatalog) -> Self {
        let directory = Self::new();
        for role in catalog.reconciliation_roles() {
            directory.register_role(role.clone());
        }
        directory.register_role(catalog.bullas_marker.clone());
        directory.register_role(catalog.beras_marker.clone());
        directory.register_role(catalog.newcomer.clone());
        for role in &catalog.operators {
            directory.register_role(role.clone());
        }
        directory
    }

    /// Delay every call, for exercising timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn register_role(&self, role: impl Into<RoleId>) {
        if let Ok(mut state) = self.state.write() {
            state.roles.insert(role.into());
        }
    }

    pub fn assign(&self, member: impl Into<MemberId>, role: impl Into<RoleId>) {
        if let Ok(mut state) = self.state.write() {
            state
                .members
                .entry(member.into())
                .or_default()
                .insert(role.into());
        }
    }

    pub fn depart(&self, member: impl Into<MemberId>) {
        if let Ok(mut state) = self.state.write() {
            state.departed.insert(member.into());
        }
    }

    pub fn roles_of(&self, member: &MemberId) -> BTreeSet<RoleId> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.members.get(member).cloned())
            .unwrap_or_default()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn with_state<T>(
        &self,
        member: Option<&MemberId>,
        apply: impl FnOnce(&mut DirectoryState) -> Result<T, MoolaError>,
    ) -> Result<T, MoolaError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| MoolaError::RoleDirectory("directory lock poisoned".to_string()))?;
        if let Some(member) = member {
            if state.departed.contains(member) {
                return Err(MoolaError::RoleDirectory(format!(
                    "unknown member '{member}'"
                )));
            }
        }
        apply(&mut state)
    }
}

fn ensure_registered(state: &DirectoryState, role: &RoleId) -> Result<(), MoolaError> {
    if state.roles.contains(role) {
        Ok(())
    } else {
        Err(MoolaError::RoleDirectory(format!("unknown role '{role}'")))
    }
}

#[async_trait]
impl RoleDirectory for MemoryRoleDirectory {
    fn directory_id(&self) -> &'static str {
        "memory"
    }

    async fn role_exists(&self, role: &RoleId) -> Result<bool, MoolaError> {
        self.pause().await;
        self.with_state(None, |state| Ok(state.roles.contains(role)))
    }

    async fn member_roles(&self, member: &MemberId) -> Result<BTreeSet<RoleId>, MoolaError> {
        self.pause().await;
        self.with_state(Some(member), |state| {
            Ok(state.members.get(member).cloned().unwrap_or_default())
        })
    }

    async fn grant_role(&self, member: &MemberId, role: &RoleId) -> Result<(), MoolaError> {
        self.pause().await;
        self.with_state(Some(member), |state| {
            ensure_registered(state, role)?;
            state
                .members
                .entry(member.clone())
                .or_default()
                .insert(role.clone());
            Ok(())
        })?;
        debug!(member = %member, role = %role, "Role granted");
        Ok(())
    }

    async fn revoke_role(&self, member: &MemberId, role: &RoleId) -> Result<(), MoolaError> {
        self.pause().await;
        self.with_state(Some(member), |state| {
            ensure_registered(state, role)?;
            if let Some(held) = state.members.get_mut(member) {
                held.remove(role);
            }
            Ok(())
        })?;
        debug!(member = %member, role = %role, "Role revoked");
        Ok(())
    }
}

/// Deterministic failing directory useful for chaos testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailRoleDirectory {
    reason: String,
}

impl AlwaysFailRoleDirectory {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T, MoolaError> {
        Err(MoolaError::RoleDirectory(self.reason.clone()))
    }
}

#[async_trait]
impl RoleDirectory for AlwaysFailRoleDirectory {
    fn directory_id(&self) -> &'static str {
        "always-fail"
    }

    async fn role_exists(&self, _role: &RoleId) -> Result<bool, MoolaError> {
        self.fail()
    }

    async fn member_roles(&self, _member: &MemberId) -> Result<BTreeSet<RoleId>, MoolaError> {
        self.fail()
    }

    async fn grant_role(&self, _member: &MemberId, _role: &RoleId) -> Result<(), MoolaError> {
        self.fail()
    }

    async fn revoke_role(&self, _member: &MemberId, _role: &RoleId) -> Result<(), MoolaError> {
        self.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_roles_are_registered() {
        let catalog = RoleCatalog::default();
        let directory = MemoryRoleDirectory::with_catalog(&catalog);
        for role in catalog.reconciliation_roles() {
            assert!(directory.role_exists(role).await.unwrap());
        }
        assert!(directory.role_exists(&catalog.newcomer).await.unwrap());
        assert!(!directory.role_exists(&RoleId::new("moderator")).await.unwrap());
    }

    #[tokio::test]
    async fn grant_and_revoke_round_trip() {
        let directory = MemoryRoleDirectory::with_catalog(&RoleCatalog::default());
        let member = MemberId::new("7");
        let role = RoleId::new("bull");

        directory.grant_role(&member, &role).await.unwrap();
        assert!(directory.member_roles(&member).await.unwrap().contains(&role));
        directory.revoke_role(&member, &role).await.unwrap();
        assert!(directory.roles_of(&member).is_empty());

        let err = directory
            .grant_role(&member, &RoleId::new("ghost-role"))
            .await
            .unwrap_err();
        assert!(matches!(err, MoolaError::RoleDirectory(_)));
    }

    #[tokio::test]
    async fn departed_members_fail_role_calls() {
        let directory = MemoryRoleDirectory::with_catalog(&RoleCatalog::default());
        directory.assign("gone", "whitelist");
        directory.depart("gone");

        let err = directory.member_roles(&"gone".into()).await.unwrap_err();
        assert!(err.is_external());
    }

    #[tokio::test]
    async fn always_fail_directory_fails_everything() {
        let directory = AlwaysFailRoleDirectory::new("platform outage");
        assert!(directory.role_exists(&RoleId::new("x")).await.is_err());
        assert!(directory.member_roles(&MemberId::new("x")).await.is_err());
        assert_eq!(directory.directory_id(), "always-fail");
    }

    #[tokio::test]
    async fn slow_directory_trips_engine_timeout() {
        use moola_core::{MoolaEngine, MoolaEngineConfig, TeamSelector};
        use std::sync::Arc;

        let config = MoolaEngineConfig {
            external_call_timeout_ms: 20,
            ..MoolaEngineConfig::default()
        };
        let directory = MemoryRoleDirectory::with_catalog(&config.roles)
            .with_latency(Duration::from_millis(500));
        let engine = MoolaEngine::bootstrap(config, Arc::new(directory)).await.unwrap();

        let err = engine
            .reconcile_roles(TeamSelector::Winning, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MoolaError::Timeout(_)));
    }
}
