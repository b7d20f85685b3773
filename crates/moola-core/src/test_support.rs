use crate::config::RoleCatalog;
use crate::error::MoolaError;
use crate::roles::RoleDirectory;
use crate::types::{MemberId, RoleId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Role directory double that records every grant and revoke.
#[derive(Default)]
pub(crate) struct RecordingDirectory {
    pub roles: Mutex<BTreeSet<RoleId>>,
    pub members: Mutex<BTreeMap<MemberId, BTreeSet<RoleId>>>,
    pub departed: Mutex<BTreeSet<MemberId>>,
    pub stalled: Mutex<BTreeSet<MemberId>>,
    pub grants: Mutex<Vec<(MemberId, RoleId)>>,
    pub revokes: Mutex<Vec<(MemberId, RoleId)>>,
}

impl RecordingDirectory {
    pub fn with_catalog(catalog: &RoleCatalog) -> Self {
        let directory = Self::default();
        {
            let mut roles = directory.roles.lock().unwrap();
            for role in catalog.reconciliation_roles() {
                roles.insert(role.clone());
            }
            roles.insert(catalog.bullas_marker.clone());
            roles.insert(catalog.beras_marker.clone());
            roles.insert(catalog.newcomer.clone());
            roles.extend(catalog.operators.iter().cloned());
        }
        directory
    }

    pub fn give(&self, member: &str, role: &str) {
        self.members
            .lock()
            .unwrap()
            .entry(MemberId::new(member))
            .or_default()
            .insert(RoleId::new(role));
    }

    pub fn depart(&self, member: &str) {
        self.departed.lock().unwrap().insert(MemberId::new(member));
    }

    /// Role lookups for this member never answer.
    pub fn stall(&self, member: &str) {
        self.stalled.lock().unwrap().insert(MemberId::new(member));
    }

    pub fn holds(&self, member: &str, role: &str) -> bool {
        self.members
            .lock()
            .unwrap()
            .get(&MemberId::new(member))
            .map(|roles| roles.contains(&RoleId::new(role)))
            .unwrap_or(false)
    }

    pub fn grant_count(&self) -> usize {
        self.grants.lock().unwrap().len()
    }

    fn ensure_present(&self, member: &MemberId) -> Result<(), MoolaError> {
        if self.departed.lock().unwrap().contains(member) {
            return Err(MoolaError::RoleDirectory(format!(
                "member '{member}' is not in the community"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleDirectory for RecordingDirectory {
    fn directory_id(&self) -> &'static str {
        "recording"
    }

    async fn role_exists(&self, role: &RoleId) -> Result<bool, MoolaError> {
        Ok(self.roles.lock().unwrap().contains(role))
    }

    async fn member_roles(&self, member: &MemberId) -> Result<BTreeSet<RoleId>, MoolaError> {
        self.ensure_present(member)?;
        let stalled = self.stalled.lock().unwrap().contains(member);
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(member)
            .cloned()
            .unwrap_or_default())
    }

    async fn grant_role(&self, member: &MemberId, role: &RoleId) -> Result<(), MoolaError> {
        self.ensure_present(member)?;
        self.members
            .lock()
            .unwrap()
            .entry(member.clone())
            .or_default()
            .insert(role.clone());
        self.grants
            .lock()
            .unwrap()
            .push((member.clone(), role.clone()));
        Ok(())
    }

    async fn revoke_role(&self, member: &MemberId, role: &RoleId) -> Result<(), MoolaError> {
        self.ensure_present(member)?;
        if let Some(roles) = self.members.lock().unwrap().get_mut(member) {
            roles.remove(role);
        }
        self.revokes
            .lock()
            .unwrap()
            .push((member.clone(), role.clone()));
        Ok(())
    }
}
