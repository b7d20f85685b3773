use crate::config::RoleCatalog;
use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::reconcile::RoleThresholdSet;
use crate::roles::RoleDirectory;
use crate::types::MemberId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Owner of the default reconciliation thresholds.
pub struct ThresholdPolicy {
    current: RwLock<RoleThresholdSet>,
}

impl ThresholdPolicy {
    pub fn new(initial: RoleThresholdSet) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub async fn current(&self) -> RoleThresholdSet {
        *self.current.read().await
    }

    /// Replace the whitelist minimum and return the value now in force.
    pub async fn update_whitelist_minimum(&self, minimum: u64) -> Result<u64, MoolaError> {
        if minimum == 0 {
            return Err(MoolaError::Validation(
                "whitelist minimum must be positive".to_string(),
            ));
        }
        let mut current = self.current.write().await;
        let previous = current.wl_threshold;
        *current = current.with_whitelist_minimum(minimum);
        info!(previous, minimum, "Whitelist minimum updated");
        Ok(current.wl_threshold)
    }
}

/// Gate for operator-only commands.
pub struct OperatorPolicy {
    directory: Arc<dyn RoleDirectory>,
    catalog: RoleCatalog,
    timeout: Duration,
}

impl OperatorPolicy {
    pub fn new(directory: Arc<dyn RoleDirectory>, catalog: RoleCatalog, timeout: Duration) -> Self {
        Self {
            directory,
            catalog,
            timeout,
        }
    }

    pub async fn authorize_operator(&self, actor: &MemberId) -> Result<(), MoolaError> {
        let held = bounded(
            self.timeout,
            "member roles",
            self.directory.member_roles(actor),
        )
        .await?;
        if self.catalog.is_operator(&held) {
            Ok(())
        } else {
            warn!(actor = %actor, "Rejected operator command");
            Err(MoolaError::Forbidden(actor.clone()))
        }
    }
}
