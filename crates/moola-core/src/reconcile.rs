//! Threshold role reconciler.
//!
//! One run resolves a target team, lists its members and grants each member
//! the tier roles their balance qualifies for but they do not hold yet. Runs
//! only ever add roles. A failure on one member is logged and that member is
//! skipped; only role resolution or the member listing can fail a run.

use crate::config::{RoleCatalog, Tier};
use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::roles::RoleDirectory;
use crate::store::MemberStore;
use crate::teams::{TeamAggregator, TeamSelector};
use crate::types::{Member, MemberId, RoleId, Team};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Point thresholds for one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleThresholdSet {
    pub wl_threshold: u64,
    pub ml_threshold: u64,
    pub freemint_threshold: u64,
}

impl RoleThresholdSet {
    pub fn new(wl_threshold: u64, ml_threshold: u64, freemint_threshold: u64) -> Self {
        Self {
            wl_threshold,
            ml_threshold,
            freemint_threshold,
        }
    }

    pub fn threshold(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Whitelist => self.wl_threshold,
            Tier::Moolalist => self.ml_threshold,
            Tier::FreeMint => self.freemint_threshold,
        }
    }

    pub fn with_whitelist_minimum(mut self, minimum: u64) -> Self {
        self.wl_threshold = minimum;
        self
    }
}

impl Default for RoleThresholdSet {
    fn default() -> Self {
        Self {
            wl_threshold: 100,
            ml_threshold: 250,
            freemint_threshold: 1_000,
        }
    }
}

/// A single role granted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub member: MemberId,
    pub tier: Tier,
    pub role: RoleId,
}

/// A member the run could not finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMember {
    pub member: MemberId,
    pub reason: String,
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub team: Team,
    pub thresholds: RoleThresholdSet,
    pub members_seen: usize,
    /// Members that received at least one role.
    pub updated_count: usize,
    pub grants: Vec<RoleGrant>,
    pub skipped: Vec<SkippedMember>,
}

impl ReconcileReport {
    pub fn skipped_ids(&self) -> Vec<MemberId> {
        self.skipped.iter().map(|skip| skip.member.clone()).collect()
    }
}

/// Tier roles a member qualifies for but holds neither base nor winner role of.
pub fn plan_grants(
    points: u64,
    thresholds: &RoleThresholdSet,
    held: &BTreeSet<RoleId>,
    catalog: &RoleCatalog,
) -> Vec<(Tier, RoleId)> {
    Tier::ALL
        .iter()
        .filter(|tier| points >= thresholds.threshold(**tier))
        .filter(|tier| !catalog.tier(**tier).held_by(held))
        .map(|tier| (*tier, catalog.tier(*tier).base.clone()))
        .collect()
}

fn qualifies_for_any(points: u64, thresholds: &RoleThresholdSet) -> bool {
    Tier::ALL
        .iter()
        .any(|tier| points >= thresholds.threshold(*tier))
}

enum MemberOutcome {
    Unchanged,
    Updated(Vec<RoleGrant>),
    Skipped {
        skipped: SkippedMember,
        granted: Vec<RoleGrant>,
    },
}

pub struct RoleReconciler {
    store: Arc<dyn MemberStore>,
    directory: Arc<dyn RoleDirectory>,
    teams: Arc<TeamAggregator>,
    catalog: RoleCatalog,
    timeout: Duration,
    concurrency: usize,
}

impl RoleReconciler {
    pub fn new(
        store: Arc<dyn MemberStore>,
        directory: Arc<dyn RoleDirectory>,
        teams: Arc<TeamAggregator>,
        catalog: RoleCatalog,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            directory,
            teams,
            catalog,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(
        &self,
        selector: TeamSelector,
        thresholds: RoleThresholdSet,
    ) -> Result<ReconcileReport, MoolaError> {
        self.verify_roles().await?;

        let team = self.teams.resolve(selector).await?;
        let members = bounded(
            self.timeout,
            "member listing",
            self.store.list_members(Some(team)),
        )
        .await
        .map_err(|err| {
            error!(team = %team, error = %err, "Role reconciliation aborted: member listing failed");
            err
        })?;

        info!(
            team = %team,
            members = members.len(),
            wl = thresholds.wl_threshold,
            ml = thresholds.ml_threshold,
            free_mint = thresholds.freemint_threshold,
            "Starting role reconciliation"
        );

        let members_seen = members.len();
        let outcomes = stream::iter(members)
            .map(|member| self.reconcile_member(member, thresholds))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut grants = Vec::new();
        let mut skipped = Vec::new();
        let mut updated_count = 0;
        for outcome in outcomes {
            match outcome {
                MemberOutcome::Unchanged => {}
                MemberOutcome::Updated(granted) => {
                    updated_count += 1;
                    grants.extend(granted);
                }
                MemberOutcome::Skipped {
                    skipped: skip,
                    granted,
                } => {
                    if !granted.is_empty() {
                        updated_count += 1;
                        grants.extend(granted);
                    }
                    skipped.push(skip);
                }
            }
        }
        grants.sort_by(|a, b| (&a.member, a.tier).cmp(&(&b.member, b.tier)));
        skipped.sort_by(|a, b| a.member.cmp(&b.member));

        info!(
            team = %team,
            updated = updated_count,
            grants = grants.len(),
            skipped = skipped.len(),
            "Role reconciliation completed"
        );

        Ok(ReconcileReport {
            team,
            thresholds,
            members_seen,
            updated_count,
            grants,
            skipped,
        })
    }

    async fn verify_roles(&self) -> Result<(), MoolaError> {
        for role in self.catalog.reconciliation_roles() {
            let exists = bounded(
                self.timeout,
                "role lookup",
                self.directory.role_exists(role),
            )
            .await?;
            if !exists {
                error!(role = %role, "Role reconciliation aborted: role not found");
                return Err(MoolaError::Configuration(format!(
                    "role '{role}' does not exist in the role directory"
                )));
            }
        }
        Ok(())
    }

    async fn reconcile_member(&self, member: Member, thresholds: RoleThresholdSet) -> MemberOutcome {
        if !qualifies_for_any(member.points, &thresholds) {
            return MemberOutcome::Unchanged;
        }

        let id = member.external_id;
        let held = match bounded(
            self.timeout,
            "member roles",
            self.directory.member_roles(&id),
        )
        .await
        {
            Ok(held) => held,
            Err(err) => {
                warn!(member = %id, error = %err, "Skipping member: role lookup failed");
                return MemberOutcome::Skipped {
                    skipped: SkippedMember {
                        member: id,
                        reason: err.to_string(),
                    },
                    granted: Vec::new(),
                };
            }
        };

        let mut granted = Vec::new();
        for (tier, role) in plan_grants(member.points, &thresholds, &held, &self.catalog) {
            match bounded(
                self.timeout,
                "role grant",
                self.directory.grant_role(&id, &role),
            )
            .await
            {
                Ok(()) => {
                    debug!(member = %id, tier = tier.as_str(), role = %role, "Granted tier role");
                    granted.push(RoleGrant {
                        member: id.clone(),
                        tier,
                        role,
                    });
                }
                Err(err) => {
                    warn!(member = %id, tier = tier.as_str(), error = %err, "Skipping member: role grant failed");
                    return MemberOutcome::Skipped {
                        skipped: SkippedMember {
                            member: id,
                            reason: err.to_string(),
                        },
                        granted,
                    };
                }
            }
        }

        if granted.is_empty() {
            MemberOutcome::Unchanged
        } else {
            info!(member = %id, grants = granted.len(), "Updated roles for member");
            MemberOutcome::Updated(granted)
        }
    }
}
