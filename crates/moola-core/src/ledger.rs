//! Points ledger.
//!
//! Every mutation reads a fresh balance, validates it, then writes with a
//! compare-and-set against that balance. A lost race re-reads and retries;
//! no write is ever a blind increment.

use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::store::{BalanceChange, CasOutcome, MemberStore};
use crate::types::{BalanceReceipt, Member, MemberId, TransferReceipt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PointsLedger {
    store: Arc<dyn MemberStore>,
    timeout: Duration,
    max_attempts: u32,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn MemberStore>, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn balance(&self, id: &MemberId) -> Result<u64, MoolaError> {
        self.fetch(id)
            .await?
            .map(|member| member.points)
            .ok_or_else(|| MoolaError::NotLinked(id.clone()))
    }

    /// Move `amount` from `from` to `to`; both balances change or neither does.
    pub async fn transfer(
        &self,
        from: &MemberId,
        to: &MemberId,
        amount: u64,
    ) -> Result<TransferReceipt, MoolaError> {
        ensure_positive(amount)?;

        for attempt in 1..=self.max_attempts {
            let sender = self
                .fetch(from)
                .await?
                .ok_or_else(|| MoolaError::SenderNotFound(from.clone()))?;
            let receiver = if from == to {
                sender.clone()
            } else {
                self.fetch(to)
                    .await?
                    .ok_or_else(|| MoolaError::ReceiverNotFound(to.clone()))?
            };

            if sender.points < amount {
                warn!(
                    from = %from,
                    to = %to,
                    amount,
                    available = sender.points,
                    "Transfer rejected for insufficient balance"
                );
                return Err(MoolaError::InsufficientBalance {
                    available: sender.points,
                    requested: amount,
                });
            }

            if from == to {
                debug!(member = %from, amount, "Self-transfer validated; nothing to move");
                return Ok(TransferReceipt {
                    from: from.clone(),
                    to: to.clone(),
                    amount,
                    from_balance: sender.points,
                    to_balance: sender.points,
                });
            }

            let sender_after = sender.points - amount;
            let receiver_after = receiver.points.checked_add(amount).ok_or_else(|| {
                MoolaError::Validation(format!("transfer would overflow the balance of '{to}'"))
            })?;

            let changes = [
                BalanceChange::new(from.clone(), sender.points, sender_after),
                BalanceChange::new(to.clone(), receiver.points, receiver_after),
            ];
            match self.apply(&changes).await? {
                CasOutcome::Applied => {
                    info!(from = %from, to = %to, amount, "Transfer committed");
                    return Ok(TransferReceipt {
                        from: from.clone(),
                        to: to.clone(),
                        amount,
                        from_balance: sender_after,
                        to_balance: receiver_after,
                    });
                }
                CasOutcome::Conflict => {
                    debug!(from = %from, to = %to, attempt, "Transfer lost a balance race; retrying");
                }
            }
        }

        Err(MoolaError::Contention(from.clone()))
    }

    /// Remove `amount` from the economy.
    pub async fn fine(&self, target: &MemberId, amount: u64) -> Result<BalanceReceipt, MoolaError> {
        ensure_positive(amount)?;

        for attempt in 1..=self.max_attempts {
            let member = self
                .fetch(target)
                .await?
                .ok_or_else(|| MoolaError::TargetNotFound(target.clone()))?;

            if member.points < amount {
                warn!(
                    target = %target,
                    amount,
                    available = member.points,
                    "Fine rejected for insufficient balance"
                );
                return Err(MoolaError::InsufficientBalance {
                    available: member.points,
                    requested: amount,
                });
            }

            let after = member.points - amount;
            let change = [BalanceChange::new(target.clone(), member.points, after)];
            match self.apply(&change).await? {
                CasOutcome::Applied => {
                    info!(target = %target, amount, new_balance = after, "Fine committed");
                    return Ok(BalanceReceipt {
                        member: target.clone(),
                        amount,
                        new_balance: after,
                    });
                }
                CasOutcome::Conflict => {
                    debug!(target = %target, attempt, "Fine lost a balance race; retrying");
                }
            }
        }

        Err(MoolaError::Contention(target.clone()))
    }

    /// Add newly earned points to a member.
    pub async fn credit(
        &self,
        target: &MemberId,
        amount: u64,
    ) -> Result<BalanceReceipt, MoolaError> {
        ensure_positive(amount)?;

        for attempt in 1..=self.max_attempts {
            let member = self
                .fetch(target)
                .await?
                .ok_or_else(|| MoolaError::TargetNotFound(target.clone()))?;

            let after = member.points.checked_add(amount).ok_or_else(|| {
                MoolaError::Validation(format!("credit would overflow the balance of '{target}'"))
            })?;
            let change = [BalanceChange::new(target.clone(), member.points, after)];
            match self.apply(&change).await? {
                CasOutcome::Applied => {
                    info!(target = %target, amount, new_balance = after, "Credit committed");
                    return Ok(BalanceReceipt {
                        member: target.clone(),
                        amount,
                        new_balance: after,
                    });
                }
                CasOutcome::Conflict => {
                    debug!(target = %target, attempt, "Credit lost a balance race; retrying");
                }
            }
        }

        Err(MoolaError::Contention(target.clone()))
    }

    async fn fetch(&self, id: &MemberId) -> Result<Option<Member>, MoolaError> {
        bounded(self.timeout, "member lookup", self.store.get_member(id)).await
    }

    async fn apply(&self, changes: &[BalanceChange]) -> Result<CasOutcome, MoolaError> {
        bounded(
            self.timeout,
            "balance update",
            self.store.apply_balance_changes(changes),
        )
        .await
    }
}

fn ensure_positive(amount: u64) -> Result<(), MoolaError> {
    if amount == 0 {
        return Err(MoolaError::Validation(
            "amount must be a positive integer".to_string(),
        ));
    }
    Ok(())
}
