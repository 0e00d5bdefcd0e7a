//! Deduction processor: idempotent consumption with insufficient-balance
//! rejection and low-balance threshold alerts.

use chrono::Duration;
use sea_orm::{ActiveValue, DatabaseTransaction, TransactionTrait, entity::prelude::*};

use crate::{
    Balance, CreditError, CreditResult, CreditService, DeductCmd, LedgerEntry, alerts, balances,
    with_tx,
};

/// Result of a deduction: the post-deduction balance, the ledger entry
/// that paid for the work (pre-existing on a retried call), and the
/// threshold newly crossed, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct DeductOutcome {
    pub balance: Balance,
    pub entry: LedgerEntry,
    pub threshold_crossed: Option<i64>,
}

impl CreditService {
    /// Consumes credits for one unit of work, exactly once per `source_id`.
    ///
    /// Fails with [`CreditError::InsufficientCredits`] when the balance
    /// does not cover `amount`, leaving no trace. A retried call with an
    /// already-applied `source_id` reports the committed state unchanged.
    pub async fn deduct(&self, cmd: DeductCmd) -> CreditResult<DeductOutcome> {
        if cmd.amount <= 0 {
            return Err(CreditError::InvalidAmount(
                "deduction amount must be > 0".to_string(),
            ));
        }

        let outcome: DeductOutcome =
            with_tx!(self, |db_tx| self.deduct_in_tx(&db_tx, &cmd).await)?;

        if let Some(threshold) = outcome.threshold_crossed {
            // Fire-and-forget, and only after commit: the balance-row lock
            // must never be held across the notifier.
            self.notifier.notify_threshold(&cmd.user_id, threshold);
        }

        Ok(outcome)
    }

    async fn deduct_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        cmd: &DeductCmd,
    ) -> CreditResult<DeductOutcome> {
        self.ensure_balance(db_tx, &cmd.user_id).await?;
        let row = self.lock_balance(db_tx, &cmd.user_id).await?;

        if let Some(key) = cmd.source_id.as_deref()
            && let Some(existing) = self.find_by_source(db_tx, &cmd.user_id, key).await?
        {
            // Retry of an already-applied deduction: echo the committed
            // state, no second deduction.
            return Ok(DeductOutcome {
                balance: Balance::try_from(row)?,
                entry: existing,
                threshold_crossed: None,
            });
        }

        let before = row.balance;
        if before < cmd.amount {
            return Err(CreditError::InsufficientCredits {
                requested: cmd.amount,
                available: before,
            });
        }

        let entry = match self
            .append_entry(
                db_tx,
                &cmd.user_id,
                -cmd.amount,
                cmd.reason,
                cmd.source_id.as_deref(),
            )
            .await
        {
            Ok(entry) => entry,
            Err(CreditError::DuplicateEntry(key)) => {
                // Idempotency backstop: an identical retry slipped in on
                // another worker despite the row lock. Echo its result.
                let row = self.lock_balance(db_tx, &cmd.user_id).await?;
                let existing = self
                    .find_by_source(db_tx, &cmd.user_id, &key)
                    .await?
                    .ok_or_else(|| CreditError::KeyNotFound("ledger entry".to_string()))?;
                return Ok(DeductOutcome {
                    balance: Balance::try_from(row)?,
                    entry: existing,
                    threshold_crossed: None,
                });
            }
            Err(err) => return Err(err),
        };

        let after = before - cmd.amount;
        // Active use pushes expiry out for auto-extend packs.
        let expires_at = match (row.auto_extend, row.expires_at) {
            (true, Some(at)) => Some(
                at.checked_add_signed(Duration::days(balances::AUTO_EXTEND_WINDOW_DAYS))
                    .ok_or_else(|| {
                        CreditError::InvalidAmount("expiry extension overflows".to_string())
                    })?,
            ),
            (_, current) => current,
        };

        let update = balances::ActiveModel {
            user_id: ActiveValue::Set(cmd.user_id.to_string()),
            balance: ActiveValue::Set(after),
            expires_at: ActiveValue::Set(expires_at),
            ..Default::default()
        };
        update.update(db_tx).await?;

        let mut threshold_crossed = None;
        if let Some(threshold) = alerts::crossed_threshold(&self.thresholds, before, after)
            && !self.alert_already_sent(db_tx, &cmd.user_id, threshold).await?
        {
            self.record_alert(db_tx, &cmd.user_id, threshold).await?;
            threshold_crossed = Some(threshold);
        }

        let balance = Balance {
            user_id: cmd.user_id,
            balance: after,
            expires_at,
            last_pack: row.last_pack,
            auto_extend: row.auto_extend,
        };

        Ok(DeductOutcome {
            balance,
            entry,
            threshold_crossed,
        })
    }
}
