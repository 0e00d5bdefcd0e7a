//! Grant processor: turns a purchase-completion event into one
//! idempotent ledger append + balance update.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, DatabaseTransaction, TransactionTrait, entity::prelude::*};
use uuid::Uuid;

use crate::{
    CreditError, CreditResult, CreditService, EntryReason, PurchaseEvent, balances, with_tx,
};

struct PackPolicy {
    expires_at: DateTime<Utc>,
    pack_key: String,
    auto_extend: bool,
}

impl CreditService {
    /// Applies a purchase-completion event exactly once.
    ///
    /// Returns the total credits granted; 0 when no line item maps to
    /// credits (a no-op, not an error). Redelivery of the same
    /// `source_id` returns the same total without mutating anything, so
    /// the call is safe to repeat an unbounded number of times.
    pub async fn grant(&self, event: PurchaseEvent) -> CreditResult<i64> {
        // Identity resolution may talk to an external collaborator, so it
        // happens before the transaction starts.
        let user_id = self.users.resolve_or_create(&event.payer_email).await?;

        let (credits, rule) = self.packs.credits_for_items(&event.line_items);
        if credits <= 0 {
            tracing::info!(
                %user_id,
                source_id = %event.source_id,
                "purchase event maps to no credits"
            );
            return Ok(0);
        }

        let now = Utc::now();
        let policy = match rule {
            Some(rule) => Some(PackPolicy {
                expires_at: rule.expires_at(now)?,
                pack_key: rule.key.clone(),
                auto_extend: rule.auto_extend,
            }),
            None => None,
        };

        with_tx!(self, |db_tx| {
            self.grant_in_tx(&db_tx, &user_id, credits, policy, &event.source_id)
                .await
        })?;

        Ok(credits)
    }

    async fn grant_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &Uuid,
        credits: i64,
        policy: Option<PackPolicy>,
        source_id: &str,
    ) -> CreditResult<()> {
        self.ensure_balance(db_tx, user_id).await?;
        let row = self.lock_balance(db_tx, user_id).await?;

        match self
            .append_entry(db_tx, user_id, credits, EntryReason::Purchase, Some(source_id))
            .await
        {
            Ok(entry) => {
                let mut update = balances::ActiveModel {
                    user_id: ActiveValue::Set(user_id.to_string()),
                    balance: ActiveValue::Set(row.balance + credits),
                    ..Default::default()
                };
                if let Some(policy) = policy {
                    // The newest pack's policy replaces whatever an earlier
                    // purchase set.
                    update.expires_at = ActiveValue::Set(Some(policy.expires_at));
                    update.last_pack = ActiveValue::Set(Some(policy.pack_key));
                    update.auto_extend = ActiveValue::Set(policy.auto_extend);
                }
                update.update(db_tx).await?;
                tracing::debug!(%user_id, credits, entry = entry.id, "credits granted");
                Ok(())
            }
            Err(CreditError::DuplicateEntry(_)) => {
                // Redelivered purchase event; the grant is already
                // committed, so answer with the same total and touch nothing.
                tracing::debug!(%user_id, source_id, "purchase already applied");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
