//! Manual ledger adjustments, the operator write path.

use sea_orm::{ActiveValue, TransactionTrait, entity::prelude::*};
use uuid::Uuid;

use crate::{
    CreditError, CreditResult, CreditService, EntryReason, LedgerEntry, balances, with_tx,
};

impl CreditService {
    /// Applies a signed operator adjustment to a user's balance.
    ///
    /// Shares the transactional shape of grant and deduct (ledger append
    /// and balance update in one unit) and rejects adjustments that would
    /// drive the balance negative. Unlike grant and deduct, a duplicate
    /// `source_id` surfaces as [`CreditError::DuplicateEntry`] for the
    /// operator to inspect.
    pub async fn adjust(
        &self,
        user_id: Uuid,
        delta: i64,
        source_id: Option<String>,
    ) -> CreditResult<LedgerEntry> {
        if delta == 0 {
            return Err(CreditError::InvalidAmount(
                "adjustment delta must not be 0".to_string(),
            ));
        }

        with_tx!(self, |db_tx| {
            self.ensure_balance(&db_tx, &user_id).await?;
            let row = self.lock_balance(&db_tx, &user_id).await?;

            let after = row.balance + delta;
            if after < 0 {
                return Err(CreditError::InsufficientCredits {
                    requested: -delta,
                    available: row.balance,
                });
            }

            let entry = self
                .append_entry(
                    &db_tx,
                    &user_id,
                    delta,
                    EntryReason::Adjustment,
                    source_id.as_deref(),
                )
                .await?;

            let update = balances::ActiveModel {
                user_id: ActiveValue::Set(user_id.to_string()),
                balance: ActiveValue::Set(after),
                ..Default::default()
            };
            update.update(&db_tx).await?;

            tracing::debug!(%user_id, delta, entry = entry.id, "balance adjusted");
            Ok(entry)
        })
    }
}
