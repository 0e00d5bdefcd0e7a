//! Expiry sweeper: zeroes balances past their expiry date.

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};

use crate::{CreditResult, CreditService, balances};

impl CreditService {
    /// Zeroes every positive balance whose `expires_at` is before `now`
    /// and returns the number of accounts affected.
    ///
    /// No compensating ledger entry is written, so swept accounts drift
    /// from their ledger sum until adjusted; `ledger_total` exposes the
    /// drift for audits.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> CreditResult<u64> {
        let result = balances::Entity::update_many()
            .col_expr(balances::Column::Balance, Expr::value(0_i64))
            .filter(balances::Column::ExpiresAt.lt(now))
            .filter(balances::Column::Balance.gt(0))
            .exec(&self.database)
            .await?;

        if result.rows_affected > 0 {
            tracing::info!(accounts = result.rows_affected, "expired balances swept");
        }
        Ok(result.rows_affected)
    }
}
