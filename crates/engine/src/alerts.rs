//! Low-balance alert records and threshold-crossing rules.
//!
//! One row per `(user, threshold)` for the lifetime of the account: a
//! permanent dedup guard, not a rolling window. A user whose balance
//! recovers and drops through the same threshold again is not re-alerted.

use chrono::Utc;
use sea_orm::{ActiveValue, DatabaseTransaction, QueryFilter, entity::prelude::*};
use uuid::Uuid;

use crate::{CreditResult, CreditService};

/// Default descending trip-wires for low-balance alerts.
pub const DEFAULT_THRESHOLDS: [i64; 3] = [10, 5, 0];

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub threshold: i64,
    pub sent_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Returns the highest threshold `t` with `before > t >= after`.
///
/// `thresholds` must be sorted descending, so the first match is the
/// highest crossed one; at most one threshold is reported even when a
/// single deduction crosses several.
pub(crate) fn crossed_threshold(thresholds: &[i64], before: i64, after: i64) -> Option<i64> {
    thresholds
        .iter()
        .copied()
        .find(|t| before > *t && *t >= after)
}

impl CreditService {
    /// True if an alert for `(user, threshold)` was ever recorded.
    pub(crate) async fn alert_already_sent(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &Uuid,
        threshold: i64,
    ) -> CreditResult<bool> {
        let existing = Entity::find()
            .filter(Column::UserId.eq(user_id.to_string()))
            .filter(Column::Threshold.eq(threshold))
            .one(db_tx)
            .await?;
        Ok(existing.is_some())
    }

    /// Writes the permanent dedup row for `(user, threshold)`.
    pub(crate) async fn record_alert(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &Uuid,
        threshold: i64,
    ) -> CreditResult<()> {
        let row = ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id.to_string()),
            threshold: ActiveValue::Set(threshold),
            sent_at: ActiveValue::Set(Utc::now()),
        };
        row.insert(db_tx).await?;
        Ok(())
    }
}
