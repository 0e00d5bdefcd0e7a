//! Ledger entries: the append-only source of truth for balances.
//!
//! Entries are immutable once written; the store never updates or
//! deletes them. A unique index on `(user_id, source_id)` makes writes
//! idempotent under retries regardless of locking.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, ConnectionTrait, DatabaseTransaction, QueryFilter, QueryOrder, QuerySelect,
    Statement, entity::prelude::*,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CreditError, CreditResult, CreditService, users::parse_user_id};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    Purchase,
    Consumption,
    Adjustment,
}

impl EntryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Consumption => "consumption",
            Self::Adjustment => "adjustment",
        }
    }
}

impl TryFrom<&str> for EntryReason {
    type Error = CreditError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "purchase" => Ok(Self::Purchase),
            "consumption" => Ok(Self::Consumption),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(CreditError::InvalidAmount(format!(
                "invalid entry reason: {other}"
            ))),
        }
    }
}

/// A single signed credit movement.
///
/// `delta` is positive for grants and negative for consumption. `id` is
/// assigned by the store and monotonic, which gives a stable per-user
/// ordering for newest-first listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: Uuid,
    pub delta: i64,
    pub reason: EntryReason,
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub delta: i64,
    pub reason: String,
    pub source_id: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for LedgerEntry {
    type Error = CreditError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: parse_user_id(&model.user_id)?,
            delta: model.delta,
            reason: EntryReason::try_from(model.reason.as_str())?,
            source_id: model.source_id,
            created_at: model.created_at,
        })
    }
}

impl CreditService {
    /// Appends a ledger entry inside `db_tx`.
    ///
    /// When `source_id` is given and an entry for `(user_id, source_id)`
    /// already exists, no second row is created; the store reports
    /// [`CreditError::DuplicateEntry`] so the caller can fetch and return
    /// the committed entry instead.
    pub(crate) async fn append_entry(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &Uuid,
        delta: i64,
        reason: EntryReason,
        source_id: Option<&str>,
    ) -> CreditResult<LedgerEntry> {
        if let Some(key) = source_id
            && self.find_by_source(db_tx, user_id, key).await?.is_some()
        {
            return Err(CreditError::DuplicateEntry(key.to_string()));
        }

        let entry = ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id.to_string()),
            delta: ActiveValue::Set(delta),
            reason: ActiveValue::Set(reason.as_str().to_string()),
            source_id: ActiveValue::Set(source_id.map(str::to_string)),
            created_at: ActiveValue::Set(Utc::now()),
        };
        match entry.insert(db_tx).await {
            Ok(model) => LedgerEntry::try_from(model),
            Err(err) => {
                // A retry may have won the unique-index race between the
                // pre-check and the insert.
                if let Some(key) = source_id
                    && self.find_by_source(db_tx, user_id, key).await?.is_some()
                {
                    return Err(CreditError::DuplicateEntry(key.to_string()));
                }
                Err(err.into())
            }
        }
    }

    pub(crate) async fn find_by_source(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &Uuid,
        source_id: &str,
    ) -> CreditResult<Option<LedgerEntry>> {
        let model = Entity::find()
            .filter(Column::UserId.eq(user_id.to_string()))
            .filter(Column::SourceId.eq(source_id.to_string()))
            .one(db_tx)
            .await?;
        model.map(LedgerEntry::try_from).transpose()
    }

    /// Lists a user's most recent ledger entries, newest first.
    pub async fn transactions(&self, user_id: &Uuid, limit: u64) -> CreditResult<Vec<LedgerEntry>> {
        let models = Entity::find()
            .filter(Column::UserId.eq(user_id.to_string()))
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        models.into_iter().map(LedgerEntry::try_from).collect()
    }

    /// Sums a user's ledger deltas.
    ///
    /// Equals the cached balance at all times except right after an
    /// expiry sweep, which zeroes balances without a compensating entry.
    pub async fn ledger_total(&self, user_id: &Uuid) -> CreditResult<i64> {
        let backend = self.database.get_database_backend();
        let stmt = Statement::from_sql_and_values(
            backend,
            "SELECT COALESCE(SUM(delta), 0) AS total \
             FROM ledger_entries \
             WHERE user_id = ?",
            vec![user_id.to_string().into()],
        );
        let row = self.database.query_one(stmt).await?;
        Ok(row.and_then(|r| r.try_get("", "total").ok()).unwrap_or(0))
    }
}
