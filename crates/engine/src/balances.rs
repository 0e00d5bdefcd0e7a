//! Denormalized per-user balance rows.
//!
//! A balance row is created lazily on the first grant or deduct and is
//! only ever mutated inside the same database transaction as a ledger
//! insert, so `balance == SUM(delta)` over the user's entries holds by
//! construction (the expiry sweeper is the one documented exception).

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, DatabaseTransaction, QuerySelect, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CreditError, CreditResult, CreditService, users::parse_user_id};

/// How far one consumption pushes `expires_at` for auto-extend packs.
pub(crate) const AUTO_EXTEND_WINDOW_DAYS: i64 = 30;

/// A user's current credit standing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: Uuid,
    pub balance: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_pack: Option<String>,
    pub auto_extend: bool,
}

impl Balance {
    pub(crate) fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: 0,
            expires_at: None,
            last_pack: None,
            auto_extend: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "balances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub balance: i64,
    pub expires_at: Option<DateTimeUtc>,
    pub last_pack: Option<String>,
    pub auto_extend: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Balance {
    type Error = CreditError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: parse_user_id(&model.user_id)?,
            balance: model.balance,
            expires_at: model.expires_at,
            last_pack: model.last_pack,
            auto_extend: model.auto_extend,
        })
    }
}

impl CreditService {
    /// Returns a user's current balance; zero/empty for unknown users.
    pub async fn balance(&self, user_id: &Uuid) -> CreditResult<Balance> {
        let model = Entity::find_by_id(user_id.to_string())
            .one(&self.database)
            .await?;
        match model {
            Some(model) => Balance::try_from(model),
            None => Ok(Balance::empty(*user_id)),
        }
    }

    /// Inserts a zero balance row if the user has none yet.
    pub(crate) async fn ensure_balance(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &Uuid,
    ) -> CreditResult<()> {
        if Entity::find_by_id(user_id.to_string())
            .one(db_tx)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let row = ActiveModel {
            user_id: ActiveValue::Set(user_id.to_string()),
            balance: ActiveValue::Set(0),
            expires_at: ActiveValue::Set(None),
            last_pack: ActiveValue::Set(None),
            auto_extend: ActiveValue::Set(false),
        };
        if let Err(err) = row.insert(db_tx).await {
            // Another worker may have created the row first.
            if Entity::find_by_id(user_id.to_string())
                .one(db_tx)
                .await?
                .is_some()
            {
                return Ok(());
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Reads the balance row under an exclusive row lock.
    ///
    /// Serializes grant/deduct work for one user without blocking other
    /// users. SQLite ignores the lock clause and serializes writer
    /// transactions at the connection level instead.
    pub(crate) async fn lock_balance(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &Uuid,
    ) -> CreditResult<Model> {
        Entity::find_by_id(user_id.to_string())
            .lock_exclusive()
            .one(db_tx)
            .await?
            .ok_or_else(|| CreditError::KeyNotFound("balance".to_string()))
    }
}
