//! Users table (minimal entity) and the identity-resolution seam.
//!
//! The engine only needs a stable id per payer. [`DbUserResolver`]
//! upserts one row per normalized email; deployments with an external
//! identity provider substitute their own [`UserResolver`].

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveValue, DatabaseConnection, QueryFilter, entity::prelude::*};
use uuid::Uuid;

use crate::{CreditError, CreditResult};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub email: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Resolves a payer email to a stable user id.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve_or_create(&self, email: &str) -> CreditResult<Uuid>;
}

/// Default resolver: one `users` row per lowercased email.
pub struct DbUserResolver {
    database: DatabaseConnection,
}

impl DbUserResolver {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

#[async_trait]
impl UserResolver for DbUserResolver {
    async fn resolve_or_create(&self, email: &str) -> CreditResult<Uuid> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(CreditError::InvalidAmount(
                "payer email must not be empty".to_string(),
            ));
        }

        if let Some(model) = Entity::find()
            .filter(Column::Email.eq(email.clone()))
            .one(&self.database)
            .await?
        {
            return parse_user_id(&model.id);
        }

        let id = Uuid::new_v4();
        let row = ActiveModel {
            id: ActiveValue::Set(id.to_string()),
            email: ActiveValue::Set(email.clone()),
            created_at: ActiveValue::Set(Utc::now()),
        };
        match row.insert(&self.database).await {
            Ok(_) => Ok(id),
            Err(err) => {
                // A concurrent grant for the same payer may have inserted
                // the row first.
                if let Some(model) = Entity::find()
                    .filter(Column::Email.eq(email))
                    .one(&self.database)
                    .await?
                {
                    return parse_user_id(&model.id);
                }
                Err(err.into())
            }
        }
    }
}

pub(crate) fn parse_user_id(raw: &str) -> CreditResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| CreditError::KeyNotFound("user".to_string()))
}
