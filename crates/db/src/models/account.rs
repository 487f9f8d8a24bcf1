use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::entities::account;

/// A registered email/password account. `password_hash` is a PHC string and
/// never leaves the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
}

impl Account {
    fn from_model(model: account::Model) -> Self {
        Self {
            uid: model.uuid.simple().to_string(),
            email: model.email,
            password_hash: model.password_hash,
            display_name: model.display_name,
            created_at: model.created_at.into(),
        }
    }

    /// Looks up an account by its already-normalized email.
    pub async fn find_by_email<C: ConnectionTrait>(
        db: &C,
        email: &str,
    ) -> Result<Option<Self>, DbErr> {
        let record = account::Entity::find()
            .filter(account::Column::Email.eq(email))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &NewAccount,
        account_id: Uuid,
    ) -> Result<Self, DbErr> {
        let active = account::ActiveModel {
            uuid: Set(account_id),
            email: Set(data.email.clone()),
            password_hash: Set(data.password_hash.clone()),
            display_name: Set(data.display_name.clone()),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }
}
