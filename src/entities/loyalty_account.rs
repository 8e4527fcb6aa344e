use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One loyalty account per user. The balance is always reconstructible by
/// replaying the signed deltas in `loyalty_transactions`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loyalty_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,

    /// Current point balance; non-negative
    pub balance: i64,

    /// Cumulative spend in the current calendar year
    pub year_spend: Decimal,

    /// Advanced by 90-day expiries and annual resets; monotone
    pub last_reset_at: DateTime<Utc>,

    /// Cleared by the annual reset
    pub birthday_reward_sent: bool,

    /// The user's original registration date, anchor of the rolling
    /// 90-day cycle
    pub registered_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(has_many = "super::loyalty_transaction::Entity")]
    LoyaltyTransaction,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::loyalty_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LoyaltyTransaction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
