use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reason codes for ledger entries.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(40))")]
pub enum LoyaltyReason {
    /// Points earned for a paid order; at most one per order
    #[sea_orm(string_value = "ORDER_EARNED")]
    OrderEarned,
    /// Rolling 90-day expiry anchored to the registration date
    #[sea_orm(string_value = "POINTS_EXPIRED_90_DAY_CYCLE")]
    PointsExpired90DayCycle,
    #[sea_orm(string_value = "BIRTHDAY_REWARD")]
    BirthdayReward,
    #[sea_orm(string_value = "MANUAL_ADJUSTMENT")]
    ManualAdjustment,
}

/// Append-only ledger of point balance changes. Rows are never mutated or
/// deleted; the ORDER_EARNED uniqueness per order is the idempotency anchor
/// against double-awarding.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loyalty_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Loyalty account (user) this entry belongs to
    pub account_id: Uuid,

    /// Originating order; null for non-order events such as expiry
    pub order_id: Option<Uuid>,

    /// Signed point delta
    pub points_delta: i64,

    pub reason: LoyaltyReason,

    pub detail: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::loyalty_account::Entity",
        from = "Column::AccountId",
        to = "super::loyalty_account::Column::UserId"
    )]
    LoyaltyAccount,
}

impl Related<super::loyalty_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LoyaltyAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
