use crate::{
    entities::loyalty_account::{self, Entity as LoyaltyAccountEntity},
    entities::loyalty_transaction::{self, Entity as LedgerEntity, LoyaltyReason},
    entities::user::Entity as UserEntity,
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoyaltyAccountResponse {
    pub user_id: Uuid,
    pub balance: i64,
    pub year_spend: Decimal,
    pub last_reset_at: DateTime<Utc>,
    pub birthday_reward_sent: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntryResponse {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub points_delta: i64,
    pub reason: LoyaltyReason,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoyaltyStatementResponse {
    pub account: LoyaltyAccountResponse,
    pub transactions: Vec<LedgerEntryResponse>,
}

/// Read surface over loyalty accounts and their ledger.
#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DatabaseConnection>,
}

impl LoyaltyService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates the zero-balance account at user registration time.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn ensure_account(
        &self,
        user_id: Uuid,
    ) -> Result<loyalty_account::Model, ServiceError> {
        let db = &*self.db;
        if let Some(existing) = LoyaltyAccountEntity::find_by_id(user_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
        {
            return Ok(existing);
        }
        let registered_at = registration_anchor(db, user_id).await?;
        create_account(db, user_id, registered_at).await
    }

    /// Account plus full ledger, newest entries first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_statement(
        &self,
        user_id: Uuid,
    ) -> Result<LoyaltyStatementResponse, ServiceError> {
        let db = &*self.db;
        let account = LoyaltyAccountEntity::find_by_id(user_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Loyalty account for user {user_id} not found"))
            })?;

        let transactions = LedgerEntity::find()
            .filter(loyalty_transaction::Column::AccountId.eq(user_id))
            .order_by_desc(loyalty_transaction::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(LoyaltyStatementResponse {
            account: LoyaltyAccountResponse {
                user_id: account.user_id,
                balance: account.balance,
                year_spend: account.year_spend,
                last_reset_at: account.last_reset_at,
                birthday_reward_sent: account.birthday_reward_sent,
                registered_at: account.registered_at,
            },
            transactions: transactions
                .into_iter()
                .map(|t| LedgerEntryResponse {
                    id: t.id,
                    order_id: t.order_id,
                    points_delta: t.points_delta,
                    reason: t.reason,
                    detail: t.detail,
                    created_at: t.created_at,
                })
                .collect(),
        })
    }
}

/// Number of points earned for a paid order: the floor of the order total.
pub fn points_for_total(total: Decimal) -> Result<i64, ServiceError> {
    total.floor().to_i64().ok_or_else(|| {
        ServiceError::InvalidLedgerState(format!("order total {total} does not fit point range"))
    })
}

/// The user's original registration date; the anchor of the rolling 90-day
/// cycle. Falls back to now for users the auth collaborator has not synced.
pub(crate) async fn registration_anchor<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<DateTime<Utc>, ServiceError> {
    Ok(UserEntity::find_by_id(user_id)
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .map(|u| u.created_at)
        .unwrap_or_else(Utc::now))
}

pub(crate) async fn create_account<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    registered_at: DateTime<Utc>,
) -> Result<loyalty_account::Model, ServiceError> {
    let now = Utc::now();
    let account = loyalty_account::ActiveModel {
        user_id: Set(user_id),
        balance: Set(0),
        year_spend: Set(Decimal::ZERO),
        last_reset_at: Set(registered_at),
        birthday_reward_sent: Set(false),
        registered_at: Set(registered_at),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    };
    account
        .insert(conn)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Appends one immutable ledger row.
pub(crate) async fn append_transaction<C: ConnectionTrait>(
    conn: &C,
    account_id: Uuid,
    order_id: Option<Uuid>,
    points_delta: i64,
    reason: LoyaltyReason,
    detail: String,
) -> Result<(), ServiceError> {
    let entry = loyalty_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        account_id: Set(account_id),
        order_id: Set(order_id),
        points_delta: Set(points_delta),
        reason: Set(reason),
        detail: Set(detail),
        created_at: Set(Utc::now()),
    };
    entry
        .insert(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(())
}

/// Awards points for a paid order inside the caller's open transaction.
///
/// The ORDER_EARNED existence check, the balance increment and the ledger
/// append all run on `conn` so two concurrent verification calls cannot both
/// observe "not yet awarded". Returns the awarded points, or None when the
/// order was already awarded.
pub(crate) async fn award_order_points<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    order_total: Decimal,
) -> Result<Option<i64>, ServiceError> {
    // Row-lock the account being credited; lost updates from concurrent
    // awards for the same user are prevented here. SQLite serializes write
    // transactions and has no FOR UPDATE.
    let mut account_query = LoyaltyAccountEntity::find_by_id(user_id);
    if conn.get_database_backend() == DbBackend::Postgres {
        account_query = account_query.lock_exclusive();
    }
    let account = account_query
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let existing = LedgerEntity::find()
        .filter(loyalty_transaction::Column::OrderId.eq(order_id))
        .filter(loyalty_transaction::Column::Reason.eq(LoyaltyReason::OrderEarned))
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    if existing.is_some() {
        info!(order_id = %order_id, "Order already earned points; skipping award");
        return Ok(None);
    }

    let points = points_for_total(order_total)?;
    if points < 0 {
        return Err(ServiceError::InvalidLedgerState(format!(
            "negative award of {points} points for order {order_id}"
        )));
    }

    let now = Utc::now();
    match account {
        Some(account) => {
            let balance = account.balance;
            let year_spend = account.year_spend;
            let mut active: loyalty_account::ActiveModel = account.into();
            active.balance = Set(balance + points);
            active.year_spend = Set(year_spend + order_total);
            active.updated_at = Set(Some(now));
            active
                .update(conn)
                .await
                .map_err(ServiceError::DatabaseError)?;
        }
        None => {
            let registered_at = registration_anchor(conn, user_id).await?;
            let created = create_account(conn, user_id, registered_at).await?;
            let mut active: loyalty_account::ActiveModel = created.into();
            active.balance = Set(points);
            active.year_spend = Set(order_total);
            active.updated_at = Set(Some(now));
            active
                .update(conn)
                .await
                .map_err(ServiceError::DatabaseError)?;
        }
    }

    append_transaction(
        conn,
        user_id,
        Some(order_id),
        points,
        LoyaltyReason::OrderEarned,
        format!("Points earned for order {order_id}"),
    )
    .await?;

    Ok(Some(points))
}

/// Reconstructs a balance by replaying the ledger. The stored balance must
/// always equal this sum.
pub async fn replay_balance<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<i64, ServiceError> {
    let entries = LedgerEntity::find()
        .filter(loyalty_transaction::Column::AccountId.eq(user_id))
        .all(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(entries.iter().map(|e| e.points_delta).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn points_are_the_floor_of_the_total() {
        assert_eq!(points_for_total(dec!(21.98)).unwrap(), 21);
        assert_eq!(points_for_total(dec!(21.00)).unwrap(), 21);
        assert_eq!(points_for_total(dec!(0.99)).unwrap(), 0);
        assert_eq!(points_for_total(dec!(0)).unwrap(), 0);
    }
}
