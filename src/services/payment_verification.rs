use crate::{
    entities::order::{ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::loyalty,
    services::orders::{to_response, OrderResponse},
    services::payment_gateway::PaymentGateway,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Reconciles local order state against the provider's authoritative checkout
/// state. Safe to call repeatedly and concurrently from both the client
/// polling path and the provider webhook path.
pub struct PaymentVerificationService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentVerificationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Verifies payment for an order and drives the state machine forward.
    ///
    /// No-op unless the order is AWAITING_PAYMENT with a checkout id, which
    /// makes repeated and concurrent invocations side-effect free once the
    /// order has moved on. Always returns the reloaded order with items.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn verify_payment(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let checkout_id = match (order.status, order.checkout_id.as_deref()) {
            (OrderStatus::AwaitingPayment, Some(id)) => id.to_string(),
            _ => {
                info!(order_id = %order_id, status = %order.status, "Verification no-op");
                return self.reload(order_id).await;
            }
        };

        // Provider errors leave the order exactly as it was; the caller
        // retries and the next attempt reconciles.
        let checkout = self.gateway.get_checkout(&checkout_id).await.map_err(|e| {
            error!(order_id = %order_id, checkout_id = %checkout_id, error = %e, "Provider status query failed");
            ServiceError::from(e)
        })?;

        if checkout.status.is_paid() {
            self.confirm_and_award(order_id).await?;
        } else if checkout.status.is_terminal() {
            self.mark_payment_failed(order_id).await?;
        } else {
            info!(order_id = %order_id, "Checkout still pending at provider");
        }

        self.reload(order_id).await
    }

    /// Transition to PAYMENT_CONFIRMED and award loyalty points in one
    /// database transaction.
    async fn confirm_and_award(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        // Re-read under the transaction (FOR UPDATE on Postgres) and
        // re-check: a concurrent verification may already have advanced the
        // order, and a more-advanced state is never regressed.
        let mut order_query = OrderEntity::find_by_id(order_id);
        if txn.get_database_backend() == DbBackend::Postgres {
            order_query = order_query.lock_exclusive();
        }
        let order = order_query
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::AwaitingPayment {
            info!(order_id = %order_id, status = %order.status, "Order already advanced; skipping confirmation");
            txn.commit().await.map_err(ServiceError::DatabaseError)?;
            return Ok(());
        }

        let user_id = order.user_id;
        let total = order.total_amount;

        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::PaymentConfirmed);
        active.updated_at = Set(Some(Utc::now()));
        active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let awarded = match user_id {
            Some(user_id) => loyalty::award_order_points(&txn, user_id, order_id, total).await?,
            None => None,
        };

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, awarded = ?awarded, "Payment confirmed");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::PaymentConfirmed(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send payment confirmed event");
            }
            if let (Some(user_id), Some(points)) = (user_id, awarded) {
                if let Err(e) = event_sender
                    .send(Event::PointsAwarded {
                        user_id,
                        order_id,
                        points,
                    })
                    .await
                {
                    warn!(error = %e, order_id = %order_id, "Failed to send points awarded event");
                }
            }
        }

        Ok(())
    }

    /// Transition to PAYMENT_FAILED, but only when the order is still
    /// AWAITING_PAYMENT.
    async fn mark_payment_failed(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        // Same locked re-read as confirmation: a confirm committing between
        // an unlocked read and this update would be overwritten otherwise.
        let mut order_query = OrderEntity::find_by_id(order_id);
        if txn.get_database_backend() == DbBackend::Postgres {
            order_query = order_query.lock_exclusive();
        }
        let order = order_query
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::AwaitingPayment {
            txn.commit().await.map_err(ServiceError::DatabaseError)?;
            return Ok(());
        }

        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::PaymentFailed);
        active.updated_at = Set(Some(Utc::now()));
        active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        warn!(order_id = %order_id, "Payment failed at provider");
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::PaymentFailed(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send payment failed event");
            }
        }

        Ok(())
    }

    /// Reloads the authoritative post-verification order with its items.
    async fn reload(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(to_response(order, items))
    }
}
