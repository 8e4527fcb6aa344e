use crate::{
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, FulfillmentMethod,
        Model as OrderModel, OrderStatus,
    },
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Request/response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    /// Owning user; omit for guest orders
    pub user_id: Option<Uuid>,
    pub fulfillment: FulfillmentMethod,
    pub delivery_address: Option<String>,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CreateOrderItem>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderItem {
    pub menu_item_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub customization: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub menu_item_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub customization: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub checkout_id: Option<String>,
    pub fulfillment: FulfillmentMethod,
    pub delivery_address: Option<String>,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

/// Listing entry without line items.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub fulfillment: FulfillmentMethod,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Service for order persistence and state-machine transitions.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Creates an order in AWAITING_PAYMENT. The total is the sum of
    /// line-item price x quantity at creation time and is never recomputed.
    #[instrument(skip(self, request), fields(user_id = ?request.user_id, item_count = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if request.fulfillment.is_delivery()
            && request
                .delivery_address
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(ServiceError::ValidationError(
                "Delivery orders require a delivery address".to_string(),
            ));
        }

        let mut total = Decimal::ZERO;
        for item in &request.items {
            if item.quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "Item quantity must be at least 1".to_string(),
                ));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Item price must not be negative".to_string(),
                ));
            }
            total += item.unit_price * Decimal::from(item.quantity);
        }

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_active = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(request.user_id),
            status: Set(OrderStatus::AwaitingPayment),
            total_amount: Set(total),
            currency: Set(request.currency.clone()),
            checkout_id: Set(None),
            fulfillment: Set(request.fulfillment),
            delivery_address: Set(request.delivery_address.clone()),
            estimated_ready_at: Set(None),
            ready_at: Set(None),
            cancel_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        order_active.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        for item in &request.items {
            let item_active = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                menu_item_id: Set(item.menu_item_id),
                name: Set(item.name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                customization: Set(item.customization.clone()),
                created_at: Set(now),
            };
            item_active.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to create order item");
                ServiceError::DatabaseError(e)
            })?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, total = %total, "Order created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order created event");
            }
        }

        self.get_order(order_id).await
    }

    /// Retrieves an order with its line items.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
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

    /// Returns only the order status.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        let db = &*self.db;
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        Ok(order.status)
    }

    /// Lists orders matching any of the given statuses, newest first.
    #[instrument(skip(self), fields(statuses = ?statuses))]
    pub async fn list_orders_by_status(
        &self,
        statuses: Vec<OrderStatus>,
    ) -> Result<Vec<OrderSummary>, ServiceError> {
        let db = &*self.db;
        let orders = OrderEntity::find()
            .filter(order::Column::Status.is_in(statuses))
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(orders
            .into_iter()
            .map(|o| OrderSummary {
                id: o.id,
                user_id: o.user_id,
                status: o.status,
                total_amount: o.total_amount,
                fulfillment: o.fulfillment,
                estimated_ready_at: o.estimated_ready_at,
                ready_at: o.ready_at,
                created_at: o.created_at,
            })
            .collect())
    }

    /// Admin accepts a paid order. Delivery orders move directly to READY
    /// with `ready_at` stamped; pickup orders move to CONFIRMED with no
    /// `ready_at`.
    #[instrument(skip(self), fields(order_id = %order_id, estimated_minutes = estimated_minutes))]
    pub async fn accept_order(
        &self,
        order_id: Uuid,
        estimated_minutes: i64,
    ) -> Result<OrderResponse, ServiceError> {
        if estimated_minutes < 0 {
            return Err(ServiceError::ValidationError(
                "Estimated minutes must not be negative".to_string(),
            ));
        }

        let db = &*self.db;
        let now = Utc::now();
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let target = if order.fulfillment.is_delivery() {
            OrderStatus::Ready
        } else {
            OrderStatus::Confirmed
        };
        let old_status = order.status;
        check_transition(old_status, target)?;

        let mut active: OrderActiveModel = order.into();
        active.status = Set(target);
        active.estimated_ready_at = Set(Some(now + Duration::minutes(estimated_minutes)));
        if target == OrderStatus::Ready {
            active.ready_at = Set(Some(now));
        }
        active.updated_at = Set(Some(now));
        active.update(&txn).await.map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, from = %old_status, to = %target, "Order accepted");
        self.notify_status_change(order_id, old_status, target).await;

        self.get_order(order_id).await
    }

    /// Admin declines a paid or confirmed order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn decline_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let old_status = order.status;
        check_transition(old_status, OrderStatus::Cancelled)?;

        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.cancel_reason = Set(reason);
        active.updated_at = Set(Some(now));
        active.update(&txn).await.map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, from = %old_status, "Order declined");
        self.notify_status_change(order_id, old_status, OrderStatus::Cancelled)
            .await;

        self.get_order(order_id).await
    }

    /// Downstream admin/driver transitions (PREPARING, READY,
    /// OUT_FOR_DELIVERY, DELIVERED, CANCELLED). Payment transitions are
    /// driven exclusively by payment verification.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        if matches!(
            new_status,
            OrderStatus::AwaitingPayment
                | OrderStatus::PaymentConfirmed
                | OrderStatus::PaymentFailed
        ) {
            return Err(ServiceError::ValidationError(format!(
                "Status {new_status} is driven by payment verification, not direct updates"
            )));
        }

        let db = &*self.db;
        let now = Utc::now();
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if new_status == OrderStatus::OutForDelivery && !order.fulfillment.is_delivery() {
            return Err(ServiceError::ValidationError(
                "Pickup orders cannot go out for delivery".to_string(),
            ));
        }

        let old_status = order.status;
        check_transition(old_status, new_status)?;

        let ready_at = order.ready_at;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(new_status);
        if new_status == OrderStatus::Ready && ready_at.is_none() {
            active.ready_at = Set(Some(now));
        }
        active.updated_at = Set(Some(now));
        active.update(&txn).await.map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, from = %old_status, to = %new_status, "Order status updated");
        self.notify_status_change(order_id, old_status, new_status)
            .await;

        self.get_order(order_id).await
    }

    async fn notify_status_change(&self, order_id: Uuid, old: OrderStatus, new: OrderStatus) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old.as_str().to_string(),
                    new_status: new.as_str().to_string(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send status change event");
            }
        }
    }
}

/// Rejects transitions not enumerated by the state machine.
pub(crate) fn check_transition(
    current: OrderStatus,
    requested: OrderStatus,
) -> Result<(), ServiceError> {
    if current.can_transition_to(requested) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition {
            current: current.as_str().to_string(),
            requested: requested.as_str().to_string(),
        })
    }
}

pub(crate) fn to_response(order: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        user_id: order.user_id,
        status: order.status,
        total_amount: order.total_amount,
        currency: order.currency,
        checkout_id: order.checkout_id,
        fulfillment: order.fulfillment,
        delivery_address: order.delivery_address,
        estimated_ready_at: order.estimated_ready_at,
        ready_at: order.ready_at,
        cancel_reason: order.cancel_reason,
        created_at: order.created_at,
        updated_at: order.updated_at,
        items: items
            .into_iter()
            .map(|i| OrderItemResponse {
                id: i.id,
                menu_item_id: i.menu_item_id,
                name: i.name,
                quantity: i.quantity,
                unit_price: i.unit_price,
                customization: i.customization,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_transition_names_both_states() {
        let err = check_transition(OrderStatus::Delivered, OrderStatus::Preparing).unwrap_err();
        match err {
            ServiceError::InvalidTransition { current, requested } => {
                assert_eq!(current, "DELIVERED");
                assert_eq!(requested, "PREPARING");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn response_mapping_keeps_totals() {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = OrderModel {
            id: order_id,
            user_id: None,
            status: OrderStatus::AwaitingPayment,
            total_amount: Decimal::new(2198, 2),
            currency: "EUR".into(),
            checkout_id: None,
            fulfillment: FulfillmentMethod::Pickup,
            delivery_address: None,
            estimated_ready_at: None,
            ready_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: Some(now),
        };
        let items = vec![OrderItemModel {
            id: Uuid::new_v4(),
            order_id,
            menu_item_id: Uuid::new_v4(),
            name: "Margherita".into(),
            quantity: 2,
            unit_price: Decimal::new(1099, 2),
            customization: None,
            created_at: now,
        }];

        let response = to_response(order, items);
        assert_eq!(response.total_amount, Decimal::new(2198, 2));
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].quantity, 2);
    }
}
