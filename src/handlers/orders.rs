use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orders::{CreateOrderRequest, OrderResponse, OrderSummary};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AcceptOrderRequest {
    /// Estimated minutes until the order is ready for pickup or handoff
    #[serde(default)]
    pub estimated_minutes: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeclineOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// Target status, e.g. "PREPARING" or "DELIVERED"
    pub status: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct OrderListFilter {
    /// Comma-separated status filter, e.g. "PAYMENT_CONFIRMED,CONFIRMED"
    pub status: Option<String>,
}

/// Create a new order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created awaiting payment", body = crate::ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(mut request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    // The gateway identity owns the order; a body-supplied user id never does.
    request.user_id = user.user_id;
    let order = state.services.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// Get an order with its line items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = crate::ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// List orders by status (staff dashboard)
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListFilter),
    responses(
        (status = 200, description = "Orders matching the filter", body = crate::ApiResponse<Vec<OrderSummary>>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<OrderListFilter>,
) -> Result<Json<ApiResponse<Vec<OrderSummary>>>, ServiceError> {
    user.require_admin()?;
    let statuses = parse_status_filter(filter.status.as_deref())?;
    let orders = state.services.orders.list_orders_by_status(statuses).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusResponse {
    pub id: Uuid,
    pub status: crate::entities::order::OrderStatus,
}

/// Get just the current status of an order (client polling)
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Current order status", body = crate::ApiResponse<OrderStatusResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderStatusResponse>>, ServiceError> {
    let status = state.services.orders.get_order_status(id).await?;
    Ok(Json(ApiResponse::success(OrderStatusResponse { id, status })))
}

/// Accept a paid order (staff)
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/accept",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = AcceptOrderRequest,
    responses(
        (status = 200, description = "Order accepted", body = crate::ApiResponse<OrderResponse>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order is not in an acceptable state", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn accept_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AcceptOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    user.require_admin()?;
    let order = state
        .services
        .orders
        .accept_order(id, request.estimated_minutes)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Decline a paid order (staff)
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/decline",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = DeclineOrderRequest,
    responses(
        (status = 200, description = "Order declined", body = crate::ApiResponse<OrderResponse>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order cannot be declined in its current state", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn decline_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<DeclineOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    user.require_admin()?;
    let order = state.services.orders.decline_order(id, request.reason).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Advance an order through preparation and delivery (staff)
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::ApiResponse<OrderResponse>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 422, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    user.require_admin()?;
    let status = crate::entities::order::OrderStatus::from_str(&request.status)
        .map_err(ServiceError::ValidationError)?;
    let order = state.services.orders.update_order_status(id, status).await?;
    Ok(Json(ApiResponse::success(order)))
}

fn parse_status_filter(
    raw: Option<&str>,
) -> Result<Vec<crate::entities::order::OrderStatus>, ServiceError> {
    use crate::entities::order::OrderStatus;
    match raw {
        None => Ok(vec![
            OrderStatus::PaymentConfirmed,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::OutForDelivery,
        ]),
        Some(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| OrderStatus::from_str(s).map_err(ServiceError::ValidationError))
            .collect(),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/accept", post(accept_order))
        .route("/:id/decline", post(decline_order))
        .route("/:id/status", get(get_order_status).put(update_order_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::OrderStatus;

    #[test]
    fn default_filter_covers_active_kitchen_states() {
        let statuses = parse_status_filter(None).unwrap();
        assert!(statuses.contains(&OrderStatus::PaymentConfirmed));
        assert!(!statuses.contains(&OrderStatus::AwaitingPayment));
        assert!(!statuses.contains(&OrderStatus::Delivered));
    }

    #[test]
    fn csv_filter_parses_each_status() {
        let statuses = parse_status_filter(Some("READY, DELIVERED")).unwrap();
        assert_eq!(statuses, vec![OrderStatus::Ready, OrderStatus::Delivered]);
        assert!(parse_status_filter(Some("NOT_A_STATUS")).is_err());
    }
}
