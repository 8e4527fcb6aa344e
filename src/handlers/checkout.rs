use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::CheckoutSession;
use crate::services::orders::OrderResponse;
use crate::ApiResponse;
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use uuid::Uuid;

/// Initiate (or resume) the hosted checkout for an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/checkout",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Checkout session for the order", body = crate::ApiResponse<CheckoutSession>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "A checkout for this order is already in progress", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider rejected the request", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn initiate_checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CheckoutSession>>, ServiceError> {
    let session = state.services.checkout.initiate_checkout(id).await?;
    Ok(Json(ApiResponse::success(session)))
}

/// Reconcile an order against the payment provider
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/verify-payment",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order after reconciliation", body = crate::ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.payment_verification.verify_payment(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id/checkout", post(initiate_checkout))
        .route("/:id/verify-payment", post(verify_payment))
}
