use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bistro API",
        version = "1.0.0",
        description = r#"
# Bistro Ordering API

Order intake, hosted-checkout payments and the loyalty program for the
restaurant ordering platform.

## Features

- **Orders**: Create orders and track them through preparation and delivery
- **Checkout**: Hosted payment provider checkout with idempotent initiation
- **Payment verification**: Provider-authoritative reconciliation of payment state
- **Loyalty**: Point earning, rolling 90-day expiry, annual resets and birthday rewards

## Authentication

The authenticating gateway in front of this service forwards the caller
identity in `x-user-id` and `x-user-role` headers. Staff endpoints require
the `admin` role.

## Error Handling

Errors use a consistent response body with appropriate HTTP status codes:

```json
{
  "error": "Conflict",
  "message": "A checkout for this order is already in progress, try again shortly",
  "timestamp": "2026-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Checkout", description = "Payment checkout and verification"),
        (name = "Payments", description = "Payment provider webhooks"),
        (name = "Loyalty", description = "Loyalty accounts and ledger")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_status,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::accept_order,
        crate::handlers::orders::decline_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::checkout::initiate_checkout,
        crate::handlers::checkout::verify_payment,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::loyalty::get_statement,
        crate::handlers::loyalty::ensure_account,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::errors::ErrorResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::FulfillmentMethod,
            crate::entities::loyalty_transaction::LoyaltyReason,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::CreateOrderItem,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderSummary,
            crate::services::checkout::CheckoutSession,
            crate::services::loyalty::LoyaltyAccountResponse,
            crate::services::loyalty::LedgerEntryResponse,
            crate::services::loyalty::LoyaltyStatementResponse,
            crate::handlers::orders::AcceptOrderRequest,
            crate::handlers::orders::OrderStatusResponse,
            crate::handlers::orders::DeclineOrderRequest,
            crate::handlers::orders::UpdateOrderStatusRequest,
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_includes_core_paths() {
        let doc = ApiDoc::openapi();
        let paths = doc.paths.paths;
        assert!(paths.contains_key("/api/v1/orders"));
        assert!(paths.contains_key("/api/v1/orders/{id}/checkout"));
        assert!(paths.contains_key("/api/v1/orders/{id}/verify-payment"));
        assert!(paths.contains_key("/api/v1/payments/webhook"));
        assert!(paths.contains_key("/api/v1/loyalty/{user_id}"));
    }
}
