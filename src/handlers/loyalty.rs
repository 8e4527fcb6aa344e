use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::loyalty::LoyaltyStatementResponse;
use crate::ApiResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

/// Loyalty account with its full ledger
#[utoipa::path(
    get,
    path = "/api/v1/loyalty/{user_id}",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Loyalty statement", body = crate::ApiResponse<LoyaltyStatementResponse>),
        (status = 403, description = "Not your account", body = crate::errors::ErrorResponse),
        (status = 404, description = "No loyalty account for this user", body = crate::errors::ErrorResponse)
    ),
    tag = "Loyalty"
)]
pub async fn get_statement(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoyaltyStatementResponse>>, ServiceError> {
    if !user.is_admin() && user.user_id != Some(user_id) {
        return Err(ServiceError::Forbidden(
            "Cannot read another user's loyalty account".to_string(),
        ));
    }
    let statement = state.services.loyalty.get_statement(user_id).await?;
    Ok(Json(ApiResponse::success(statement)))
}

/// Provision the zero-balance account at registration time
#[utoipa::path(
    post,
    path = "/api/v1/loyalty/{user_id}/account",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses(
        (status = 201, description = "Account ready", body = crate::ApiResponse<crate::services::loyalty::LoyaltyAccountResponse>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "Loyalty"
)]
pub async fn ensure_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> Result<
    (
        StatusCode,
        Json<ApiResponse<crate::services::loyalty::LoyaltyAccountResponse>>,
    ),
    ServiceError,
> {
    user.require_admin()?;
    let account = state.services.loyalty.ensure_account(user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            crate::services::loyalty::LoyaltyAccountResponse {
                user_id: account.user_id,
                balance: account.balance,
                year_spend: account.year_spend,
                last_reset_at: account.last_reset_at,
                birthday_reward_sent: account.birthday_reward_sent,
                registered_at: account.registered_at,
            },
        )),
    ))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:user_id", get(get_statement))
        .route("/:user_id/account", post(ensure_account))
}
