use crate::errors::ServiceError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Caller identity propagated by the authenticating gateway in front of this
/// service. Token verification happens there; these headers are trusted
/// inside the deployment boundary.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Absent for guest callers
    pub user_id: Option<Uuid>,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Guards restaurant-staff endpoints.
    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "Admin role required".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = match parts.headers.get(USER_ID_HEADER) {
            Some(raw) => {
                let raw = raw
                    .to_str()
                    .map_err(|_| ServiceError::Unauthorized("Malformed user id header".into()))?;
                Some(
                    Uuid::parse_str(raw)
                        .map_err(|_| ServiceError::Unauthorized("Malformed user id header".into()))?,
                )
            }
            None => None,
        };

        let role = match parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Customer,
        };

        Ok(AuthenticatedUser { user_id, role })
    }
}
