use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, instrument, warn};

use crate::config::PaymentProviderConfig;
use crate::errors::ServiceError;

/// Provider-side checkout session state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutStatus {
    Pending,
    Paid,
    Failed,
    Expired,
    Cancelled,
}

impl CheckoutStatus {
    pub fn from_provider(raw: &str) -> Result<Self, GatewayError> {
        match raw {
            "PENDING" => Ok(CheckoutStatus::Pending),
            "PAID" => Ok(CheckoutStatus::Paid),
            "FAILED" => Ok(CheckoutStatus::Failed),
            "EXPIRED" => Ok(CheckoutStatus::Expired),
            "CANCELLED" => Ok(CheckoutStatus::Cancelled),
            other => Err(GatewayError::Api(format!(
                "unknown provider checkout status: {other}"
            ))),
        }
    }

    pub fn is_paid(self) -> bool {
        matches!(self, CheckoutStatus::Paid)
    }

    /// Terminal statuses will never change again on the provider side.
    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckoutStatus::Pending)
    }
}

/// A checkout session as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCheckout {
    pub id: String,
    pub checkout_reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: CheckoutStatus,
    pub checkout_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider rejected creation because an earlier identical request
    /// already produced a checkout; `existing_id` is set when the error
    /// payload named it.
    #[error("duplicate checkout")]
    DuplicateCheckout { existing_id: Option<String> },

    /// Provider unreachable or credentials missing.
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    /// Provider responded with an error.
    #[error("payment provider error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            GatewayError::Unavailable(err.to_string())
        } else {
            GatewayError::Api(err.to_string())
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => ServiceError::PaymentProviderUnavailable(msg),
            GatewayError::DuplicateCheckout { .. } => {
                ServiceError::PaymentProviderError("unrecovered duplicate checkout".to_string())
            }
            GatewayError::Api(msg) => ServiceError::PaymentProviderError(msg),
        }
    }
}

/// Seam to the external payment provider. The HTTP implementation below talks
/// to the real API; tests script a mock behind the same trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(
        &self,
        amount: Decimal,
        currency: &str,
        reference: &str,
    ) -> Result<ProviderCheckout, GatewayError>;

    async fn get_checkout(&self, checkout_id: &str) -> Result<ProviderCheckout, GatewayError>;

    /// Lists recent checkouts whose reference starts with `reference_prefix`.
    async fn list_checkouts(
        &self,
        reference_prefix: &str,
    ) -> Result<Vec<ProviderCheckout>, GatewayError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Client-credentials HTTP client for the hosted checkout API.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: PaymentProviderConfig,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct CreateCheckoutBody<'a> {
    checkout_reference: &'a str,
    amount: Decimal,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckoutPayload {
    id: String,
    checkout_reference: String,
    amount: Decimal,
    currency: String,
    status: String,
    #[serde(default)]
    hosted_checkout_url: Option<String>,
}

impl CheckoutPayload {
    fn into_checkout(self) -> Result<ProviderCheckout, GatewayError> {
        Ok(ProviderCheckout {
            status: CheckoutStatus::from_provider(&self.status)?,
            id: self.id,
            checkout_reference: self.checkout_reference,
            amount: self.amount,
            currency: self.currency,
            checkout_url: self.hosted_checkout_url,
        })
    }
}

/// Pulls an existing checkout id out of a duplicate-checkout error payload,
/// wherever the provider chose to put it.
pub(crate) fn duplicate_checkout_id(body: &Value) -> Option<String> {
    for key in ["id", "checkout_id", "existing_checkout_id"] {
        if let Some(id) = body.get(key).and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
    }
    body.get("detail")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn is_duplicate_error(body: &Value) -> bool {
    body.get("error_code")
        .and_then(|v| v.as_str())
        .map(|code| code == "DUPLICATED_CHECKOUT")
        .unwrap_or(false)
}

impl HttpPaymentGateway {
    pub fn new(config: PaymentProviderConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            config,
            token: RwLock::new(None),
        })
    }

    /// Returns a valid access token, exchanging client credentials when the
    /// cached one is missing or about to expire.
    async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Utc::now() + Duration::seconds(60) {
                return Ok(cached.access_token.clone());
            }
        }

        let (client_id, client_secret) = match (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                return Err(GatewayError::Unavailable(
                    "payment provider credentials not configured".to_string(),
                ))
            }
        };

        let response = self
            .client
            .post(format!("{}/token", self.config.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!(status = %status, "Token exchange rejected by payment provider");
            return Err(GatewayError::Unavailable(format!(
                "token exchange failed with status {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Api(format!("invalid token response: {e}")))?;

        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(token.expires_in as i64),
        };
        *self.token.write().await = Some(cached);

        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, amount), fields(reference = %reference))]
    async fn create_checkout(
        &self,
        amount: Decimal,
        currency: &str,
        reference: &str,
    ) -> Result<ProviderCheckout, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!("{}/v0.1/checkouts", self.config.base_url))
            .bearer_auth(token)
            .json(&CreateCheckoutBody {
                checkout_reference: reference,
                amount,
                currency,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let payload: CheckoutPayload = response
                .json()
                .await
                .map_err(|e| GatewayError::Api(format!("invalid checkout response: {e}")))?;
            return payload.into_checkout();
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        if is_duplicate_error(&body) {
            warn!(reference = %reference, "Provider reported duplicate checkout");
            return Err(GatewayError::DuplicateCheckout {
                existing_id: duplicate_checkout_id(&body),
            });
        }

        error!(status = %status, body = %body, "Checkout creation rejected");
        Err(GatewayError::Api(format!(
            "checkout creation failed with status {status}"
        )))
    }

    #[instrument(skip(self))]
    async fn get_checkout(&self, checkout_id: &str) -> Result<ProviderCheckout, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!(
                "{}/v0.1/checkouts/{}",
                self.config.base_url, checkout_id
            ))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Api(format!(
                "checkout lookup failed with status {status}"
            )));
        }

        let payload: CheckoutPayload = response
            .json()
            .await
            .map_err(|e| GatewayError::Api(format!("invalid checkout response: {e}")))?;
        payload.into_checkout()
    }

    #[instrument(skip(self))]
    async fn list_checkouts(
        &self,
        reference_prefix: &str,
    ) -> Result<Vec<ProviderCheckout>, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}/v0.1/checkouts", self.config.base_url))
            .query(&[("checkout_reference", reference_prefix)])
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Api(format!(
                "checkout listing failed with status {status}"
            )));
        }

        let payloads: Vec<CheckoutPayload> = response
            .json()
            .await
            .map_err(|e| GatewayError::Api(format!("invalid checkout list response: {e}")))?;
        payloads
            .into_iter()
            .map(CheckoutPayload::into_checkout)
            .collect()
    }
}
