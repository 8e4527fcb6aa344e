use crate::{
    entities::order::{ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::payment_gateway::{GatewayError, PaymentGateway, ProviderCheckout},
};
use chrono::Utc;
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

const REFERENCE_PREFIX: &str = "ORD-";

/// Merchant reference embedded in provider checkouts. Reconstructible back to
/// the order id, which duplicate-checkout recovery relies on.
pub fn checkout_reference(order_id: Uuid) -> String {
    format!("{REFERENCE_PREFIX}{order_id}")
}

/// Extracts the order id from a checkout reference, ignoring any uniqueness
/// suffix appended by a retried creation.
pub fn order_id_from_reference(reference: &str) -> Option<Uuid> {
    let rest = reference.strip_prefix(REFERENCE_PREFIX)?;
    let uuid_part = rest.get(..36)?;
    Uuid::parse_str(uuid_part).ok()
}

fn freshened_reference(order_id: Uuid) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{REFERENCE_PREFIX}{order_id}-{suffix}")
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub checkout_id: String,
    pub checkout_url: Option<String>,
}

/// Serializes checkout initiation per order and converges every order to a
/// single provider checkout id no matter how many attempts raced.
pub struct CheckoutCoordinator {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Option<Arc<EventSender>>,
    // In-process keyed locks; a distributed lock would replace this map if
    // the service were ever scaled horizontally.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl CheckoutCoordinator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            locks: DashMap::new(),
        }
    }

    /// Initiates (or resumes) the provider checkout for an order.
    ///
    /// Exactly one initiation may be in flight per order; a concurrent second
    /// call fails fast with `CheckoutInProgress` so the caller can back off
    /// and retry.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn initiate_checkout(
        &self,
        order_id: Uuid,
    ) -> Result<CheckoutSession, ServiceError> {
        let lock = self
            .locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!(order_id = %order_id, "Checkout initiation already in flight");
                return Err(ServiceError::CheckoutInProgress(order_id));
            }
        };

        let result = self.initiate_locked(order_id).await;

        drop(guard);
        drop(lock);
        // Drop the entry only while the map holds the sole reference. A racer
        // that has cloned the Arc but not yet locked it keeps the entry alive;
        // pruning it would let a later caller insert a fresh mutex and run
        // concurrently with the racer.
        self.locks
            .remove_if(&order_id, |_, entry| Arc::strong_count(entry) == 1);

        result
    }

    async fn initiate_locked(&self, order_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::AwaitingPayment {
            return Err(ServiceError::ValidationError(format!(
                "Order is {} and no longer accepts checkout initiation",
                order.status
            )));
        }

        // An order that already holds a checkout id never gets a second one;
        // only the current hosted URL is refreshed.
        if let Some(existing_id) = order.checkout_id.clone() {
            let checkout = self.gateway.get_checkout(&existing_id).await?;
            return Ok(CheckoutSession {
                checkout_id: checkout.id,
                checkout_url: checkout.checkout_url,
            });
        }

        let reference = checkout_reference(order_id);
        let checkout = match self
            .gateway
            .create_checkout(order.total_amount, &order.currency, &reference)
            .await
        {
            Ok(checkout) => checkout,
            Err(GatewayError::DuplicateCheckout { existing_id }) => {
                self.recover_duplicate(order_id, existing_id).await?
            }
            Err(other) => return Err(other.into()),
        };

        // Persist the resolved id exactly once.
        if order.checkout_id.as_deref() != Some(checkout.id.as_str()) {
            let mut active: OrderActiveModel = order.into();
            active.checkout_id = Set(Some(checkout.id.clone()));
            active.updated_at = Set(Some(Utc::now()));
            active.update(db).await.map_err(ServiceError::DatabaseError)?;
        }

        info!(order_id = %order_id, checkout_id = %checkout.id, "Checkout resolved");
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::CheckoutInitiated {
                    order_id,
                    checkout_id: checkout.id.clone(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send checkout event");
            }
        }

        Ok(CheckoutSession {
            checkout_id: checkout.id,
            checkout_url: checkout.checkout_url,
        })
    }

    /// Duplicate-checkout recovery ladder: id from the error payload, then a
    /// reference-based listing, then one retry with a freshened reference.
    async fn recover_duplicate(
        &self,
        order_id: Uuid,
        existing_id: Option<String>,
    ) -> Result<ProviderCheckout, ServiceError> {
        if let Some(id) = existing_id {
            info!(order_id = %order_id, checkout_id = %id, "Recovered checkout id from duplicate error payload");
            return Ok(self.gateway.get_checkout(&id).await?);
        }

        let reference = checkout_reference(order_id);
        match self.gateway.list_checkouts(&reference).await {
            Ok(candidates) => {
                if let Some(found) = candidates
                    .into_iter()
                    .find(|c| order_id_from_reference(&c.checkout_reference) == Some(order_id))
                {
                    info!(order_id = %order_id, checkout_id = %found.id, "Recovered checkout id from provider listing");
                    return Ok(found);
                }
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Checkout listing failed during duplicate recovery");
            }
        }

        let fresh = freshened_reference(order_id);
        warn!(order_id = %order_id, reference = %fresh, "Retrying checkout creation with freshened reference");
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        Ok(self
            .gateway
            .create_checkout(order.total_amount, &order.currency, &fresh)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_round_trips() {
        let order_id = Uuid::new_v4();
        let reference = checkout_reference(order_id);
        assert_eq!(order_id_from_reference(&reference), Some(order_id));
    }

    #[test]
    fn reference_with_uniqueness_suffix_still_resolves() {
        let order_id = Uuid::new_v4();
        let freshened = freshened_reference(order_id);
        assert_ne!(freshened, checkout_reference(order_id));
        assert_eq!(order_id_from_reference(&freshened), Some(order_id));
    }

    #[test]
    fn foreign_references_do_not_resolve() {
        assert_eq!(order_id_from_reference("INV-123"), None);
        assert_eq!(order_id_from_reference("ORD-not-a-uuid-at-all-xxxxxxxxxxxxxxx"), None);
    }

    #[test]
    fn lock_entry_survives_while_a_racer_holds_a_handle() {
        let locks: DashMap<Uuid, Arc<Mutex<()>>> = DashMap::new();
        let order_id = Uuid::new_v4();
        let racer = locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // A finished initiation must not prune the entry out from under a
        // caller that has cloned it but not locked it yet; two entries for
        // one order would mean two concurrent provider creations.
        locks.remove_if(&order_id, |_, entry| Arc::strong_count(entry) == 1);
        assert!(locks.contains_key(&order_id));

        drop(racer);
        locks.remove_if(&order_id, |_, entry| Arc::strong_count(entry) == 1);
        assert!(!locks.contains_key(&order_id));
    }
}
