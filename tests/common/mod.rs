#![allow(dead_code)]

use async_trait::async_trait;
use bistro_api::db::{self, DbConfig};
use bistro_api::entities::{order, user};
use bistro_api::services::orders::{CreateOrderItem, CreateOrderRequest};
use bistro_api::services::payment_gateway::{
    CheckoutStatus, GatewayError, PaymentGateway, ProviderCheckout,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use uuid::Uuid;

/// Fresh in-memory database with the full schema. A single pooled connection
/// keeps every handle on the same SQLite memory database.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let config = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout: Duration::from_secs(5),
        acquire_timeout: Duration::from_secs(5),
    };
    let conn = db::establish_connection_with_config(&config)
        .await
        .expect("connect test db");
    db::ensure_schema(&conn).await.expect("create schema");
    Arc::new(conn)
}

pub async fn seed_user(
    db: &DatabaseConnection,
    birth_date: Option<NaiveDate>,
    registered_at: DateTime<Utc>,
) -> Uuid {
    let id = Uuid::new_v4();
    user::ActiveModel {
        id: Set(id),
        email: Set(format!("{id}@example.test")),
        display_name: Set(Some("Test User".to_string())),
        birth_date: Set(birth_date),
        created_at: Set(registered_at),
    }
    .insert(db)
    .await
    .expect("seed user");
    id
}

pub fn order_request(user_id: Option<Uuid>, unit_price: Decimal, quantity: i32) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        fulfillment: order::FulfillmentMethod::Pickup,
        delivery_address: None,
        items: vec![CreateOrderItem {
            menu_item_id: Uuid::new_v4(),
            name: "Margherita".to_string(),
            quantity,
            unit_price,
            customization: None,
        }],
        currency: "EUR".to_string(),
    }
}

pub fn delivery_request(user_id: Option<Uuid>, unit_price: Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        delivery_address: Some("1 Main Street".to_string()),
        fulfillment: order::FulfillmentMethod::Delivery,
        ..order_request(user_id, unit_price, 1)
    }
}

/// Bypasses the state machine to put an order into the state under test.
pub async fn force_status(db: &DatabaseConnection, order_id: Uuid, status: order::OrderStatus) {
    let existing = order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .expect("load order")
        .expect("order exists");
    let mut active: order::ActiveModel = existing.into();
    active.status = Set(status);
    active.update(db).await.expect("force status");
}

pub async fn set_checkout_id(db: &DatabaseConnection, order_id: Uuid, checkout_id: &str) {
    let existing = order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .expect("load order")
        .expect("order exists");
    let mut active: order::ActiveModel = existing.into();
    active.checkout_id = Set(Some(checkout_id.to_string()));
    active.update(db).await.expect("set checkout id");
}

pub async fn load_order(db: &DatabaseConnection, order_id: Uuid) -> order::Model {
    order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .expect("load order")
        .expect("order exists")
}

pub fn checkout(id: &str, reference: &str, amount: Decimal, status: CheckoutStatus) -> ProviderCheckout {
    ProviderCheckout {
        id: id.to_string(),
        checkout_reference: reference.to_string(),
        amount,
        currency: "EUR".to_string(),
        status,
        checkout_url: Some(format!("https://pay.test/{id}")),
    }
}

/// Scripted in-process payment provider. `create_checkout` consumes scripted
/// results in order and fails loudly on unscripted calls, so tests also
/// assert how often the provider is hit.
pub struct MockGateway {
    pub create_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    create_script: Mutex<VecDeque<Result<ProviderCheckout, GatewayError>>>,
    checkouts: Mutex<HashMap<String, ProviderCheckout>>,
    listing: Mutex<Vec<ProviderCheckout>>,
    /// Signalled when create_checkout is entered; used by concurrency tests.
    pub entered_create: Notify,
    create_permits: Semaphore,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// A gateway whose create_checkout blocks until `release_create` is
    /// called, to hold a checkout initiation mid-flight.
    pub fn with_blocked_create() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            create_script: Mutex::new(VecDeque::new()),
            checkouts: Mutex::new(HashMap::new()),
            listing: Mutex::new(Vec::new()),
            entered_create: Notify::new(),
            create_permits: Semaphore::new(permits),
        }
    }

    pub fn release_create(&self) {
        self.create_permits.add_permits(1);
    }

    /// Scripts a successful creation and registers the checkout for lookup.
    pub async fn push_create_ok(&self, checkout: ProviderCheckout) {
        self.checkouts
            .lock()
            .await
            .insert(checkout.id.clone(), checkout.clone());
        self.create_script.lock().await.push_back(Ok(checkout));
    }

    pub async fn push_create_err(&self, err: GatewayError) {
        self.create_script.lock().await.push_back(Err(err));
    }

    /// Registers a checkout for get_checkout without scripting a creation.
    pub async fn insert_checkout(&self, checkout: ProviderCheckout) {
        self.checkouts
            .lock()
            .await
            .insert(checkout.id.clone(), checkout);
    }

    pub async fn set_status(&self, checkout_id: &str, status: CheckoutStatus) {
        let mut checkouts = self.checkouts.lock().await;
        let entry = checkouts.get_mut(checkout_id).expect("checkout scripted");
        entry.status = status;
    }

    pub async fn set_listing(&self, listing: Vec<ProviderCheckout>) {
        *self.listing.lock().await = listing;
    }

    pub fn create_call_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout(
        &self,
        _amount: Decimal,
        _currency: &str,
        _reference: &str,
    ) -> Result<ProviderCheckout, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.entered_create.notify_one();
        let permit = self
            .create_permits
            .acquire()
            .await
            .expect("semaphore closed");
        drop(permit);
        self.create_script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Api("unscripted create_checkout call".into())))
    }

    async fn get_checkout(&self, checkout_id: &str) -> Result<ProviderCheckout, GatewayError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.checkouts
            .lock()
            .await
            .get(checkout_id)
            .cloned()
            .ok_or_else(|| GatewayError::Api(format!("unknown checkout {checkout_id}")))
    }

    async fn list_checkouts(
        &self,
        reference_prefix: &str,
    ) -> Result<Vec<ProviderCheckout>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .listing
            .lock()
            .await
            .iter()
            .filter(|c| c.checkout_reference.starts_with(reference_prefix))
            .cloned()
            .collect())
    }
}
