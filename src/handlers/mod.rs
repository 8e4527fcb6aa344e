pub mod checkout;
pub mod loyalty;
pub mod orders;
pub mod payment_webhooks;

use crate::events::EventSender;
use crate::services::{
    checkout::CheckoutCoordinator, loyalty::LoyaltyService, orders::OrderService,
    payment_gateway::PaymentGateway, payment_verification::PaymentVerificationService,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutCoordinator>,
    pub payment_verification: Arc<PaymentVerificationService>,
    pub loyalty: Arc<LoyaltyService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let orders = Arc::new(OrderService::new(db.clone(), Some(event_sender.clone())));
        let checkout = Arc::new(CheckoutCoordinator::new(
            db.clone(),
            gateway.clone(),
            Some(event_sender.clone()),
        ));
        let payment_verification = Arc::new(PaymentVerificationService::new(
            db.clone(),
            gateway,
            Some(event_sender),
        ));
        let loyalty = Arc::new(LoyaltyService::new(db));
        Self {
            orders,
            checkout,
            payment_verification,
            loyalty,
        }
    }
}
