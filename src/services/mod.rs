pub mod checkout;
pub mod loyalty;
pub mod loyalty_cycle;
pub mod orders;
pub mod payment_gateway;
pub mod payment_verification;
