pub mod loyalty_account;
pub mod loyalty_transaction;
pub mod order;
pub mod order_item;
pub mod reward_notification;
pub mod user;
