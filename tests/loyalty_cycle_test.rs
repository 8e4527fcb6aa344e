mod common;

use bistro_api::config::LoyaltyConfig;
use bistro_api::entities::loyalty_transaction::LoyaltyReason;
use bistro_api::entities::{loyalty_account, loyalty_transaction, reward_notification};
use bistro_api::services::loyalty::{replay_balance, LoyaltyService};
use bistro_api::services::loyalty_cycle::LoyaltyCycleScheduler;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use common::{seed_user, test_db};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

// Fixed mid-year clock; the scheduler takes the instant as a parameter.
fn mid_june() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
}

fn test_config() -> LoyaltyConfig {
    LoyaltyConfig {
        cycle_interval_secs: 86_400,
        birthday_spend_threshold: dec!(500),
    }
}

async fn setup() -> (Arc<DatabaseConnection>, LoyaltyService, LoyaltyCycleScheduler) {
    let db = test_db().await;
    let loyalty = LoyaltyService::new(db.clone());
    let scheduler = LoyaltyCycleScheduler::new(db.clone(), test_config(), None);
    (db, loyalty, scheduler)
}

/// Gives the account a balance backed by a matching ledger row, so the
/// replay invariant holds before and after the cycle acts.
async fn credit(db: &DatabaseConnection, user_id: Uuid, points: i64, spend: Decimal) {
    let account = loyalty_account::Entity::find_by_id(user_id)
        .one(db)
        .await
        .unwrap()
        .unwrap();
    let balance = account.balance;
    let year_spend = account.year_spend;
    let mut active: loyalty_account::ActiveModel = account.into();
    active.balance = Set(balance + points);
    active.year_spend = Set(year_spend + spend);
    active.update(db).await.unwrap();

    loyalty_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        account_id: Set(user_id),
        order_id: Set(Some(Uuid::new_v4())),
        points_delta: Set(points),
        reason: Set(LoyaltyReason::OrderEarned),
        detail: Set("test credit".to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .unwrap();
}

async fn account(db: &DatabaseConnection, user_id: Uuid) -> loyalty_account::Model {
    loyalty_account::Entity::find_by_id(user_id)
        .one(db)
        .await
        .unwrap()
        .unwrap()
}

async fn set_last_reset(db: &DatabaseConnection, user_id: Uuid, at: DateTime<Utc>) {
    let existing = account(db, user_id).await;
    let mut active: loyalty_account::ActiveModel = existing.into();
    active.last_reset_at = Set(at);
    active.update(db).await.unwrap();
}

#[tokio::test]
async fn balance_expires_after_a_full_ninety_day_cycle() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let user_id = seed_user(&db, None, now - Duration::days(100)).await;
    loyalty.ensure_account(user_id).await.unwrap();
    credit(&db, user_id, 50, dec!(120)).await;

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.expiries, 1);
    assert_eq!(summary.points_expired, 50);
    assert_eq!(summary.failures, 0);

    let acct = account(&db, user_id).await;
    assert_eq!(acct.balance, 0);
    assert_eq!(acct.last_reset_at, now);
    // year_spend is untouched by the 90-day expiry
    assert_eq!(acct.year_spend, dec!(120));

    let expiry_rows = loyalty_transaction::Entity::find()
        .filter(loyalty_transaction::Column::AccountId.eq(user_id))
        .filter(loyalty_transaction::Column::Reason.eq(LoyaltyReason::PointsExpired90DayCycle))
        .all(&*db)
        .await
        .unwrap();
    assert_eq!(expiry_rows.len(), 1);
    assert_eq!(expiry_rows[0].points_delta, -50);
    assert_eq!(replay_balance(&*db, user_id).await.unwrap(), 0);

    // The next pass inside the same cycle does nothing.
    let summary = scheduler.run_once(now + Duration::hours(1)).await.unwrap();
    assert_eq!(summary.expiries, 0);
    assert_eq!(replay_balance(&*db, user_id).await.unwrap(), 0);
}

#[tokio::test]
async fn no_expiry_inside_the_first_cycle() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let user_id = seed_user(&db, None, now - Duration::days(30)).await;
    loyalty.ensure_account(user_id).await.unwrap();
    credit(&db, user_id, 10, dec!(25)).await;

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.expiries, 0);
    assert_eq!(account(&db, user_id).await.balance, 10);
}

#[tokio::test]
async fn zero_balance_cycle_stamps_without_a_ledger_row() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let user_id = seed_user(&db, None, now - Duration::days(95)).await;
    loyalty.ensure_account(user_id).await.unwrap();

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.expiries, 0);
    assert_eq!(account(&db, user_id).await.last_reset_at, now);
    assert_eq!(replay_balance(&*db, user_id).await.unwrap(), 0);
}

#[tokio::test]
async fn annual_reset_clears_spend_and_birthday_flag() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let user_id = seed_user(&db, None, now - Duration::days(40)).await;
    loyalty.ensure_account(user_id).await.unwrap();
    credit(&db, user_id, 30, dec!(640)).await;

    // Last reset fell in the previous calendar year.
    set_last_reset(&db, user_id, Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap()).await;
    let existing = account(&db, user_id).await;
    let mut active: loyalty_account::ActiveModel = existing.into();
    active.birthday_reward_sent = Set(true);
    active.update(&*db).await.unwrap();

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.annual_resets, 1);

    let acct = account(&db, user_id).await;
    assert_eq!(acct.year_spend, Decimal::ZERO);
    assert!(!acct.birthday_reward_sent);
    assert_eq!(acct.last_reset_at, now);
    // The point balance survives the annual reset.
    assert_eq!(acct.balance, 30);

    // No second reset in the same year.
    let summary = scheduler.run_once(now + Duration::days(1)).await.unwrap();
    assert_eq!(summary.annual_resets, 0);
}

#[tokio::test]
async fn expiry_and_annual_reset_both_apply_in_one_pass() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    // Registered long enough ago that a 90-day boundary passed, with the
    // last reset still in the previous year.
    let user_id = seed_user(&db, None, now - Duration::days(300)).await;
    loyalty.ensure_account(user_id).await.unwrap();
    credit(&db, user_id, 80, dec!(700)).await;
    set_last_reset(&db, user_id, Utc.with_ymd_and_hms(2025, 12, 20, 8, 0, 0).unwrap()).await;

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.expiries, 1);
    assert_eq!(summary.points_expired, 80);
    assert_eq!(summary.annual_resets, 1);

    let acct = account(&db, user_id).await;
    assert_eq!(acct.balance, 0);
    assert_eq!(acct.year_spend, Decimal::ZERO);
    assert_eq!(replay_balance(&*db, user_id).await.unwrap(), 0);
}

#[tokio::test]
async fn qualified_birthday_gets_exactly_one_reward() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let birth_date = NaiveDate::from_ymd_opt(1990, 6, 15).unwrap();
    let user_id = seed_user(&db, Some(birth_date), now - Duration::days(20)).await;
    loyalty.ensure_account(user_id).await.unwrap();
    credit(&db, user_id, 40, dec!(620)).await;

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.birthday_rewards, 1);

    let acct = account(&db, user_id).await;
    assert!(acct.birthday_reward_sent);

    let notifications = reward_notification::Entity::find()
        .filter(reward_notification::Column::UserId.eq(user_id))
        .all(&*db)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, "birthday_reward");

    // The reward leaves an audit row with no point impact.
    assert_eq!(replay_balance(&*db, user_id).await.unwrap(), 40);

    // A later pass on the same day does not issue a second reward.
    let summary = scheduler.run_once(now + Duration::hours(2)).await.unwrap();
    assert_eq!(summary.birthday_rewards, 0);
    let notifications = reward_notification::Entity::find()
        .filter(reward_notification::Column::UserId.eq(user_id))
        .all(&*db)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
}

#[tokio::test]
async fn birthday_without_enough_spend_earns_nothing() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let birth_date = NaiveDate::from_ymd_opt(1990, 6, 15).unwrap();
    let user_id = seed_user(&db, Some(birth_date), now - Duration::days(20)).await;
    loyalty.ensure_account(user_id).await.unwrap();
    credit(&db, user_id, 5, dec!(120)).await;

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.birthday_rewards, 0);
    assert!(!account(&db, user_id).await.birthday_reward_sent);
}

#[tokio::test]
async fn spend_on_another_day_is_not_a_birthday() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let birth_date = NaiveDate::from_ymd_opt(1990, 6, 8).unwrap();
    let user_id = seed_user(&db, Some(birth_date), now - Duration::days(20)).await;
    loyalty.ensure_account(user_id).await.unwrap();
    credit(&db, user_id, 40, dec!(620)).await;

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.birthday_rewards, 0);
}

#[tokio::test]
async fn negative_balance_surfaces_as_a_failure_without_aborting_the_pass() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let corrupt_user = seed_user(&db, None, now - Duration::days(120)).await;
    let healthy_user = seed_user(&db, None, now - Duration::days(120)).await;
    loyalty.ensure_account(corrupt_user).await.unwrap();
    loyalty.ensure_account(healthy_user).await.unwrap();
    credit(&db, healthy_user, 25, dec!(80)).await;

    // A balance the ledger cannot account for.
    let existing = account(&db, corrupt_user).await;
    let before_reset_at = existing.last_reset_at;
    let mut active: loyalty_account::ActiveModel = existing.into();
    active.balance = Set(-5);
    active.update(&*db).await.unwrap();

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.accounts_processed, 2);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.expiries, 1);
    assert_eq!(summary.points_expired, 25);
    assert_eq!(account(&db, healthy_user).await.balance, 0);

    // The corrupt account is left exactly as found, never silently patched.
    let corrupt = account(&db, corrupt_user).await;
    assert_eq!(corrupt.balance, -5);
    assert_eq!(corrupt.last_reset_at, before_reset_at);
    let expiry_rows = loyalty_transaction::Entity::find()
        .filter(loyalty_transaction::Column::AccountId.eq(corrupt_user))
        .all(&*db)
        .await
        .unwrap();
    assert!(expiry_rows.is_empty());
}

#[tokio::test]
async fn one_pass_covers_every_account() {
    let (db, loyalty, scheduler) = setup().await;
    let now = mid_june();
    let expired_user = seed_user(&db, None, now - Duration::days(120)).await;
    let fresh_user = seed_user(&db, None, now - Duration::days(5)).await;
    loyalty.ensure_account(expired_user).await.unwrap();
    loyalty.ensure_account(fresh_user).await.unwrap();
    credit(&db, expired_user, 25, dec!(80)).await;
    credit(&db, fresh_user, 12, dec!(30)).await;

    let summary = scheduler.run_once(now).await.unwrap();
    assert_eq!(summary.accounts_processed, 2);
    assert_eq!(summary.expiries, 1);
    assert_eq!(summary.points_expired, 25);
    assert_eq!(account(&db, expired_user).await.balance, 0);
    assert_eq!(account(&db, fresh_user).await.balance, 12);
}
