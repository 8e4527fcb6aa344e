use crate::{
    config::LoyaltyConfig,
    entities::loyalty_account::{self, Entity as LoyaltyAccountEntity},
    entities::loyalty_transaction::LoyaltyReason,
    entities::reward_notification,
    entities::user::Entity as UserEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::loyalty,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QuerySelect,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const EXPIRY_CYCLE_DAYS: i64 = 90;
const BIRTHDAY_REWARD_KIND: &str = "birthday_reward";

/// Outcome of one scheduler pass over every loyalty account.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleRunSummary {
    pub accounts_processed: usize,
    pub expiries: usize,
    pub points_expired: i64,
    pub annual_resets: usize,
    pub birthday_rewards: usize,
    pub failures: usize,
}

/// Periodic maintenance over loyalty accounts: rolling 90-day point expiry,
/// calendar-year spend reset and birthday rewards. Each pass is idempotent,
/// so a missed or doubled tick never double-applies.
pub struct LoyaltyCycleScheduler {
    db: Arc<DatabaseConnection>,
    config: LoyaltyConfig,
    event_sender: Option<Arc<EventSender>>,
    // Suppresses overlapping passes when one tick outlives the interval.
    run_lock: Mutex<()>,
}

impl LoyaltyCycleScheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: LoyaltyConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
            run_lock: Mutex::new(()),
        }
    }

    /// Runs the scheduler loop until the process shuts down. Ticks fire at
    /// the configured interval; a tick that finds the previous pass still
    /// running is skipped rather than queued.
    pub async fn run(self: Arc<Self>) {
        let period = std::time::Duration::from_secs(self.config.cycle_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "Loyalty cycle scheduler started");

        loop {
            interval.tick().await;
            let guard = match self.run_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("Previous loyalty cycle pass still running; skipping tick");
                    continue;
                }
            };
            match self.run_once(Utc::now()).await {
                Ok(summary) => {
                    info!(
                        accounts = summary.accounts_processed,
                        expiries = summary.expiries,
                        points_expired = summary.points_expired,
                        annual_resets = summary.annual_resets,
                        birthday_rewards = summary.birthday_rewards,
                        failures = summary.failures,
                        "Loyalty cycle pass complete"
                    );
                }
                Err(e) => error!(error = %e, "Loyalty cycle pass failed"),
            }
            drop(guard);
        }
    }

    /// One full pass at the given instant. Public so tests can drive the
    /// clock; the loop always passes `Utc::now()`.
    ///
    /// Account failures are isolated: one poisoned account logs an error and
    /// the pass moves on to the rest.
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CycleRunSummary, ServiceError> {
        let accounts = LoyaltyAccountEntity::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut summary = CycleRunSummary::default();
        for account in accounts {
            let user_id = account.user_id;
            summary.accounts_processed += 1;
            match self.process_account(user_id, now).await {
                Ok(outcome) => {
                    if let Some(expired) = outcome.points_expired {
                        summary.expiries += 1;
                        summary.points_expired += expired;
                        self.emit(Event::PointsExpired {
                            user_id,
                            points: expired,
                        })
                        .await;
                    }
                    if outcome.annual_reset {
                        summary.annual_resets += 1;
                    }
                    if outcome.birthday_reward {
                        summary.birthday_rewards += 1;
                        self.emit(Event::BirthdayRewardIssued(user_id)).await;
                    }
                }
                Err(e) => {
                    summary.failures += 1;
                    error!(user_id = %user_id, error = %e, "Loyalty cycle failed for account");
                }
            }
        }

        Ok(summary)
    }

    /// Applies every due cycle action for one account in a single
    /// transaction. Decisions are taken from one snapshot of the account so
    /// that stamping `last_reset_at` for the expiry cannot hide a due annual
    /// reset in the same pass, or vice versa.
    async fn process_account(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccountCycleOutcome, ServiceError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut account_query = LoyaltyAccountEntity::find_by_id(user_id);
        if txn.get_database_backend() == DbBackend::Postgres {
            account_query = account_query.lock_exclusive();
        }
        let account = match account_query
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
        {
            Some(account) => account,
            None => {
                txn.commit().await.map_err(ServiceError::DatabaseError)?;
                return Ok(AccountCycleOutcome::default());
            }
        };

        let snapshot_reset_at = account.last_reset_at;
        let balance = account.balance;
        let registered_at = account.registered_at;

        let expiry_boundary = expiry_boundary(registered_at, now);
        let expiry_due = expiry_boundary.is_some_and(|boundary| snapshot_reset_at < boundary);
        let annual_reset_due = snapshot_reset_at.year() < now.year();

        let mut outcome = AccountCycleOutcome::default();
        let mut year_spend = account.year_spend;
        let mut birthday_sent = account.birthday_reward_sent;

        let mut active: loyalty_account::ActiveModel = account.into();
        let mut dirty = false;

        if expiry_due {
            // A negative balance means the ledger and account disagree; leave
            // the account exactly as found and surface it for investigation.
            if balance < 0 {
                return Err(ServiceError::InvalidLedgerState(format!(
                    "account {user_id} holds a negative balance of {balance} at expiry"
                )));
            }
            if balance > 0 {
                loyalty::append_transaction(
                    &txn,
                    user_id,
                    None,
                    -balance,
                    LoyaltyReason::PointsExpired90DayCycle,
                    format!("{EXPIRY_CYCLE_DAYS}-day cycle expiry of {balance} points"),
                )
                .await?;
                active.balance = Set(0);
                outcome.points_expired = Some(balance);
            }
            active.last_reset_at = Set(now);
            dirty = true;
        }

        if annual_reset_due {
            year_spend = Decimal::ZERO;
            birthday_sent = false;
            active.year_spend = Set(Decimal::ZERO);
            active.birthday_reward_sent = Set(false);
            active.last_reset_at = Set(now);
            outcome.annual_reset = true;
            dirty = true;
        }

        if !birthday_sent && year_spend >= self.config.birthday_spend_threshold {
            let user = UserEntity::find_by_id(user_id)
                .one(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            let is_birthday = user
                .and_then(|u| u.birth_date)
                .is_some_and(|d| d.month() == now.month() && d.day() == now.day());
            if is_birthday {
                let notification = reward_notification::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    kind: Set(BIRTHDAY_REWARD_KIND.to_string()),
                    title: Set("Happy birthday!".to_string()),
                    body: Set("A birthday reward is waiting for you on your next order.".to_string()),
                    created_at: Set(now),
                };
                notification
                    .insert(&txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;
                loyalty::append_transaction(
                    &txn,
                    user_id,
                    None,
                    0,
                    LoyaltyReason::BirthdayReward,
                    "Birthday reward issued".to_string(),
                )
                .await?;
                active.birthday_reward_sent = Set(true);
                outcome.birthday_reward = true;
                dirty = true;
            }
        }

        if dirty {
            active.updated_at = Set(Some(now));
            active
                .update(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;
        Ok(outcome)
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send loyalty cycle event");
            }
        }
    }
}

#[derive(Debug, Default)]
struct AccountCycleOutcome {
    points_expired: Option<i64>,
    annual_reset: bool,
    birthday_reward: bool,
}

/// Start of the most recent completed 90-day cycle since registration, or
/// None while still inside the first cycle. An account whose `last_reset_at`
/// lies before this boundary is due for expiry.
fn expiry_boundary(registered_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let elapsed_days = (now - registered_at).num_days();
    let periods = elapsed_days / EXPIRY_CYCLE_DAYS;
    if periods <= 0 {
        return None;
    }
    Some(registered_at + Duration::days(periods * EXPIRY_CYCLE_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_boundary_inside_first_cycle() {
        let registered = at(2026, 1, 1);
        assert_eq!(expiry_boundary(registered, at(2026, 3, 1)), None);
        assert_eq!(expiry_boundary(registered, at(2026, 3, 31)), None);
    }

    #[test]
    fn boundary_lands_on_cycle_multiples() {
        let registered = at(2026, 1, 1);
        // day 91 is one full cycle past registration
        assert_eq!(
            expiry_boundary(registered, registered + Duration::days(91)),
            Some(registered + Duration::days(90))
        );
        // deep into the third cycle the boundary is still the latest multiple
        assert_eq!(
            expiry_boundary(registered, registered + Duration::days(200)),
            Some(registered + Duration::days(180))
        );
    }

    #[test]
    fn stamped_account_is_not_due_again() {
        let registered = at(2026, 1, 1);
        let now = registered + Duration::days(100);
        let boundary = expiry_boundary(registered, now).unwrap();
        // after a pass stamps last_reset_at = now, the account is no longer due
        assert!(now >= boundary);
        let later = registered + Duration::days(150);
        let boundary_later = expiry_boundary(registered, later).unwrap();
        assert!(now >= boundary_later);
    }
}
