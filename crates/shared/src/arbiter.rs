use chrono::{DateTime, Duration, Utc};

use crate::clock::{date_key, day_bounds_utc, start_of_day_utc};
use crate::id::Id;
use crate::store::{ReservationAttempt, StoreError, StorePort};

/// Tolerance for confirming reservation ownership against timestamp
/// precision loss at the store boundary.
const LOCK_CONFIRMATION_TOLERANCE: Duration = Duration::seconds(1);

/// The system's synchronization primitive: an atomic per-mailbox,
/// per-day compare-and-set over Account Runtime State, built on top of
/// MongoDB's `find_one_and_update` (see `StorePort::try_reserve_account_runtime`)
/// the way a `FOR UPDATE SKIP LOCKED` lease would drive an atomic claim in a
/// relational store.
pub struct AccountArbiter<'a, S: StorePort> {
    store: &'a S,
    boundary_tz: &'a str,
    reservation_lock_seconds: i64,
}

impl<'a, S: StorePort> AccountArbiter<'a, S> {
    pub fn new(store: &'a S, boundary_tz: &'a str, reservation_lock_seconds: i64) -> Self {
        Self {
            store,
            boundary_tz,
            reservation_lock_seconds,
        }
    }

    pub async fn reserve(
        &self,
        mailbox_id: &Id,
        now_utc: DateTime<Utc>,
        daily_limit: i64,
        min_wait_minutes: i64,
    ) -> Result<bool, StoreError> {
        let _ = min_wait_minutes;
        let key = date_key(now_utc, self.boundary_tz);
        let lock_until = now_utc + Duration::seconds(self.reservation_lock_seconds);
        let attempt = ReservationAttempt {
            mailbox_id: mailbox_id.clone(),
            date_key: key,
            now_utc,
            daily_limit,
            lock_until,
            fresh_next_available_at: start_of_day_utc(now_utc, self.boundary_tz),
        };

        let Some(post_image) = self.store.try_reserve_account_runtime(&attempt).await? else {
            return Ok(false);
        };

        let Some(installed_lock) = post_image.locked_until else {
            return Ok(false);
        };
        let delta = (installed_lock - lock_until).num_milliseconds().abs();
        Ok(delta <= LOCK_CONFIRMATION_TOLERANCE.num_milliseconds())
    }

    pub async fn commit(
        &self,
        mailbox_id: &Id,
        now_utc: DateTime<Utc>,
        min_wait_minutes: i64,
    ) -> Result<(), StoreError> {
        let key = date_key(now_utc, self.boundary_tz);
        let next_available_at = now_utc + Duration::minutes(min_wait_minutes);
        self.store
            .commit_account_runtime(mailbox_id, &key, next_available_at)
            .await
    }

    pub async fn rollback(&self, mailbox_id: &Id, now_utc: DateTime<Utc>) -> Result<(), StoreError> {
        let key = date_key(now_utc, self.boundary_tz);
        self.store.rollback_account_runtime(mailbox_id, &key).await
    }

    /// Administrative: rebuilds `sent_count` for a mailbox on a given day
    /// from the Activity log, for when the counter has drifted.
    pub async fn recount(&self, mailbox_id: &Id, date_key: &str) -> Result<i64, StoreError> {
        let (start, end) = day_bounds_utc(date_key, self.boundary_tz)
            .ok_or_else(|| StoreError::InvalidData(format!("unparseable date_key: {date_key}")))?;
        let sent_count = self
            .store
            .count_sent_activities_for_mailbox_in_range(mailbox_id, start, end)
            .await?;
        self.store
            .set_account_runtime_sent_count(mailbox_id, date_key, sent_count)
            .await?;
        Ok(sent_count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::ActivityType;
    use crate::store::memory::MemoryStore;

    fn mailbox_id() -> Id {
        Id::from("mailbox-1")
    }

    #[tokio::test]
    async fn reserve_succeeds_when_under_limit_and_unlocked() {
        let store = MemoryStore::new();
        let arbiter = AccountArbiter::new(&store, "UTC", 30);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single().unwrap();
        let ok = arbiter.reserve(&mailbox_id(), now, 10, 5).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn concurrent_reserve_only_one_wins() {
        let store = MemoryStore::new();
        let arbiter = AccountArbiter::new(&store, "UTC", 30);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single().unwrap();
        let first = arbiter.reserve(&mailbox_id(), now, 10, 5).await.unwrap();
        let second = arbiter.reserve(&mailbox_id(), now, 10, 5).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn rollback_clears_lock_without_touching_sent_count() {
        let store = MemoryStore::new();
        let arbiter = AccountArbiter::new(&store, "UTC", 30);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single().unwrap();
        assert!(arbiter.reserve(&mailbox_id(), now, 10, 5).await.unwrap());
        arbiter.rollback(&mailbox_id(), now).await.unwrap();
        let again = arbiter.reserve(&mailbox_id(), now, 10, 5).await.unwrap();
        assert!(again);
        let key = date_key(now, "UTC");
        let state = store
            .get_account_runtime_state(&mailbox_id(), &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.sent_count, 0);
    }

    #[tokio::test]
    async fn commit_increments_sent_count_and_sets_cooldown() {
        let store = MemoryStore::new();
        let arbiter = AccountArbiter::new(&store, "UTC", 30);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single().unwrap();
        assert!(arbiter.reserve(&mailbox_id(), now, 10, 5).await.unwrap());
        arbiter.commit(&mailbox_id(), now, 5).await.unwrap();
        let key = date_key(now, "UTC");
        let state = store
            .get_account_runtime_state(&mailbox_id(), &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.sent_count, 1);
        assert!(state.locked_until.is_none());
        assert_eq!(state.next_available_at, now + Duration::minutes(5));
    }

    #[tokio::test]
    async fn reserve_blocked_by_active_cooldown() {
        let store = MemoryStore::new();
        let arbiter = AccountArbiter::new(&store, "UTC", 30);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single().unwrap();
        assert!(arbiter.reserve(&mailbox_id(), now, 10, 30).await.unwrap());
        arbiter.commit(&mailbox_id(), now, 30).await.unwrap();
        let soon = now + Duration::minutes(5);
        assert!(!arbiter.reserve(&mailbox_id(), soon, 10, 30).await.unwrap());
        let later = now + Duration::minutes(31);
        assert!(arbiter.reserve(&mailbox_id(), later, 10, 30).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_self_heals() {
        let store = MemoryStore::new();
        let arbiter = AccountArbiter::new(&store, "UTC", 30);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single().unwrap();
        assert!(arbiter.reserve(&mailbox_id(), now, 10, 0).await.unwrap());
        let after_lock_expiry = now + Duration::seconds(31);
        assert!(arbiter
            .reserve(&mailbox_id(), after_lock_expiry, 10, 0)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn recount_rebuilds_sent_count_from_activities() {
        let store = MemoryStore::new();
        let arbiter = AccountArbiter::new(&store, "UTC", 30);
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single().unwrap();
        arbiter.reserve(&mailbox_id(), now, 10, 0).await.unwrap();
        arbiter.commit(&mailbox_id(), now, 0).await.unwrap();

        store
            .append_activity(crate::models::Activity {
                id: None,
                campaign_id: Id::from("campaign-1"),
                lead_id: Id::from("lead-1"),
                mailbox_id: mailbox_id(),
                activity_type: ActivityType::Sent,
                meta: serde_json::json!({}),
                created_at: now,
            })
            .await
            .unwrap();
        store
            .append_activity(crate::models::Activity {
                id: None,
                campaign_id: Id::from("campaign-1"),
                lead_id: Id::from("lead-2"),
                mailbox_id: mailbox_id(),
                activity_type: ActivityType::Sent,
                meta: serde_json::json!({}),
                created_at: now,
            })
            .await
            .unwrap();

        let key = date_key(now, "UTC");
        let recounted = arbiter.recount(&mailbox_id(), &key).await.unwrap();
        assert_eq!(recounted, 2);
        let state = store
            .get_account_runtime_state(&mailbox_id(), &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.sent_count, 2);
    }
}
