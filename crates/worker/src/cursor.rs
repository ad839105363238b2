use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use shared::Id;

/// Process-local round-robin cursor over each campaign's mailbox pool.
/// Reset on process restart, never persisted: an optimization over the
/// Arbiter's authoritative per-mailbox throttling rather than a correctness
/// requirement.
#[derive(Default)]
pub struct RoundRobinCursor {
    pools: Mutex<HashMap<Id, VecDeque<Id>>>,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the live rotation for `campaign_id`, seeding it from
    /// `pool_order` (the campaign options' configured order) on first use.
    pub fn with_pool<F, R>(&self, campaign_id: &Id, pool_order: &[Id], f: F) -> R
    where
        F: FnOnce(&mut VecDeque<Id>) -> R,
    {
        let mut pools = self.pools.lock().unwrap();
        let deque = pools
            .entry(campaign_id.clone())
            .or_insert_with(|| pool_order.iter().cloned().collect());
        f(deque)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_from_pool_order_on_first_use() {
        let cursor = RoundRobinCursor::new();
        let campaign = Id::from("campaign-1");
        let pool = vec![Id::from("a"), Id::from("b"), Id::from("c")];
        let first = cursor.with_pool(&campaign, &pool, |deque| deque.front().cloned());
        assert_eq!(first, Some(Id::from("a")));
    }

    #[test]
    fn rotation_advances_across_calls() {
        let cursor = RoundRobinCursor::new();
        let campaign = Id::from("campaign-1");
        let pool = vec![Id::from("a"), Id::from("b")];
        cursor.with_pool(&campaign, &pool, |deque| {
            let front = deque.pop_front().unwrap();
            deque.push_back(front);
        });
        let front_now = cursor.with_pool(&campaign, &pool, |deque| deque.front().cloned());
        assert_eq!(front_now, Some(Id::from("b")));
    }
}
