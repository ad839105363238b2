use std::sync::Arc;

use shared::clock::{start_of_day_true_utc, Clock};
use shared::schedule::in_window;
use shared::store::StorePort;
use shared::transport::Transport;
use tracing::error;

use crate::worker::{Worker, WorkerOutcome};

/// Aggregate per-tick counters across all campaigns in the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherOutcome {
    pub campaigns_considered: i64,
    pub campaigns_run: i64,
    pub campaigns_skipped: i64,
    pub campaigns_failed: i64,
}

pub struct Dispatcher<S, T> {
    store: Arc<S>,
    worker: Worker<S, T>,
    clock: Arc<dyn Clock>,
}

impl<S, T> Dispatcher<S, T>
where
    S: StorePort + 'static,
    T: Transport + 'static,
{
    pub fn new(store: Arc<S>, worker: Worker<S, T>, clock: Arc<dyn Clock>) -> Self {
        Self { store, worker, clock }
    }

    /// One dispatcher tick: walk the campaign queue, skip anything paused,
    /// out of its schedule window, or already at its daily cap, then run a
    /// worker batch for the rest. A Worker error for one campaign is caught
    /// and logged; it never aborts the remaining campaigns in the queue.
    pub async fn run_once(&self, batch_size: i64) -> DispatcherOutcome {
        let now = self.clock.now_utc();
        let mut outcome = DispatcherOutcome::default();

        let campaign_ids = match self.store.campaign_queue().await {
            Ok(ids) => ids,
            Err(err) => {
                error!("failed to read campaign queue: {err}");
                return outcome;
            }
        };

        for campaign_id in campaign_ids {
            outcome.campaigns_considered += 1;

            let campaign = match self.store.get_campaign(&campaign_id).await {
                Ok(Some(campaign)) if campaign.status.is_active() => campaign,
                Ok(_) => {
                    outcome.campaigns_skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(campaign_id = %campaign_id, "failed to load campaign: {err}");
                    outcome.campaigns_failed += 1;
                    continue;
                }
            };

            let schedule = match self.store.get_campaign_schedule(&campaign.id).await {
                Ok(Some(schedule)) => schedule,
                Ok(None) => {
                    outcome.campaigns_skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(campaign_id = %campaign.id, "failed to load schedule: {err}");
                    outcome.campaigns_failed += 1;
                    continue;
                }
            };
            if !in_window(now, &schedule) {
                outcome.campaigns_skipped += 1;
                continue;
            }

            let options = match self.store.get_campaign_options(&campaign.id).await {
                Ok(Some(options)) if options.daily_email_limit > 0 => options,
                Ok(_) => {
                    outcome.campaigns_skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(campaign_id = %campaign.id, "failed to load campaign options: {err}");
                    outcome.campaigns_failed += 1;
                    continue;
                }
            };

            let since = start_of_day_true_utc(now);
            let sent_today = match self.store.count_sent_activities_since(&campaign.id, since).await {
                Ok(count) => count,
                Err(err) => {
                    error!(campaign_id = %campaign.id, "failed to count sent activities: {err}");
                    outcome.campaigns_failed += 1;
                    continue;
                }
            };
            if sent_today >= options.daily_email_limit {
                outcome.campaigns_skipped += 1;
                continue;
            }

            let effective_batch = batch_size.min(options.daily_email_limit - sent_today).max(0);
            if effective_batch == 0 {
                outcome.campaigns_skipped += 1;
                continue;
            }

            match self.worker.run_once(&campaign.id, effective_batch, false).await {
                Ok(worker_outcome) => {
                    log_worker_outcome(&campaign.id, &worker_outcome);
                    outcome.campaigns_run += 1;
                }
                Err(err) => {
                    error!(campaign_id = %campaign.id, "worker run failed: {err}");
                    outcome.campaigns_failed += 1;
                }
            }
        }

        outcome
    }
}

fn log_worker_outcome(campaign_id: &shared::Id, outcome: &WorkerOutcome) {
    tracing::info!(
        campaign_id = %campaign_id,
        due_leads = outcome.due_leads,
        processed = outcome.processed,
        sent = outcome.sent,
        skipped = outcome.skipped,
        pool_exhausted = outcome.pool_exhausted,
        "worker tick complete"
    );
}

#[cfg(test)]
mod tests {
    use shared::clock::FixedClock;
    use shared::models::{
        Campaign, CampaignOptions, CampaignSchedule, CampaignStatus,
    };
    use shared::store::memory::MemoryStore;
    use shared::transport::TransportError;
    use shared::Id;

    use crate::cursor::RoundRobinCursor;

    use super::*;

    struct NoopTransport;
    impl Transport for NoopTransport {
        fn send(
            &self,
            _mailbox: &shared::models::Mailbox,
            _to_email: &str,
            _subject: &str,
            _html: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn dispatcher(store: Arc<MemoryStore>, now: chrono::DateTime<chrono::Utc>) -> Dispatcher<MemoryStore, NoopTransport> {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now));
        let worker = Worker::new(
            store.clone(),
            Arc::new(NoopTransport),
            clock.clone(),
            Arc::new(RoundRobinCursor::new()),
            "UTC".to_string(),
            30,
        );
        Dispatcher::new(store, worker, clock)
    }

    #[tokio::test]
    async fn skips_paused_campaigns() {
        let store = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now();
        store.insert_campaign(Campaign {
            id: Id::from("campaign-1"),
            status: CampaignStatus::Paused,
        });
        let d = dispatcher(store, now);
        let outcome = d.run_once(10).await;
        assert_eq!(outcome.campaigns_considered, 1);
        assert_eq!(outcome.campaigns_skipped, 1);
        assert_eq!(outcome.campaigns_run, 0);
    }

    #[tokio::test]
    async fn skips_campaigns_outside_schedule_window() {
        let store = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now();
        store.insert_campaign(Campaign {
            id: Id::from("campaign-1"),
            status: CampaignStatus::Active,
        });
        store.insert_campaign_schedule(CampaignSchedule {
            campaign_id: Id::from("campaign-1"),
            timezone: "not-a-zone".to_string(),
            scheduled_days: None,
            start_date: None,
            end_date: None,
            time_from: None,
            time_to: None,
        });
        let d = dispatcher(store, now);
        let outcome = d.run_once(10).await;
        assert_eq!(outcome.campaigns_skipped, 1);
    }

    #[tokio::test]
    async fn skips_campaigns_with_zero_daily_limit() {
        let store = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now();
        store.insert_campaign(Campaign {
            id: Id::from("campaign-1"),
            status: CampaignStatus::Active,
        });
        store.insert_campaign_schedule(CampaignSchedule {
            campaign_id: Id::from("campaign-1"),
            timezone: "UTC".to_string(),
            scheduled_days: None,
            start_date: None,
            end_date: None,
            time_from: None,
            time_to: None,
        });
        store.insert_campaign_options(CampaignOptions {
            campaign_id: Id::from("campaign-1"),
            daily_email_limit: 0,
            mailbox_pool: vec![],
        });
        let d = dispatcher(store, now);
        let outcome = d.run_once(10).await;
        assert_eq!(outcome.campaigns_skipped, 1);
    }
}
