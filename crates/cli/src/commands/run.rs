use std::sync::Arc;
use std::time::Duration;

use shared::clock::{Clock, SystemClock};
use shared::config::Config;
use shared::store::mongo::MongoStore;
use shared::transport::SmtpTransport;
use shared::Id;
use tokio::signal;
use tokio::time;
use tracing::info;
use worker::{Dispatcher, RoundRobinCursor, Worker};

use super::CommandError;

fn transport(config: &Config) -> SmtpTransport {
    SmtpTransport::new(config.smtp_starttls, Duration::from_secs(config.smtp_timeout_seconds))
}

fn worker(config: &Config, store: &MongoStore) -> Worker<MongoStore, SmtpTransport> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Worker::new(
        Arc::new(store.clone()),
        Arc::new(transport(config)),
        clock,
        Arc::new(RoundRobinCursor::new()),
        config.day_boundary_tz.clone(),
        config.default_reservation_lock_seconds,
    )
}

fn dispatcher(config: &Config, store: &MongoStore) -> Dispatcher<MongoStore, SmtpTransport> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Dispatcher::new(Arc::new(store.clone()), worker(config, store), clock)
}

pub async fn run_dispatcher(config: &Config, store: &MongoStore, batch_size: i64) -> Result<(), CommandError> {
    let outcome = dispatcher(config, store).run_once(batch_size).await;
    info!(
        campaigns_considered = outcome.campaigns_considered,
        campaigns_run = outcome.campaigns_run,
        campaigns_skipped = outcome.campaigns_skipped,
        campaigns_failed = outcome.campaigns_failed,
        "dispatcher run completed"
    );
    Ok(())
}

pub async fn run_continuous(
    config: &Config,
    store: &MongoStore,
    tick_seconds: Option<u64>,
    batch_size: Option<i64>,
) -> Result<(), CommandError> {
    let tick_seconds = tick_seconds.unwrap_or(config.dispatcher_tick_seconds);
    let batch_size = batch_size.unwrap_or(config.default_worker_batch_size);
    let dispatcher = dispatcher(config, store);

    info!(tick_seconds, "starting continuous dispatcher, press Ctrl-C to stop");
    let mut ticker = time::interval(Duration::from_secs(tick_seconds));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let outcome = dispatcher.run_once(batch_size).await;
                info!(
                    campaigns_considered = outcome.campaigns_considered,
                    campaigns_run = outcome.campaigns_run,
                    campaigns_skipped = outcome.campaigns_skipped,
                    campaigns_failed = outcome.campaigns_failed,
                    "dispatcher tick complete"
                );
            }
        }
    }

    Ok(())
}

pub async fn run_worker(
    config: &Config,
    store: &MongoStore,
    campaign: &str,
    batch_size: i64,
    dry_run: bool,
    since: Option<&str>,
) -> Result<(), CommandError> {
    // Validated but not otherwise used: get_due_leads already filters on
    // next_due_at, so there is nothing further to gate on.
    if let Some(since) = since {
        if chrono::DateTime::parse_from_rfc3339(since).is_err() {
            return Err(CommandError::InvalidDate(since.to_string()));
        }
    }

    let campaign_id = Id::from(campaign);
    let outcome = worker(config, store).run_once(&campaign_id, batch_size, dry_run).await?;
    info!(
        campaign_id = %campaign_id,
        due_leads = outcome.due_leads,
        processed = outcome.processed,
        sent = outcome.sent,
        skipped = outcome.skipped,
        pool_exhausted = outcome.pool_exhausted,
        "worker run completed"
    );
    Ok(())
}
