use chrono::{TimeZone, Utc};
use shared::arbiter::AccountArbiter;
use shared::config::Config;
use shared::store::mongo::MongoStore;
use shared::store::StorePort;
use shared::Id;
use tracing::info;

use super::CommandError;

pub async fn init_indexes(store: &MongoStore) -> Result<(), CommandError> {
    store.ensure_indexes().await?;
    println!("Indexes created successfully.");
    Ok(())
}

pub async fn backfill_progress(store: &MongoStore, campaign: &str) -> Result<(), CommandError> {
    let touched = store.backfill_progress(&Id::from(campaign)).await?;
    println!("Progress backfilled for {touched} lead(s) in campaign {campaign}.");
    Ok(())
}

pub async fn recount_runtime(config: &Config, store: &MongoStore, mailbox: &str, date: &str) -> Result<(), CommandError> {
    let arbiter = AccountArbiter::new(store, &config.day_boundary_tz, config.default_reservation_lock_seconds);
    let sent_count = arbiter.recount(&Id::from(mailbox), date).await?;
    println!("Runtime state recounted for {mailbox} on {date}: sent_count = {sent_count}.");
    Ok(())
}

pub async fn make_lead_due_now(store: &MongoStore, lead: &str) -> Result<(), CommandError> {
    let lead_id = Id::from(lead);
    store.make_lead_due_now(&lead_id, Utc::now()).await?;
    let updated = store.get_lead(&lead_id).await?.ok_or(shared::store::StoreError::NotFound("lead"))?;
    let current_step = updated.progress.as_ref().map(|p| p.current_step_order_or_default()).unwrap_or(1);
    println!("Lead {lead} is now due for processing.");
    println!("Current step: {current_step}");
    Ok(())
}

pub async fn reset_lead_progress(store: &MongoStore, lead: &str) -> Result<(), CommandError> {
    store.reset_lead_progress(&Id::from(lead)).await?;
    println!("Lead {lead} progress reset to step 1.");
    println!("All recipients will be processed from the beginning.");
    println!("All statuses reset to 'not_contacted'.");
    Ok(())
}

/// Syncs each lead's `lead_data` recipient status with what
/// `progress.processed_recipients` already recorded as sent. Administrative
/// only: never read by `Worker::run_once`'s sequencing logic.
pub async fn update_lead_statuses(store: &MongoStore, campaign: &str) -> Result<(), CommandError> {
    let leads = store.list_leads(&Id::from(campaign)).await?;
    let mut updated_leads = 0u64;

    for lead in leads {
        let Some(progress) = &lead.progress else { continue };
        if progress.processed_recipients.is_empty() {
            continue;
        }
        let (updated, touched) = lead.lead_data.mark_contacted_from_progress(progress);
        if touched == 0 {
            continue;
        }
        store.replace_lead_data(&lead.id, updated).await?;
        updated_leads += 1;
        info!(lead_id = %lead.id, touched, "updated recipient statuses");
    }

    println!("Updated {updated_leads} lead(s) with correct recipient statuses.");
    Ok(())
}

/// Repairs `account_runtime_state` records with an implausible
/// `next_available_at`: anything before 2020 is forced to the start of
/// today, and anything more than an hour in the future with zero sends
/// recorded is treated the same way.
pub async fn fix_runtime_states(store: &MongoStore) -> Result<(), CommandError> {
    let now_utc = Utc::now();
    let start_of_today = now_utc
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Utc.from_local_datetime(&naive).single())
        .unwrap_or(now_utc);
    let epoch_floor = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap();
    let future_ceiling = now_utc + chrono::Duration::hours(1);

    let mut fixed = 0u64;
    let mut fixed_future = 0u64;
    for state in store.list_account_runtime_states().await? {
        if state.next_available_at < epoch_floor {
            store
                .fix_account_runtime_next_available_at(&state.mailbox_id, &state.date_key, start_of_today)
                .await?;
            store.rollback_account_runtime(&state.mailbox_id, &state.date_key).await?;
            fixed += 1;
        } else if state.next_available_at > future_ceiling && state.sent_count == 0 {
            store
                .fix_account_runtime_next_available_at(&state.mailbox_id, &state.date_key, start_of_today)
                .await?;
            store.rollback_account_runtime(&state.mailbox_id, &state.date_key).await?;
            fixed_future += 1;
        }
    }

    println!("Fixed {fixed} problematic runtime state record(s).");
    if fixed_future > 0 {
        println!("Also fixed {fixed_future} record(s) with suspicious future timestamps.");
    }
    Ok(())
}
