pub mod admin;
pub mod inspect;
pub mod run;

use shared::config::Config;
use shared::store::mongo::MongoStore;
use shared::store::StoreError;

use crate::Commands;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Worker(#[from] worker::WorkerError),
    #[error("invalid date: {0}")]
    InvalidDate(String),
}

pub async fn dispatch(command: Commands, config: &Config, store: MongoStore) -> Result<(), CommandError> {
    match command {
        Commands::InitIndexes => admin::init_indexes(&store).await,
        Commands::RunDispatcher { batch_size, verbose: _ } => run::run_dispatcher(config, &store, batch_size).await,
        Commands::RunContinuous { tick_seconds, batch_size } => {
            run::run_continuous(config, &store, tick_seconds, batch_size).await
        }
        Commands::RunWorker {
            campaign,
            batch_size,
            dry_run,
            since,
        } => run::run_worker(config, &store, &campaign, batch_size, dry_run, since.as_deref()).await,
        Commands::BackfillProgress { campaign } => admin::backfill_progress(&store, &campaign).await,
        Commands::RecountRuntime { mailbox, date } => admin::recount_runtime(config, &store, &mailbox, &date).await,
        Commands::ListAccounts => inspect::list_accounts(&store).await,
        Commands::ListCampaigns => inspect::list_campaigns(&store).await,
        Commands::ListLeads { campaign } => inspect::list_leads(&store, &campaign).await,
        Commands::ShowDueLeads { campaign, limit } => inspect::show_due_leads(&store, &campaign, limit).await,
        Commands::ShowLeadDetails { lead } => inspect::show_lead_details(&store, &lead).await,
        Commands::CheckRuntimeStates => inspect::check_runtime_states(&store).await,
        Commands::FixRuntimeStates => admin::fix_runtime_states(&store).await,
        Commands::MakeLeadDueNow { lead } => admin::make_lead_due_now(&store, &lead).await,
        Commands::ResetLeadProgress { lead } => admin::reset_lead_progress(&store, &lead).await,
        Commands::UpdateLeadStatuses { campaign } => admin::update_lead_statuses(&store, &campaign).await,
        Commands::DebugTemplate { campaign, lead } => inspect::debug_template(&store, &campaign, lead.as_deref()).await,
    }
}
