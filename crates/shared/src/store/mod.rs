pub mod memory;
pub mod mongo;

use chrono::{DateTime, Utc};

use crate::id::Id;
use crate::models::{
    AccountRuntimeState, Activity, Campaign, CampaignOptions, CampaignSchedule, Lead,
    LeadProgress, Mailbox, MailboxCampaignSettings, MailboxGeneralSettings, Recipients, Sequence,
    SequenceStepDoc, Template,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// The inputs to one atomic reservation attempt against Account Runtime
/// State, carried through a MongoDB `find_one_and_update` contract (see
/// `shared::arbiter`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationAttempt {
    pub mailbox_id: Id,
    pub date_key: String,
    pub now_utc: DateTime<Utc>,
    pub daily_limit: i64,
    pub lock_until: DateTime<Utc>,
    pub fresh_next_available_at: DateTime<Utc>,
}

/// Every persistence operation the core (Arbiter, Worker, Dispatcher) and
/// the CLI's inspection/administration commands need. Generic rather than
/// `dyn`-dispatched: both `MongoStore` and `MemoryStore` implement it
/// directly via native `async fn`, and callers are generic over
/// `S: StorePort`, so there is no need for object safety or `async-trait`.
pub trait StorePort: Send + Sync {
    // -- preflight / read paths -------------------------------------------------
    async fn get_campaign(&self, campaign_id: &Id) -> Result<Option<Campaign>, StoreError>;
    async fn get_campaign_options(&self, campaign_id: &Id) -> Result<Option<CampaignOptions>, StoreError>;
    async fn get_campaign_schedule(&self, campaign_id: &Id) -> Result<Option<CampaignSchedule>, StoreError>;
    async fn get_sequence(&self, campaign_id: &Id) -> Result<Option<Sequence>, StoreError>;
    async fn get_sequence_step(&self, step_id: &Id) -> Result<Option<SequenceStepDoc>, StoreError>;
    async fn get_template(&self, template_id: &Id) -> Result<Option<Template>, StoreError>;

    async fn campaign_queue(&self) -> Result<Vec<Id>, StoreError>;

    async fn get_due_leads(
        &self,
        campaign_id: &Id,
        now_utc: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Lead>, StoreError>;

    async fn get_lead(&self, lead_id: &Id) -> Result<Option<Lead>, StoreError>;
    async fn list_leads(&self, campaign_id: &Id) -> Result<Vec<Lead>, StoreError>;
    async fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError>;
    async fn list_mailboxes(&self) -> Result<Vec<Mailbox>, StoreError>;

    async fn get_mailbox(&self, mailbox_id: &Id) -> Result<Option<Mailbox>, StoreError>;
    async fn get_mailbox_campaign_settings(&self, mailbox_id: &Id) -> Result<Option<MailboxCampaignSettings>, StoreError>;
    async fn get_mailbox_general_settings(&self, mailbox_id: &Id) -> Result<Option<MailboxGeneralSettings>, StoreError>;

    // -- mutation paths ----------------------------------------------------------
    async fn update_lead_progress(&self, lead_id: &Id, progress: LeadProgress) -> Result<(), StoreError>;
    async fn reset_lead_progress(&self, lead_id: &Id) -> Result<(), StoreError>;
    async fn make_lead_due_now(&self, lead_id: &Id, now_utc: DateTime<Utc>) -> Result<(), StoreError>;
    async fn set_lead_stopped(&self, lead_id: &Id, stopped: bool, reason: Option<String>) -> Result<(), StoreError>;
    async fn backfill_progress(&self, campaign_id: &Id) -> Result<u64, StoreError>;
    async fn replace_lead_data(&self, lead_id: &Id, lead_data: Recipients) -> Result<(), StoreError>;

    async fn append_activity(&self, activity: Activity) -> Result<(), StoreError>;
    async fn count_sent_activities_since(&self, campaign_id: &Id, since: DateTime<Utc>) -> Result<i64, StoreError>;
    async fn count_sent_activities_for_mailbox_in_range(
        &self,
        mailbox_id: &Id,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    // -- account runtime state / arbiter backing ---------------------------------
    async fn get_account_runtime_state(&self, mailbox_id: &Id, date_key: &str) -> Result<Option<AccountRuntimeState>, StoreError>;
    async fn list_account_runtime_states(&self) -> Result<Vec<AccountRuntimeState>, StoreError>;

    /// Atomic compare-and-set: see `shared::arbiter::AccountArbiter::reserve`.
    async fn try_reserve_account_runtime(
        &self,
        attempt: &ReservationAttempt,
    ) -> Result<Option<AccountRuntimeState>, StoreError>;

    async fn commit_account_runtime(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        next_available_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn rollback_account_runtime(&self, mailbox_id: &Id, date_key: &str) -> Result<(), StoreError>;

    async fn set_account_runtime_sent_count(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        sent_count: i64,
    ) -> Result<(), StoreError>;

    async fn fix_account_runtime_next_available_at(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        next_available_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn ensure_indexes(&self) -> Result<(), StoreError>;
}
