use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::id::Id;
use crate::models::{
    AccountRuntimeState, Activity, Campaign, CampaignOptions, CampaignSchedule, Lead,
    LeadProgress, Mailbox, MailboxCampaignSettings, MailboxGeneralSettings, Sequence,
    SequenceStepDoc, Template,
};

use super::{ReservationAttempt, StoreError, StorePort};

/// An in-process store used by tests in place of a live MongoDB instance.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    campaigns: HashMap<String, Campaign>,
    options: HashMap<String, CampaignOptions>,
    schedules: HashMap<String, CampaignSchedule>,
    sequences: HashMap<String, Sequence>,
    steps: HashMap<String, SequenceStepDoc>,
    templates: HashMap<String, Template>,
    leads: HashMap<String, Lead>,
    mailboxes: HashMap<String, Mailbox>,
    mailbox_campaign_settings: HashMap<String, MailboxCampaignSettings>,
    mailbox_general_settings: HashMap<String, MailboxGeneralSettings>,
    activities: Vec<Activity>,
    runtime_states: HashMap<(String, String), AccountRuntimeState>,
    queue: Vec<Id>,
    next_activity_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push(campaign.id.clone());
        inner.campaigns.insert(campaign.id.as_str().to_string(), campaign);
    }

    pub fn insert_campaign_options(&self, options: CampaignOptions) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .options
            .insert(options.campaign_id.as_str().to_string(), options);
    }

    pub fn insert_campaign_schedule(&self, schedule: CampaignSchedule) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .schedules
            .insert(schedule.campaign_id.as_str().to_string(), schedule);
    }

    pub fn insert_sequence(&self, sequence: Sequence) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sequences
            .insert(sequence.campaign_id.as_str().to_string(), sequence);
    }

    pub fn insert_step(&self, step: SequenceStepDoc) {
        let mut inner = self.inner.lock().unwrap();
        inner.steps.insert(step.id.as_str().to_string(), step);
    }

    pub fn insert_template(&self, template: Template) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .templates
            .insert(template.id.as_str().to_string(), template);
    }

    pub fn insert_lead(&self, lead: Lead) {
        let mut inner = self.inner.lock().unwrap();
        inner.leads.insert(lead.id.as_str().to_string(), lead);
    }

    pub fn insert_mailbox(&self, mailbox: Mailbox) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .mailboxes
            .insert(mailbox.id.as_str().to_string(), mailbox);
    }

    pub fn insert_mailbox_campaign_settings(&self, settings: MailboxCampaignSettings) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .mailbox_campaign_settings
            .insert(settings.mailbox_id.as_str().to_string(), settings);
    }

    pub fn insert_mailbox_general_settings(&self, settings: MailboxGeneralSettings) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .mailbox_general_settings
            .insert(settings.mailbox_id.as_str().to_string(), settings);
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.inner.lock().unwrap().activities.clone()
    }
}

fn is_due(lead: &Lead, now_utc: DateTime<Utc>) -> bool {
    match &lead.progress {
        None => true,
        Some(progress) => {
            if progress.stopped {
                return false;
            }
            progress.last_sent_at.is_none()
                || progress.next_due_at.map(|due| due <= now_utc).unwrap_or(true)
        }
    }
}

impl StorePort for MemoryStore {
    async fn get_campaign(&self, campaign_id: &Id) -> Result<Option<Campaign>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .campaigns
            .get(campaign_id.as_str())
            .cloned())
    }

    async fn get_campaign_options(&self, campaign_id: &Id) -> Result<Option<CampaignOptions>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .options
            .get(campaign_id.as_str())
            .cloned())
    }

    async fn get_campaign_schedule(&self, campaign_id: &Id) -> Result<Option<CampaignSchedule>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .schedules
            .get(campaign_id.as_str())
            .cloned())
    }

    async fn get_sequence(&self, campaign_id: &Id) -> Result<Option<Sequence>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sequences
            .get(campaign_id.as_str())
            .cloned())
    }

    async fn get_sequence_step(&self, step_id: &Id) -> Result<Option<SequenceStepDoc>, StoreError> {
        Ok(self.inner.lock().unwrap().steps.get(step_id.as_str()).cloned())
    }

    async fn get_template(&self, template_id: &Id) -> Result<Option<Template>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .templates
            .get(template_id.as_str())
            .cloned())
    }

    async fn campaign_queue(&self) -> Result<Vec<Id>, StoreError> {
        Ok(self.inner.lock().unwrap().queue.clone())
    }

    async fn get_due_leads(
        &self,
        campaign_id: &Id,
        now_utc: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Lead>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<Lead> = inner
            .leads
            .values()
            .filter(|lead| lead.campaign_id == *campaign_id && is_due(lead, now_utc))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn get_lead(&self, lead_id: &Id) -> Result<Option<Lead>, StoreError> {
        Ok(self.inner.lock().unwrap().leads.get(lead_id.as_str()).cloned())
    }

    async fn list_leads(&self, campaign_id: &Id) -> Result<Vec<Lead>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .leads
            .values()
            .filter(|lead| lead.campaign_id == *campaign_id)
            .cloned()
            .collect())
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        Ok(self.inner.lock().unwrap().campaigns.values().cloned().collect())
    }

    async fn list_mailboxes(&self) -> Result<Vec<Mailbox>, StoreError> {
        Ok(self.inner.lock().unwrap().mailboxes.values().cloned().collect())
    }

    async fn get_mailbox(&self, mailbox_id: &Id) -> Result<Option<Mailbox>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .mailboxes
            .get(mailbox_id.as_str())
            .cloned())
    }

    async fn get_mailbox_campaign_settings(&self, mailbox_id: &Id) -> Result<Option<MailboxCampaignSettings>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .mailbox_campaign_settings
            .get(mailbox_id.as_str())
            .cloned())
    }

    async fn get_mailbox_general_settings(&self, mailbox_id: &Id) -> Result<Option<MailboxGeneralSettings>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .mailbox_general_settings
            .get(mailbox_id.as_str())
            .cloned())
    }

    async fn update_lead_progress(&self, lead_id: &Id, progress: LeadProgress) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let lead = inner
            .leads
            .get_mut(lead_id.as_str())
            .ok_or(StoreError::NotFound("lead"))?;
        lead.progress = Some(progress);
        Ok(())
    }

    async fn reset_lead_progress(&self, lead_id: &Id) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let lead = inner
            .leads
            .get_mut(lead_id.as_str())
            .ok_or(StoreError::NotFound("lead"))?;
        lead.progress = None;
        lead.lead_data = lead.lead_data.reset_contact_status();
        Ok(())
    }

    async fn replace_lead_data(&self, lead_id: &Id, lead_data: crate::models::Recipients) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let lead = inner
            .leads
            .get_mut(lead_id.as_str())
            .ok_or(StoreError::NotFound("lead"))?;
        lead.lead_data = lead_data;
        Ok(())
    }

    async fn make_lead_due_now(&self, lead_id: &Id, now_utc: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let lead = inner
            .leads
            .get_mut(lead_id.as_str())
            .ok_or(StoreError::NotFound("lead"))?;
        if let Some(progress) = lead.progress.as_mut() {
            progress.next_due_at = Some(now_utc);
        } else {
            lead.progress = Some(LeadProgress {
                next_due_at: Some(now_utc),
                ..LeadProgress::default()
            });
        }
        Ok(())
    }

    async fn set_lead_stopped(&self, lead_id: &Id, stopped: bool, reason: Option<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let lead = inner
            .leads
            .get_mut(lead_id.as_str())
            .ok_or(StoreError::NotFound("lead"))?;
        let progress = lead.progress.get_or_insert_with(LeadProgress::default);
        progress.stopped = stopped;
        progress.reason = reason;
        Ok(())
    }

    async fn backfill_progress(&self, campaign_id: &Id) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut touched = 0u64;
        for lead in inner.leads.values_mut() {
            if lead.campaign_id == *campaign_id && lead.progress.is_none() {
                lead.progress = Some(LeadProgress {
                    current_step_order: 1,
                    ..LeadProgress::default()
                });
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn append_activity(&self, activity: Activity) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut activity = activity;
        inner.next_activity_id += 1;
        activity.id = Some(Id::from(format!("activity-{}", inner.next_activity_id)));
        inner.activities.push(activity);
        Ok(())
    }

    async fn count_sent_activities_since(&self, campaign_id: &Id, since: DateTime<Utc>) -> Result<i64, StoreError> {
        use crate::models::ActivityType;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .activities
            .iter()
            .filter(|a| {
                a.campaign_id == *campaign_id
                    && a.activity_type == ActivityType::Sent
                    && a.created_at >= since
            })
            .count() as i64)
    }

    async fn count_sent_activities_for_mailbox_in_range(
        &self,
        mailbox_id: &Id,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        use crate::models::ActivityType;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .activities
            .iter()
            .filter(|a| {
                a.mailbox_id == *mailbox_id
                    && a.activity_type == ActivityType::Sent
                    && a.created_at >= start
                    && a.created_at < end
            })
            .count() as i64)
    }

    async fn get_account_runtime_state(&self, mailbox_id: &Id, date_key: &str) -> Result<Option<AccountRuntimeState>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .runtime_states
            .get(&(mailbox_id.as_str().to_string(), date_key.to_string()))
            .cloned())
    }

    async fn list_account_runtime_states(&self) -> Result<Vec<AccountRuntimeState>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .runtime_states
            .values()
            .cloned()
            .collect())
    }

    async fn try_reserve_account_runtime(
        &self,
        attempt: &ReservationAttempt,
    ) -> Result<Option<AccountRuntimeState>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (attempt.mailbox_id.as_str().to_string(), attempt.date_key.clone());
        let entry = inner.runtime_states.entry(key).or_insert_with(|| AccountRuntimeState {
            mailbox_id: attempt.mailbox_id.clone(),
            date_key: attempt.date_key.clone(),
            sent_count: 0,
            next_available_at: attempt.fresh_next_available_at,
            locked_until: None,
        });

        let locked = entry
            .locked_until
            .map(|locked_until| locked_until > attempt.now_utc)
            .unwrap_or(false);
        let cooling_down = entry.next_available_at > attempt.now_utc;
        let exhausted = entry.sent_count >= attempt.daily_limit;

        if locked || cooling_down || exhausted {
            return Ok(None);
        }

        entry.locked_until = Some(attempt.lock_until);
        Ok(Some(entry.clone()))
    }

    async fn commit_account_runtime(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        next_available_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .runtime_states
            .get_mut(&(mailbox_id.as_str().to_string(), date_key.to_string()))
            .ok_or(StoreError::NotFound("account runtime state"))?;
        entry.sent_count += 1;
        entry.next_available_at = next_available_at;
        entry.locked_until = None;
        Ok(())
    }

    async fn rollback_account_runtime(&self, mailbox_id: &Id, date_key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .runtime_states
            .get_mut(&(mailbox_id.as_str().to_string(), date_key.to_string()))
            .ok_or(StoreError::NotFound("account runtime state"))?;
        entry.locked_until = None;
        Ok(())
    }

    async fn set_account_runtime_sent_count(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        sent_count: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .runtime_states
            .get_mut(&(mailbox_id.as_str().to_string(), date_key.to_string()))
            .ok_or(StoreError::NotFound("account runtime state"))?;
        entry.sent_count = sent_count;
        Ok(())
    }

    async fn fix_account_runtime_next_available_at(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        next_available_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .runtime_states
            .get_mut(&(mailbox_id.as_str().to_string(), date_key.to_string()))
            .ok_or(StoreError::NotFound("account runtime state"))?;
        entry.next_available_at = next_available_at;
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
