use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::arbiter::AccountArbiter;
use shared::clock::Clock;
use shared::models::{ActivityType, LeadProgress, ProcessedRecipient, RecipientData};
use shared::renderer::render;
use shared::store::{StoreError, StorePort};
use shared::transport::{Transport, TransportError};
use shared::Id;
use tracing::{error, warn};

use crate::cursor::RoundRobinCursor;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("blocking send task panicked: {0}")]
    Join(String),
}

/// Per-tick, per-campaign counters surfaced to the Dispatcher and CLI's
/// structured logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub due_leads: i64,
    pub processed: i64,
    pub sent: i64,
    pub skipped: i64,
    pub pool_exhausted: bool,
}

pub struct Worker<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    cursor: Arc<RoundRobinCursor>,
    boundary_tz: String,
    reservation_lock_seconds: i64,
}

impl<S, T> Worker<S, T>
where
    S: StorePort + 'static,
    T: Transport + 'static,
{
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
        cursor: Arc<RoundRobinCursor>,
        boundary_tz: String,
        reservation_lock_seconds: i64,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            cursor,
            boundary_tz,
            reservation_lock_seconds,
        }
    }

    pub async fn run_once(
        &self,
        campaign_id: &Id,
        batch_size: i64,
        dry_run: bool,
    ) -> Result<WorkerOutcome, WorkerError> {
        let now = self.clock.now_utc();
        let mut outcome = WorkerOutcome::default();

        let sequence = self
            .store
            .get_sequence(campaign_id)
            .await?
            .ok_or(StoreError::NotFound("campaign_sequences"))?;
        let options = self
            .store
            .get_campaign_options(campaign_id)
            .await?
            .ok_or(StoreError::NotFound("campaign_options"))?;

        let due_leads = self.store.get_due_leads(campaign_id, now, batch_size).await?;
        outcome.due_leads = due_leads.len() as i64;

        let arbiter = AccountArbiter::new(
            self.store.as_ref(),
            &self.boundary_tz,
            self.reservation_lock_seconds,
        );

        for lead in due_leads {
            outcome.processed += 1;
            let mut progress = lead.progress.clone().unwrap_or_default();
            let order = progress.current_step_order_or_default();

            let Some(step_ref) = sequence.step_at(order) else {
                progress.stopped = true;
                progress.reason = Some("completed".to_string());
                self.store.update_lead_progress(&lead.id, progress).await?;
                outcome.skipped += 1;
                continue;
            };

            let Some(step_doc) = self.store.get_sequence_step(&step_ref.step_ref).await? else {
                error!(lead_id = %lead.id, "sequence step missing, skipping lead");
                outcome.skipped += 1;
                continue;
            };
            let Some(template) = self.store.get_template(&step_doc.active_template_ref).await? else {
                error!(lead_id = %lead.id, "template missing, skipping lead");
                outcome.skipped += 1;
                continue;
            };

            let total = lead.lead_data.len().max(1);
            let step_prefix = format!("step_{order}_");
            let recipient_index = (0..total).find(|i| {
                !progress
                    .processed_recipients
                    .contains_key(&format!("{step_prefix}recipient_{i}"))
            });

            let Some(recipient_index) = recipient_index else {
                // every recipient in this step is already processed; the
                // advance to the next step happens on the send path, so if
                // we land here without having advanced, there is nothing
                // left to do for this lead this tick.
                outcome.skipped += 1;
                continue;
            };
            let Some(recipient) = lead.lead_data.get(recipient_index).cloned() else {
                outcome.skipped += 1;
                continue;
            };

            if options.mailbox_pool.is_empty() {
                outcome.pool_exhausted = true;
                break;
            }

            let selected = self
                .select_mailbox(campaign_id, &options.mailbox_pool, &arbiter, now)
                .await?;
            let Some((mailbox_id, settings)) = selected else {
                outcome.pool_exhausted = true;
                break;
            };

            let mailbox = match self.store.get_mailbox(&mailbox_id).await? {
                Some(mailbox) => mailbox,
                None => {
                    arbiter.rollback(&mailbox_id, now).await?;
                    outcome.skipped += 1;
                    continue;
                }
            };
            let general = self
                .store
                .get_mailbox_general_settings(&mailbox_id)
                .await?
                .unwrap_or_default();

            let context = build_render_context(&recipient, &general, &mailbox, campaign_id, order);
            let (subject, body) = render(&template.subject, template.body_source(), &context);
            if subject.is_empty() {
                warn!(lead_id = %lead.id, "rendered subject is empty, sending anyway");
            }

            let to_email = recipient.get("email").map(String::as_str).unwrap_or("");
            if to_email.is_empty() {
                arbiter.rollback(&mailbox_id, now).await?;
                outcome.skipped += 1;
                continue;
            }

            if dry_run {
                arbiter.rollback(&mailbox_id, now).await?;
                self.advance_progress(
                    &lead.id,
                    &mut progress,
                    order,
                    recipient_index,
                    total,
                    to_email,
                    &step_doc.active_template_ref,
                    step_ref.next_message_day,
                    settings.min_wait_time,
                    now,
                )
                .await?;
                continue;
            }

            let transport = Arc::clone(&self.transport);
            let mailbox_for_send = mailbox.clone();
            let subject_for_send = subject.clone();
            let body_for_send = body.clone();
            let to_email_for_send = to_email.to_string();
            let send_result = tokio::task::spawn_blocking(move || {
                transport.send(&mailbox_for_send, &to_email_for_send, &subject_for_send, &body_for_send)
            })
            .await
            .map_err(|e| WorkerError::Join(e.to_string()))?;

            match send_result {
                Ok(()) => {
                    arbiter.commit(&mailbox_id, now, settings.min_wait_time).await?;
                    self.store
                        .append_activity(shared::models::Activity {
                            id: None,
                            campaign_id: campaign_id.clone(),
                            lead_id: lead.id.clone(),
                            mailbox_id: mailbox_id.clone(),
                            activity_type: ActivityType::Sent,
                            meta: serde_json::json!({ "to": to_email }),
                            created_at: now,
                        })
                        .await?;
                    self.advance_progress(
                        &lead.id,
                        &mut progress,
                        order,
                        recipient_index,
                        total,
                        to_email,
                        &step_doc.active_template_ref,
                        step_ref.next_message_day,
                        settings.min_wait_time,
                        now,
                    )
                    .await?;
                    outcome.sent += 1;
                }
                Err(err) => {
                    arbiter.rollback(&mailbox_id, now).await?;
                    self.store
                        .append_activity(shared::models::Activity {
                            id: None,
                            campaign_id: campaign_id.clone(),
                            lead_id: lead.id.clone(),
                            mailbox_id: mailbox_id.clone(),
                            activity_type: ActivityType::Error,
                            meta: serde_json::json!({ "error": err.to_string() }),
                            created_at: now,
                        })
                        .await?;
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn select_mailbox(
        &self,
        campaign_id: &Id,
        pool: &[Id],
        arbiter: &AccountArbiter<'_, S>,
        now: DateTime<Utc>,
    ) -> Result<Option<(Id, shared::models::MailboxCampaignSettings)>, WorkerError> {
        let attempts = self.cursor.with_pool(campaign_id, pool, |deque| deque.len());
        for _ in 0..attempts {
            let mailbox_id = self.cursor.with_pool(campaign_id, pool, |deque| {
                let front = deque.pop_front();
                if let Some(id) = &front {
                    deque.push_back(id.clone());
                }
                front
            });
            let Some(mailbox_id) = mailbox_id else {
                break;
            };
            let Some(settings) = self.store.get_mailbox_campaign_settings(&mailbox_id).await? else {
                continue;
            };
            if arbiter
                .reserve(&mailbox_id, now, settings.daily_limit, settings.min_wait_time)
                .await?
            {
                return Ok(Some((mailbox_id, settings)));
            }
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    async fn advance_progress(
        &self,
        lead_id: &Id,
        progress: &mut LeadProgress,
        order: i64,
        recipient_index: usize,
        total: usize,
        to_email: &str,
        template_ref: &Id,
        next_message_day: i64,
        min_wait_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        let key = format!("step_{order}_recipient_{recipient_index}");
        progress.processed_recipients.insert(
            key,
            ProcessedRecipient {
                processed_at: now,
                email: Some(to_email.to_string()),
                template_ref: template_ref.clone(),
            },
        );

        let prefix = format!("step_{order}_");
        let done_in_step = progress
            .processed_recipients
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .count();

        if done_in_step >= total {
            progress.current_step_order = order + 1;
            progress.last_sent_at = Some(now);
            progress.next_due_at = Some(now + Duration::days(next_message_day));
        } else {
            progress.last_sent_at = Some(now);
            progress.next_due_at = Some(now + Duration::minutes(min_wait_minutes));
        }

        self.store.update_lead_progress(lead_id, progress.clone()).await?;
        Ok(())
    }
}

/// Builds the placeholder context a lead's recipient data is rendered
/// against: the recipient's own fields, with sender-derived keys filled in
/// wherever the recipient didn't already supply them. Public so CLI
/// debugging tools can preview a rendered template without driving a full
/// worker tick.
pub fn build_render_context(
    recipient: &RecipientData,
    general: &shared::models::MailboxGeneralSettings,
    mailbox: &shared::models::Mailbox,
    campaign_id: &Id,
    step_order: i64,
) -> RecipientData {
    let mut context = recipient.clone();

    let sender_first_name = general.first_name.clone().unwrap_or_default();
    let sender_last_name = general.last_name.clone().unwrap_or_default();
    let sender_name = format!("{sender_first_name} {sender_last_name}").trim().to_string();

    context
        .entry("account_signature".to_string())
        .or_insert_with(|| general.signature.clone().unwrap_or_default());
    context
        .entry("sender_name".to_string())
        .or_insert(sender_name);
    context
        .entry("sender_first_name".to_string())
        .or_insert(sender_first_name);
    context
        .entry("sender_last_name".to_string())
        .or_insert(sender_last_name);
    context
        .entry("sender_email".to_string())
        .or_insert_with(|| mailbox.email.clone());
    context
        .entry("campaign_id".to_string())
        .or_insert_with(|| campaign_id.as_str().to_string());
    context
        .entry("step_order".to_string())
        .or_insert_with(|| step_order.to_string());

    context
}

#[cfg(test)]
mod tests {
    use shared::clock::FixedClock;
    use shared::models::{
        Campaign, CampaignOptions, CampaignStatus, Lead, Mailbox, MailboxCampaignSettings,
        MailboxGeneralSettings, MailboxStatus, Recipients, Sequence, SequenceStepDoc,
        SequenceStepRef, Template,
    };
    use shared::store::memory::MemoryStore;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    use super::*;

    struct RecordingTransport {
        sent: StdMutex<Vec<(String, String)>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
                fail_next: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl Transport for RecordingTransport {
        fn send(
            &self,
            _mailbox: &Mailbox,
            to_email: &str,
            subject: &str,
            _html: &str,
        ) -> Result<(), TransportError> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError::Send("simulated failure".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to_email.to_string(), subject.to_string()));
            Ok(())
        }
    }

    fn recipient(email: &str) -> RecipientData {
        let mut data = BTreeMap::new();
        data.insert("email".to_string(), email.to_string());
        data.insert("first_name".to_string(), "Ada".to_string());
        data
    }

    fn set_up(store: &MemoryStore) {
        let campaign_id = Id::from("campaign-1");
        let mailbox_id = Id::from("mailbox-1");
        let step_id = Id::from("step-1");
        let template_id = Id::from("template-1");

        store.insert_campaign(Campaign {
            id: campaign_id.clone(),
            status: CampaignStatus::Active,
        });
        store.insert_campaign_options(CampaignOptions {
            campaign_id: campaign_id.clone(),
            daily_email_limit: 10,
            mailbox_pool: vec![mailbox_id.clone()],
        });
        store.insert_sequence(Sequence {
            campaign_id: campaign_id.clone(),
            steps: vec![SequenceStepRef {
                order: 1,
                step_ref: step_id.clone(),
                next_message_day: 3,
            }],
        });
        store.insert_step(SequenceStepDoc {
            id: step_id,
            active_template_ref: template_id.clone(),
        });
        store.insert_template(Template {
            id: template_id,
            subject: "Hi {{first_name}}".to_string(),
            content: None,
            html: Some("Hello {{first_name}} from {{sender_name}}".to_string()),
        });
        store.insert_mailbox(Mailbox {
            id: mailbox_id.clone(),
            email: "sender@example.com".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_username: "sender@example.com".to_string(),
            smtp_password: "secret".to_string(),
            status: MailboxStatus::Active,
        });
        store.insert_mailbox_campaign_settings(MailboxCampaignSettings {
            mailbox_id: mailbox_id.clone(),
            daily_limit: 10,
            min_wait_time: 5,
        });
        store.insert_mailbox_general_settings(MailboxGeneralSettings {
            mailbox_id,
            signature: Some("The Acme Team".to_string()),
            first_name: Some("Grace".to_string()),
            last_name: Some("Hopper".to_string()),
        });
        store.insert_lead(Lead {
            id: Id::from("lead-1"),
            campaign_id,
            lead_data: Recipients::Single(recipient("lead@example.com")),
            progress: None,
        });
    }

    fn worker(store: Arc<MemoryStore>, transport: Arc<RecordingTransport>) -> Worker<MemoryStore, RecordingTransport> {
        let now = chrono::Utc::now();
        Worker::new(
            store,
            transport,
            Arc::new(FixedClock(now)),
            Arc::new(RoundRobinCursor::new()),
            "UTC".to_string(),
            30,
        )
    }

    #[tokio::test]
    async fn sends_and_advances_progress_on_success() {
        let store = Arc::new(MemoryStore::new());
        set_up(&store);
        let transport = Arc::new(RecordingTransport::new());
        let w = worker(store.clone(), transport.clone());

        let outcome = w.run_once(&Id::from("campaign-1"), 10, false).await.unwrap();
        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.due_leads, 1);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        let lead = store.get_lead(&Id::from("lead-1")).await.unwrap().unwrap();
        let progress = lead.progress.unwrap();
        assert_eq!(progress.current_step_order, 2);
        assert!(progress.last_sent_at.is_some());
    }

    #[tokio::test]
    async fn dry_run_advances_progress_without_sending() {
        let store = Arc::new(MemoryStore::new());
        set_up(&store);
        let transport = Arc::new(RecordingTransport::new());
        let w = worker(store.clone(), transport.clone());

        let outcome = w.run_once(&Id::from("campaign-1"), 10, true).await.unwrap();
        assert_eq!(outcome.sent, 0);
        assert!(transport.sent.lock().unwrap().is_empty());

        let lead = store.get_lead(&Id::from("lead-1")).await.unwrap().unwrap();
        let progress = lead.progress.unwrap();
        assert_eq!(progress.current_step_order, 2);
        assert!(!progress.processed_recipients.is_empty());

        let activities = store.activities();
        assert!(activities.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_rolls_back_and_leaves_lead_due() {
        let store = Arc::new(MemoryStore::new());
        set_up(&store);
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);
        let w = worker(store.clone(), transport.clone());

        let outcome = w.run_once(&Id::from("campaign-1"), 10, false).await.unwrap();
        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.skipped, 1);

        let lead = store.get_lead(&Id::from("lead-1")).await.unwrap().unwrap();
        assert!(lead.progress.is_none());

        let activities = store.activities();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, ActivityType::Error);
    }

    #[tokio::test]
    async fn missing_sequence_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let w = worker(store.clone(), transport.clone());
        let result = w.run_once(&Id::from("missing-campaign"), 10, false).await;
        assert!(result.is_err());
    }
}
