use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::id::Id;
use crate::models::{
    AccountRuntimeState, Activity, ActivityType, Campaign, CampaignOptions, CampaignSchedule,
    CampaignStatus, Lead, LeadProgress, Mailbox, MailboxCampaignSettings, MailboxGeneralSettings,
    MailboxStatus, ProcessedRecipient, RecipientData, Recipients, Sequence, SequenceStepDoc,
    SequenceStepRef, Template, Weekday,
};

use super::{ReservationAttempt, StoreError, StorePort};

/// MongoDB-backed persistence: a thin wrapper over a `Database` handle,
/// analogous to a connection-pool wrapper over a relational driver.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str, max_pool_size: u32) -> Result<Self, StoreError> {
        let mut options = mongodb::options::ClientOptions::parse(uri)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        options.max_pool_size = Some(max_pool_size);
        let client = Client::with_options(options).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            db: client.database(db_name),
        })
    }

    fn campaigns(&self) -> Collection<Document> {
        self.db.collection("campaigns")
    }
    fn campaign_options(&self) -> Collection<Document> {
        self.db.collection("campaign_options")
    }
    fn campaign_schedule(&self) -> Collection<Document> {
        self.db.collection("campaign_schedule")
    }
    fn campaign_queue_collection(&self) -> Collection<Document> {
        self.db.collection("campaign_queue")
    }
    fn campaign_sequences(&self) -> Collection<Document> {
        self.db.collection("campaign_sequences")
    }
    fn sequence_steps(&self) -> Collection<Document> {
        self.db.collection("sequence_steps")
    }
    fn templates(&self) -> Collection<Document> {
        self.db.collection("templates")
    }
    fn campaign_leads(&self) -> Collection<Document> {
        self.db.collection("campaign_leads")
    }
    fn campaign_activities(&self) -> Collection<Document> {
        self.db.collection("campaign_activities")
    }
    fn account_runtime_state(&self) -> Collection<Document> {
        self.db.collection("account_runtime_state")
    }
    fn email_accounts(&self) -> Collection<Document> {
        self.db.collection("email_accounts")
    }
    fn email_campaign_settings(&self) -> Collection<Document> {
        self.db.collection("email_campaign_settings")
    }
    fn email_general_settings(&self) -> Collection<Document> {
        self.db.collection("email_general_settings")
    }
}

fn object_id(id: &Id) -> Result<ObjectId, StoreError> {
    id.to_object_id()
        .map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn id_from_doc(doc: &Document) -> Result<Id, StoreError> {
    doc.get_object_id("_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("missing _id".to_string()))
}

/// Coerces whatever BSON scalar shows up for a dynamic recipient field into
/// its display string, per the "dynamic typing and schema drift" design
/// note: the store boundary is the one place this coercion happens.
fn bson_to_display_string(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => n.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::DateTime(dt) => dt.to_chrono().to_rfc3339(),
        Bson::Null => String::new(),
        other => other.to_string(),
    }
}

fn doc_to_recipient_data(doc: &Document) -> RecipientData {
    doc.iter()
        .map(|(k, v)| (k.clone(), bson_to_display_string(v)))
        .collect()
}

fn bson_to_recipients(value: &Bson) -> Result<Recipients, StoreError> {
    match value {
        Bson::Document(doc) => Ok(Recipients::Single(doc_to_recipient_data(doc))),
        Bson::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Bson::Document(doc) => out.push(doc_to_recipient_data(doc)),
                    other => {
                        return Err(StoreError::InvalidData(format!(
                            "unexpected recipient entry shape: {other:?}"
                        )))
                    }
                }
            }
            Ok(Recipients::Many(out))
        }
        other => Err(StoreError::InvalidData(format!(
            "unexpected lead_data shape: {other:?}"
        ))),
    }
}

fn recipient_data_to_doc(data: &RecipientData) -> Document {
    data.iter().map(|(k, v)| (k.clone(), Bson::String(v.clone()))).collect()
}

fn recipients_to_bson(recipients: &Recipients) -> Bson {
    match recipients {
        Recipients::Single(data) => Bson::Document(recipient_data_to_doc(data)),
        Recipients::Many(values) => Bson::Array(values.iter().map(recipient_data_to_doc).map(Bson::Document).collect()),
    }
}

fn bson_datetime(value: &Bson) -> Option<DateTime<Utc>> {
    value.as_datetime().map(|dt| dt.to_chrono())
}

fn doc_to_campaign(doc: &Document) -> Result<Campaign, StoreError> {
    let status = match doc.get_str("status").unwrap_or("paused") {
        "active" => CampaignStatus::Active,
        "archived" => CampaignStatus::Archived,
        _ => CampaignStatus::Paused,
    };
    Ok(Campaign {
        id: id_from_doc(doc)?,
        status,
    })
}

fn doc_to_campaign_options(doc: &Document) -> Result<CampaignOptions, StoreError> {
    let campaign_id = doc
        .get_object_id("campaign_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("campaign_options.campaign_id".to_string()))?;
    let mailbox_pool = doc
        .get_array("mailbox_pool")
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_object_id().map(Id::from_object_id))
                .collect()
        })
        .unwrap_or_default();
    Ok(CampaignOptions {
        campaign_id,
        daily_email_limit: doc.get_i64("daily_email_limit").unwrap_or(0),
        mailbox_pool,
    })
}

/// Dates in the schedule document may arrive as a BSON datetime or an ISO
/// string; a string is truncated at `T` before parsing.
fn doc_to_naive_date(doc: &Document, field: &str) -> Option<NaiveDate> {
    match doc.get(field) {
        Some(Bson::String(s)) => {
            let truncated = s.split('T').next().unwrap_or(s);
            NaiveDate::parse_from_str(truncated, "%Y-%m-%d").ok()
        }
        Some(Bson::DateTime(dt)) => Some(dt.to_chrono().date_naive()),
        _ => None,
    }
}

fn doc_to_campaign_schedule(doc: &Document) -> Result<CampaignSchedule, StoreError> {
    let campaign_id = doc
        .get_object_id("campaign_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("campaign_schedule.campaign_id".to_string()))?;
    let scheduled_days = doc.get_array("scheduled_days").ok().map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().and_then(Weekday::from_name))
            .collect()
    });
    Ok(CampaignSchedule {
        campaign_id,
        timezone: doc.get_str("timezone").unwrap_or("UTC").to_string(),
        scheduled_days,
        start_date: doc_to_naive_date(doc, "start_date"),
        end_date: doc_to_naive_date(doc, "end_date"),
        time_from: doc.get_str("time_from").ok().map(str::to_string),
        time_to: doc.get_str("time_to").ok().map(str::to_string),
    })
}

fn doc_to_sequence(doc: &Document) -> Result<Sequence, StoreError> {
    let campaign_id = doc
        .get_object_id("campaign_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("campaign_sequences.campaign_id".to_string()))?;
    let steps = doc
        .get_array("steps")
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_document())
                .map(|step| SequenceStepRef {
                    order: step.get_i64("order").unwrap_or(0),
                    step_ref: step
                        .get_object_id("step_ref")
                        .map(Id::from_object_id)
                        .unwrap_or_else(|_| Id::from("")),
                    next_message_day: step.get_i64("next_message_day").unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(Sequence { campaign_id, steps })
}

fn doc_to_step(doc: &Document) -> Result<SequenceStepDoc, StoreError> {
    Ok(SequenceStepDoc {
        id: id_from_doc(doc)?,
        active_template_ref: doc
            .get_object_id("active_template_ref")
            .map(Id::from_object_id)
            .map_err(|_| StoreError::InvalidData("sequence_steps.active_template_ref".to_string()))?,
    })
}

fn doc_to_template(doc: &Document) -> Result<Template, StoreError> {
    Ok(Template {
        id: id_from_doc(doc)?,
        subject: doc.get_str("subject").unwrap_or_default().to_string(),
        content: doc.get_str("content").ok().map(str::to_string),
        html: doc.get_str("html").ok().map(str::to_string),
    })
}

fn doc_to_processed_recipient(doc: &Document) -> Option<ProcessedRecipient> {
    Some(ProcessedRecipient {
        processed_at: bson_datetime(doc.get("processed_at")?)?,
        email: doc.get_str("email").ok().map(str::to_string),
        template_ref: doc
            .get_object_id("template_ref")
            .map(Id::from_object_id)
            .unwrap_or_else(|_| Id::from("")),
    })
}

fn doc_to_progress(doc: &Document) -> LeadProgress {
    let processed_recipients = doc
        .get_document("processed_recipients")
        .ok()
        .map(|inner| {
            inner
                .iter()
                .filter_map(|(k, v)| v.as_document().and_then(doc_to_processed_recipient).map(|p| (k.clone(), p)))
                .collect()
        })
        .unwrap_or_default();

    LeadProgress {
        current_step_order: doc.get_i64("current_step_order").unwrap_or(1),
        stopped: doc.get_bool("stopped").unwrap_or(false),
        last_sent_at: doc.get("last_sent_at").and_then(bson_datetime),
        next_due_at: doc.get("next_due_at").and_then(bson_datetime),
        processed_recipients,
        reason: doc.get_str("reason").ok().map(str::to_string),
    }
}

fn doc_to_lead(doc: &Document) -> Result<Lead, StoreError> {
    let campaign_id = doc
        .get_object_id("campaign_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("campaign_leads.campaign_id".to_string()))?;
    let lead_data = doc
        .get("lead_data")
        .map(bson_to_recipients)
        .transpose()?
        .unwrap_or(Recipients::Single(RecipientData::new()));
    let progress = doc.get_document("progress").ok().map(doc_to_progress);
    Ok(Lead {
        id: id_from_doc(doc)?,
        campaign_id,
        lead_data,
        progress,
    })
}

fn doc_to_mailbox(doc: &Document) -> Result<Mailbox, StoreError> {
    let status = match doc.get_str("status").unwrap_or("active") {
        "disabled" => MailboxStatus::Disabled,
        _ => MailboxStatus::Active,
    };
    Ok(Mailbox {
        id: id_from_doc(doc)?,
        email: doc.get_str("email").unwrap_or_default().to_string(),
        smtp_host: doc.get_str("smtp_host").unwrap_or_default().to_string(),
        smtp_port: doc.get_i32("smtp_port").unwrap_or(587) as u16,
        smtp_username: doc.get_str("smtp_username").unwrap_or_default().to_string(),
        smtp_password: doc.get_str("smtp_password").unwrap_or_default().to_string(),
        status,
    })
}

fn doc_to_mailbox_campaign_settings(doc: &Document) -> Result<MailboxCampaignSettings, StoreError> {
    let mailbox_id = doc
        .get_object_id("mailbox_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("email_campaign_settings.mailbox_id".to_string()))?;
    Ok(MailboxCampaignSettings {
        mailbox_id,
        daily_limit: doc.get_i64("daily_limit").unwrap_or(0),
        min_wait_time: doc.get_i64("min_wait_time").unwrap_or(0),
    })
}

fn doc_to_mailbox_general_settings(doc: &Document) -> Result<MailboxGeneralSettings, StoreError> {
    let mailbox_id = doc
        .get_object_id("mailbox_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("email_general_settings.mailbox_id".to_string()))?;
    Ok(MailboxGeneralSettings {
        mailbox_id,
        signature: doc.get_str("signature").ok().map(str::to_string),
        first_name: doc.get_str("first_name").ok().map(str::to_string),
        last_name: doc.get_str("last_name").ok().map(str::to_string),
    })
}

fn doc_to_runtime_state(doc: &Document) -> Result<AccountRuntimeState, StoreError> {
    let mailbox_id = doc
        .get_object_id("mailbox_id")
        .map(Id::from_object_id)
        .map_err(|_| StoreError::InvalidData("account_runtime_state.mailbox_id".to_string()))?;
    Ok(AccountRuntimeState {
        mailbox_id,
        date_key: doc.get_str("date_key").unwrap_or_default().to_string(),
        sent_count: doc.get_i64("sent_count").unwrap_or(0),
        next_available_at: doc
            .get("next_available_at")
            .and_then(bson_datetime)
            .unwrap_or_else(Utc::now),
        locked_until: doc.get("locked_until").and_then(bson_datetime),
    })
}

fn progress_to_doc(progress: &LeadProgress) -> Document {
    let mut processed = Document::new();
    for (key, value) in &progress.processed_recipients {
        let mut entry = doc! {
            "processed_at": Bson::DateTime(mongodb::bson::DateTime::from_chrono(value.processed_at)),
            "template_ref": object_id(&value.template_ref).unwrap_or_default(),
        };
        if let Some(email) = &value.email {
            entry.insert("email", email.clone());
        }
        processed.insert(key.clone(), entry);
    }

    doc! {
        "current_step_order": progress.current_step_order,
        "stopped": progress.stopped,
        "last_sent_at": progress.last_sent_at.map(mongodb::bson::DateTime::from_chrono),
        "next_due_at": progress.next_due_at.map(mongodb::bson::DateTime::from_chrono),
        "processed_recipients": processed,
        "reason": progress.reason.clone(),
    }
}

impl StorePort for MongoStore {
    async fn get_campaign(&self, campaign_id: &Id) -> Result<Option<Campaign>, StoreError> {
        let oid = object_id(campaign_id)?;
        let doc = self
            .campaigns()
            .find_one(doc! { "_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_campaign).transpose()
    }

    async fn get_campaign_options(&self, campaign_id: &Id) -> Result<Option<CampaignOptions>, StoreError> {
        let oid = object_id(campaign_id)?;
        let doc = self
            .campaign_options()
            .find_one(doc! { "campaign_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_campaign_options).transpose()
    }

    async fn get_campaign_schedule(&self, campaign_id: &Id) -> Result<Option<CampaignSchedule>, StoreError> {
        let oid = object_id(campaign_id)?;
        let doc = self
            .campaign_schedule()
            .find_one(doc! { "campaign_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_campaign_schedule).transpose()
    }

    async fn get_sequence(&self, campaign_id: &Id) -> Result<Option<Sequence>, StoreError> {
        let oid = object_id(campaign_id)?;
        let doc = self
            .campaign_sequences()
            .find_one(doc! { "campaign_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_sequence).transpose()
    }

    async fn get_sequence_step(&self, step_id: &Id) -> Result<Option<SequenceStepDoc>, StoreError> {
        let oid = object_id(step_id)?;
        let doc = self
            .sequence_steps()
            .find_one(doc! { "_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_step).transpose()
    }

    async fn get_template(&self, template_id: &Id) -> Result<Option<Template>, StoreError> {
        let oid = object_id(template_id)?;
        let doc = self
            .templates()
            .find_one(doc! { "_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_template).transpose()
    }

    async fn campaign_queue(&self) -> Result<Vec<Id>, StoreError> {
        use futures_util::TryStreamExt;
        let mut cursor = self
            .campaign_queue_collection()
            .find(doc! {})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut ids = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            if let Ok(oid) = doc.get_object_id("campaign_id") {
                ids.push(Id::from_object_id(oid));
            }
        }
        Ok(ids)
    }

    async fn get_due_leads(
        &self,
        campaign_id: &Id,
        now_utc: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Lead>, StoreError> {
        use futures_util::TryStreamExt;
        let oid = object_id(campaign_id)?;
        let now = mongodb::bson::DateTime::from_chrono(now_utc);
        let filter = doc! {
            "campaign_id": oid,
            "$or": [
                { "progress": { "$exists": false } },
                {
                    "progress.stopped": { "$ne": true },
                    "$or": [
                        { "progress.next_due_at": { "$lte": now } },
                        { "progress.last_sent_at": { "$exists": false } },
                    ],
                },
            ],
        };
        let options = mongodb::options::FindOptions::builder().limit(limit).build();
        let mut cursor = self
            .campaign_leads()
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut leads = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            leads.push(doc_to_lead(&doc)?);
        }
        Ok(leads)
    }

    async fn get_lead(&self, lead_id: &Id) -> Result<Option<Lead>, StoreError> {
        let oid = object_id(lead_id)?;
        let doc = self
            .campaign_leads()
            .find_one(doc! { "_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_lead).transpose()
    }

    async fn list_leads(&self, campaign_id: &Id) -> Result<Vec<Lead>, StoreError> {
        use futures_util::TryStreamExt;
        let oid = object_id(campaign_id)?;
        let mut cursor = self
            .campaign_leads()
            .find(doc! { "campaign_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut leads = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            leads.push(doc_to_lead(&doc)?);
        }
        Ok(leads)
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        use futures_util::TryStreamExt;
        let mut cursor = self
            .campaigns()
            .find(doc! {})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut campaigns = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            campaigns.push(doc_to_campaign(&doc)?);
        }
        Ok(campaigns)
    }

    async fn list_mailboxes(&self) -> Result<Vec<Mailbox>, StoreError> {
        use futures_util::TryStreamExt;
        let mut cursor = self
            .email_accounts()
            .find(doc! {})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut mailboxes = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            mailboxes.push(doc_to_mailbox(&doc)?);
        }
        Ok(mailboxes)
    }

    async fn get_mailbox(&self, mailbox_id: &Id) -> Result<Option<Mailbox>, StoreError> {
        let oid = object_id(mailbox_id)?;
        let doc = self
            .email_accounts()
            .find_one(doc! { "_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_mailbox).transpose()
    }

    async fn get_mailbox_campaign_settings(&self, mailbox_id: &Id) -> Result<Option<MailboxCampaignSettings>, StoreError> {
        let oid = object_id(mailbox_id)?;
        let doc = self
            .email_campaign_settings()
            .find_one(doc! { "mailbox_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_mailbox_campaign_settings).transpose()
    }

    async fn get_mailbox_general_settings(&self, mailbox_id: &Id) -> Result<Option<MailboxGeneralSettings>, StoreError> {
        let oid = object_id(mailbox_id)?;
        let doc = self
            .email_general_settings()
            .find_one(doc! { "mailbox_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_mailbox_general_settings).transpose()
    }

    async fn update_lead_progress(&self, lead_id: &Id, progress: LeadProgress) -> Result<(), StoreError> {
        let oid = object_id(lead_id)?;
        self.campaign_leads()
            .update_one(doc! { "_id": oid }, doc! { "$set": { "progress": progress_to_doc(&progress) } })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn reset_lead_progress(&self, lead_id: &Id) -> Result<(), StoreError> {
        let oid = object_id(lead_id)?;
        let current = self
            .campaign_leads()
            .find_one(doc! { "_id": oid })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::NotFound("lead"))?;
        let lead = doc_to_lead(&current)?;
        let reset_data = lead.lead_data.reset_contact_status();
        self.campaign_leads()
            .update_one(
                doc! { "_id": oid },
                doc! {
                    "$unset": { "progress": "" },
                    "$set": { "lead_data": recipients_to_bson(&reset_data) },
                },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn replace_lead_data(&self, lead_id: &Id, lead_data: Recipients) -> Result<(), StoreError> {
        let oid = object_id(lead_id)?;
        self.campaign_leads()
            .update_one(doc! { "_id": oid }, doc! { "$set": { "lead_data": recipients_to_bson(&lead_data) } })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn make_lead_due_now(&self, lead_id: &Id, now_utc: DateTime<Utc>) -> Result<(), StoreError> {
        let oid = object_id(lead_id)?;
        self.campaign_leads()
            .update_one(
                doc! { "_id": oid },
                doc! { "$set": { "progress.next_due_at": mongodb::bson::DateTime::from_chrono(now_utc) } },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn set_lead_stopped(&self, lead_id: &Id, stopped: bool, reason: Option<String>) -> Result<(), StoreError> {
        let oid = object_id(lead_id)?;
        self.campaign_leads()
            .update_one(
                doc! { "_id": oid },
                doc! { "$set": { "progress.stopped": stopped, "progress.reason": reason } },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn backfill_progress(&self, campaign_id: &Id) -> Result<u64, StoreError> {
        let oid = object_id(campaign_id)?;
        let result = self
            .campaign_leads()
            .update_many(
                doc! { "campaign_id": oid, "progress": { "$exists": false } },
                doc! { "$set": { "progress.current_step_order": 1, "progress.stopped": false, "progress.processed_recipients": {} } },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.modified_count)
    }

    async fn append_activity(&self, activity: Activity) -> Result<(), StoreError> {
        let activity_type = match activity.activity_type {
            ActivityType::Sent => "sent",
            ActivityType::Error => "error",
        };
        let doc = doc! {
            "campaign_id": object_id(&activity.campaign_id)?,
            "lead_id": object_id(&activity.lead_id)?,
            "mailbox_id": object_id(&activity.mailbox_id)?,
            "activity_type": activity_type,
            "meta": mongodb::bson::serialize_to_bson(&activity.meta).map_err(|e| StoreError::InvalidData(e.to_string()))?,
            "created_at": mongodb::bson::DateTime::from_chrono(activity.created_at),
        };
        self.campaign_activities()
            .insert_one(doc)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn count_sent_activities_since(&self, campaign_id: &Id, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let oid = object_id(campaign_id)?;
        let filter = doc! {
            "campaign_id": oid,
            "activity_type": "sent",
            "created_at": { "$gte": mongodb::bson::DateTime::from_chrono(since) },
        };
        self.campaign_activities()
            .count_documents(filter)
            .await
            .map(|n| n as i64)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn count_sent_activities_for_mailbox_in_range(
        &self,
        mailbox_id: &Id,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let oid = object_id(mailbox_id)?;
        let filter = doc! {
            "mailbox_id": oid,
            "activity_type": "sent",
            "created_at": {
                "$gte": mongodb::bson::DateTime::from_chrono(start),
                "$lt": mongodb::bson::DateTime::from_chrono(end),
            },
        };
        self.campaign_activities()
            .count_documents(filter)
            .await
            .map(|n| n as i64)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get_account_runtime_state(&self, mailbox_id: &Id, date_key: &str) -> Result<Option<AccountRuntimeState>, StoreError> {
        let oid = object_id(mailbox_id)?;
        let doc = self
            .account_runtime_state()
            .find_one(doc! { "mailbox_id": oid, "date_key": date_key })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        doc.as_ref().map(doc_to_runtime_state).transpose()
    }

    async fn list_account_runtime_states(&self) -> Result<Vec<AccountRuntimeState>, StoreError> {
        use futures_util::TryStreamExt;
        let mut cursor = self
            .account_runtime_state()
            .find(doc! {})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut states = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            states.push(doc_to_runtime_state(&doc)?);
        }
        Ok(states)
    }

    async fn try_reserve_account_runtime(
        &self,
        attempt: &ReservationAttempt,
    ) -> Result<Option<AccountRuntimeState>, StoreError> {
        let oid = object_id(&attempt.mailbox_id)?;
        let now = mongodb::bson::DateTime::from_chrono(attempt.now_utc);
        let filter = doc! {
            "mailbox_id": oid,
            "date_key": attempt.date_key.clone(),
            "sent_count": { "$lt": attempt.daily_limit },
            "$or": [
                { "locked_until": { "$exists": false } },
                { "locked_until": null },
                { "locked_until": { "$lte": now } },
            ],
            "$and": [
                {
                    "$or": [
                        { "next_available_at": { "$exists": false } },
                        { "next_available_at": { "$lte": now } },
                    ],
                },
            ],
        };
        let update = doc! {
            "$set": { "locked_until": mongodb::bson::DateTime::from_chrono(attempt.lock_until) },
            "$setOnInsert": {
                "mailbox_id": oid,
                "date_key": attempt.date_key.clone(),
                "sent_count": 0_i64,
                "next_available_at": mongodb::bson::DateTime::from_chrono(attempt.fresh_next_available_at),
            },
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let result = self
            .account_runtime_state()
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        result.as_ref().map(doc_to_runtime_state).transpose()
    }

    async fn commit_account_runtime(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        next_available_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let oid = object_id(mailbox_id)?;
        self.account_runtime_state()
            .update_one(
                doc! { "mailbox_id": oid, "date_key": date_key },
                doc! {
                    "$inc": { "sent_count": 1_i64 },
                    "$set": {
                        "next_available_at": mongodb::bson::DateTime::from_chrono(next_available_at),
                        "locked_until": Bson::Null,
                    },
                },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn rollback_account_runtime(&self, mailbox_id: &Id, date_key: &str) -> Result<(), StoreError> {
        let oid = object_id(mailbox_id)?;
        self.account_runtime_state()
            .update_one(
                doc! { "mailbox_id": oid, "date_key": date_key },
                doc! { "$set": { "locked_until": Bson::Null } },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn set_account_runtime_sent_count(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        sent_count: i64,
    ) -> Result<(), StoreError> {
        let oid = object_id(mailbox_id)?;
        self.account_runtime_state()
            .update_one(
                doc! { "mailbox_id": oid, "date_key": date_key },
                doc! { "$set": { "sent_count": sent_count } },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn fix_account_runtime_next_available_at(
        &self,
        mailbox_id: &Id,
        date_key: &str,
        next_available_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let oid = object_id(mailbox_id)?;
        self.account_runtime_state()
            .update_one(
                doc! { "mailbox_id": oid, "date_key": date_key },
                doc! { "$set": { "next_available_at": mongodb::bson::DateTime::from_chrono(next_available_at) } },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.campaigns()
            .create_index(IndexModel::builder().keys(doc! { "status": 1 }).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.campaign_options()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "campaign_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.campaign_schedule()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "campaign_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.campaign_sequences()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "campaign_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.sequence_steps()
            .create_index(IndexModel::builder().keys(doc! { "sequence_id": 1, "_id": 1 }).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.campaign_leads()
            .create_index(IndexModel::builder().keys(doc! { "campaign_id": 1 }).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.campaign_leads()
            .create_index(IndexModel::builder().keys(doc! { "lead_data.email": 1 }).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.campaign_leads()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "progress.stopped": 1, "progress.next_due_at": 1 })
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.campaign_activities()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "campaign_id": 1, "created_at": -1 })
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.campaign_activities()
            .create_index(IndexModel::builder().keys(doc! { "lead_id": 1, "created_at": -1 }).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.campaign_activities()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "mailbox_id": 1, "created_at": -1 })
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.account_runtime_state()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "mailbox_id": 1, "date_key": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}
