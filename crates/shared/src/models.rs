use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Archived,
}

impl CampaignStatus {
    pub fn is_active(self) -> bool {
        matches!(self, CampaignStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    pub id: Id,
    pub status: CampaignStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignOptions {
    pub campaign_id: Id,
    pub daily_email_limit: i64,
    pub mailbox_pool: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn name(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "monday" => Some(Weekday::Monday),
            "tuesday" => Some(Weekday::Tuesday),
            "wednesday" => Some(Weekday::Wednesday),
            "thursday" => Some(Weekday::Thursday),
            "friday" => Some(Weekday::Friday),
            "saturday" => Some(Weekday::Saturday),
            "sunday" => Some(Weekday::Sunday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignSchedule {
    pub campaign_id: Id,
    pub timezone: String,
    pub scheduled_days: Option<Vec<Weekday>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub time_from: Option<String>,
    pub time_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStepRef {
    pub order: i64,
    pub step_ref: Id,
    pub next_message_day: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub campaign_id: Id,
    pub steps: Vec<SequenceStepRef>,
}

impl Sequence {
    pub fn step_at(&self, order: i64) -> Option<&SequenceStepRef> {
        self.steps.iter().find(|step| step.order == order)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStepDoc {
    pub id: Id,
    pub active_template_ref: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: Id,
    pub subject: String,
    pub content: Option<String>,
    pub html: Option<String>,
}

impl Template {
    /// Worker prefers the HTML body, falling back to the plain-text one.
    pub fn body_source(&self) -> &str {
        self.html
            .as_deref()
            .or(self.content.as_deref())
            .unwrap_or("")
    }
}

pub type RecipientData = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    Single(RecipientData),
    Many(Vec<RecipientData>),
}

impl Recipients {
    pub fn len(&self) -> usize {
        match self {
            Recipients::Single(_) => 1,
            Recipients::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&RecipientData> {
        match self {
            Recipients::Single(data) => (index == 0).then_some(data),
            Recipients::Many(values) => values.get(index),
        }
    }

    fn map_entries<F: FnMut(&mut RecipientData)>(&self, mut f: F) -> Recipients {
        match self {
            Recipients::Single(data) => {
                let mut data = data.clone();
                f(&mut data);
                Recipients::Single(data)
            }
            Recipients::Many(values) => {
                let mut values = values.clone();
                for entry in values.iter_mut() {
                    f(entry);
                }
                Recipients::Many(values)
            }
        }
    }

    /// Clears recipient-level contact tracking fields and resets status to
    /// `not_contacted`, mirroring `reset-lead-progress`'s recipient reset.
    pub fn reset_contact_status(&self) -> Recipients {
        self.map_entries(|entry| {
            entry.insert("status".to_string(), "not_contacted".to_string());
            entry.remove("last_contacted_at");
            entry.remove("last_step");
        })
    }

    /// Marks recipients that `progress.processed_recipients` shows as sent
    /// but whose status still reads `not_contacted`. Returns the updated
    /// recipients and how many entries were touched. A single-recipient
    /// lead is left untouched: `update-lead-statuses` only syncs leads
    /// whose `lead_data` is a list of recipients.
    pub fn mark_contacted_from_progress(&self, progress: &LeadProgress) -> (Recipients, usize) {
        let Recipients::Many(values) = self else {
            return (self.clone(), 0);
        };

        let mut touched = 0usize;
        let last_step_for = |index: usize| -> Option<(i64, DateTime<Utc>)> {
            let suffix = format!("_recipient_{index}");
            progress
                .processed_recipients
                .iter()
                .filter(|(key, _)| key.ends_with(&suffix))
                .filter_map(|(key, info)| {
                    key.strip_prefix("step_")
                        .and_then(|rest| rest.split('_').next())
                        .and_then(|n| n.parse::<i64>().ok())
                        .map(|step| (step, info.processed_at))
                })
                .max_by_key(|(step, _)| *step)
        };

        let mut updated = values.clone();
        for (index, entry) in updated.iter_mut().enumerate() {
            let Some((last_step, processed_at)) = last_step_for(index) else {
                continue;
            };
            let current_status = entry.get("status").map(String::as_str).unwrap_or("not_contacted");
            if current_status == "not_contacted" {
                entry.insert("status".to_string(), "contacted".to_string());
                entry.insert("last_contacted_at".to_string(), processed_at.to_rfc3339());
                entry.insert("last_step".to_string(), last_step.to_string());
                touched += 1;
            }
        }
        (Recipients::Many(updated), touched)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecipient {
    pub processed_at: DateTime<Utc>,
    pub email: Option<String>,
    pub template_ref: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeadProgress {
    pub current_step_order: i64,
    pub stopped: bool,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub processed_recipients: BTreeMap<String, ProcessedRecipient>,
    pub reason: Option<String>,
}

impl LeadProgress {
    pub fn current_step_order_or_default(&self) -> i64 {
        if self.current_step_order <= 0 {
            1
        } else {
            self.current_step_order
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    pub id: Id,
    pub campaign_id: Id,
    pub lead_data: Recipients,
    pub progress: Option<LeadProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub id: Id,
    pub email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub status: MailboxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxCampaignSettings {
    pub mailbox_id: Id,
    pub daily_limit: i64,
    pub min_wait_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailboxGeneralSettings {
    pub mailbox_id: Id,
    pub signature: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRuntimeState {
    pub mailbox_id: Id,
    pub date_key: String,
    pub sent_count: i64,
    pub next_available_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Sent,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub id: Option<Id>,
    pub campaign_id: Id,
    pub lead_id: Id,
    pub mailbox_id: Id,
    pub activity_type: ActivityType,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(email: &str) -> RecipientData {
        let mut data = RecipientData::new();
        data.insert("email".to_string(), email.to_string());
        data
    }

    #[test]
    fn reset_contact_status_clears_tracking_fields() {
        let mut contacted = recipient("a@example.com");
        contacted.insert("status".to_string(), "contacted".to_string());
        contacted.insert("last_contacted_at".to_string(), "2026-01-01T00:00:00Z".to_string());
        contacted.insert("last_step".to_string(), "2".to_string());
        let recipients = Recipients::Many(vec![contacted]);

        let reset = recipients.reset_contact_status();
        let entry = reset.get(0).unwrap();
        assert_eq!(entry.get("status").map(String::as_str), Some("not_contacted"));
        assert!(!entry.contains_key("last_contacted_at"));
        assert!(!entry.contains_key("last_step"));
    }

    #[test]
    fn mark_contacted_from_progress_updates_processed_recipients_only() {
        let recipients = Recipients::Many(vec![recipient("a@example.com"), recipient("b@example.com")]);
        let mut progress = LeadProgress::default();
        progress.processed_recipients.insert(
            "step_1_recipient_0".to_string(),
            ProcessedRecipient {
                processed_at: Utc::now(),
                email: Some("a@example.com".to_string()),
                template_ref: Id::from("template-1"),
            },
        );

        let (updated, touched) = recipients.mark_contacted_from_progress(&progress);
        assert_eq!(touched, 1);
        assert_eq!(updated.get(0).unwrap().get("status").map(String::as_str), Some("contacted"));
        assert_eq!(updated.get(1).unwrap().get("status").map(String::as_str), None);
    }

    #[test]
    fn mark_contacted_from_progress_is_idempotent() {
        let mut already_contacted = recipient("a@example.com");
        already_contacted.insert("status".to_string(), "contacted".to_string());
        let recipients = Recipients::Many(vec![already_contacted]);
        let mut progress = LeadProgress::default();
        progress.processed_recipients.insert(
            "step_1_recipient_0".to_string(),
            ProcessedRecipient {
                processed_at: Utc::now(),
                email: Some("a@example.com".to_string()),
                template_ref: Id::from("template-1"),
            },
        );

        let (_updated, touched) = recipients.mark_contacted_from_progress(&progress);
        assert_eq!(touched, 0);
    }

    #[test]
    fn mark_contacted_from_progress_skips_single_recipient_leads() {
        let recipients = Recipients::Single(recipient("a@example.com"));
        let mut progress = LeadProgress::default();
        progress.processed_recipients.insert(
            "step_1_recipient_0".to_string(),
            ProcessedRecipient {
                processed_at: Utc::now(),
                email: Some("a@example.com".to_string()),
                template_ref: Id::from("template-1"),
            },
        );

        let (updated, touched) = recipients.mark_contacted_from_progress(&progress);
        assert_eq!(touched, 0);
        assert_eq!(updated.get(0).unwrap().get("status").map(String::as_str), None);
    }
}
