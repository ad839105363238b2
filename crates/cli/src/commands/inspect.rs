use chrono::Utc;
use shared::models::Lead;
use shared::renderer::render;
use shared::store::mongo::MongoStore;
use shared::store::StoreError;
use shared::store::StorePort;
use shared::Id;
use worker::build_render_context;

use super::CommandError;

fn first_email(lead: &Lead) -> String {
    lead.lead_data.get(0).and_then(|data| data.get("email").cloned()).unwrap_or_else(|| "unknown".to_string())
}

pub async fn list_accounts(store: &MongoStore) -> Result<(), CommandError> {
    let mailboxes = store.list_mailboxes().await?;
    if mailboxes.is_empty() {
        println!("No mailboxes found.");
        return Ok(());
    }
    for mailbox in mailboxes {
        println!("ID: {}, Email: {}, Status: {:?}", mailbox.id, mailbox.email, mailbox.status);
    }
    Ok(())
}

pub async fn list_campaigns(store: &MongoStore) -> Result<(), CommandError> {
    let campaigns = store.list_campaigns().await?;
    if campaigns.is_empty() {
        println!("No campaigns found.");
        return Ok(());
    }
    println!("Found {} campaign(s):", campaigns.len());
    println!();
    for campaign in campaigns {
        println!("  {}", campaign.id);
        println!("    Status: {:?}", campaign.status);
        println!();
    }
    Ok(())
}

pub async fn list_leads(store: &MongoStore, campaign: &str) -> Result<(), CommandError> {
    let leads = store.list_leads(&Id::from(campaign)).await?;
    if leads.is_empty() {
        println!("No leads found for campaign {campaign}.");
        return Ok(());
    }
    println!("Found {} lead(s) for campaign {campaign}:", leads.len());
    println!();
    for lead in leads {
        println!("  {}", lead.id);
        println!("    Email: {}", first_email(&lead));
        println!("    Recipients: {}", lead.lead_data.len());
        println!();
    }
    Ok(())
}

pub async fn show_due_leads(store: &MongoStore, campaign: &str, limit: i64) -> Result<(), CommandError> {
    let now_utc = Utc::now();
    let leads = store.get_due_leads(&Id::from(campaign), now_utc, limit).await?;
    if leads.is_empty() {
        println!("No leads are currently due for campaign {campaign}.");
        return Ok(());
    }
    println!("Found {} lead(s) due for processing:", leads.len());
    println!();
    for lead in leads {
        let progress = lead.progress.clone().unwrap_or_default();
        println!("Lead ID: {}", lead.id);
        println!("  Primary Email: {}", first_email(&lead));
        println!("  Recipients: {}", lead.lead_data.len());
        println!("  Current Step: {}", progress.current_step_order_or_default());
        match progress.next_due_at {
            Some(next_due) if next_due <= now_utc => {
                let overdue_minutes = (now_utc - next_due).num_minutes();
                println!("  Status: OVERDUE by {overdue_minutes} minute(s)");
            }
            Some(next_due) => {
                let due_minutes = (next_due - now_utc).num_minutes();
                println!("  Status: Due in {due_minutes} minute(s)");
            }
            None => println!("  Status: Ready to start"),
        }
        println!();
    }
    Ok(())
}

pub async fn show_lead_details(store: &MongoStore, lead: &str) -> Result<(), CommandError> {
    let lead_id = Id::from(lead);
    let lead = store.get_lead(&lead_id).await?.ok_or(StoreError::NotFound("lead"))?;

    println!("Lead ID: {}", lead.id);
    println!("Campaign ID: {}", lead.campaign_id);
    println!();

    println!("Lead Data:");
    for index in 0..lead.lead_data.len() {
        let Some(recipient) = lead.lead_data.get(index) else { continue };
        let email = recipient.get("email").map(String::as_str).unwrap_or("no email");
        let name = recipient.get("name").map(String::as_str).unwrap_or("no name");
        let status = recipient.get("status").map(String::as_str).unwrap_or("no status");
        println!("  [{index}] {email} - {name} - {status}");
    }
    println!();

    println!("Progress:");
    let progress = lead.progress.unwrap_or_default();
    println!("  Current step: {}", progress.current_step_order_or_default());
    match progress.last_sent_at {
        Some(at) => println!("  Last sent: {}", at.to_rfc3339()),
        None => println!("  Last sent: never"),
    }
    match progress.next_due_at {
        Some(at) => {
            println!("  Next due: {}", at.to_rfc3339());
            let now_utc = Utc::now();
            let is_due = at <= now_utc;
            println!("  Is due now: {is_due}");
            if !is_due {
                println!("  Time until due: {} minute(s)", (at - now_utc).num_minutes());
            }
        }
        None => println!("  Next due: not set"),
    }
    println!("  Stopped: {}", progress.stopped);
    Ok(())
}

pub async fn check_runtime_states(store: &MongoStore) -> Result<(), CommandError> {
    let now_utc = Utc::now();
    let states = store.list_account_runtime_states().await?;
    if states.is_empty() {
        println!("No runtime states found.");
        return Ok(());
    }
    println!("Found {} runtime state record(s):", states.len());
    for state in states {
        let mailbox = store.get_mailbox(&state.mailbox_id).await?;
        let email = mailbox.map(|m| m.email).unwrap_or_else(|| "unknown".to_string());
        let settings = store.get_mailbox_campaign_settings(&state.mailbox_id).await?;
        let daily_limit = settings.map(|s| s.daily_limit).unwrap_or(0);

        let mut status = if state.next_available_at <= now_utc { "AVAILABLE" } else { "WAITING" };
        if let Some(locked_until) = state.locked_until {
            if locked_until > now_utc {
                status = "LOCKED";
            }
        }

        println!("  {email} ({}): {status}", state.mailbox_id);
        println!("    Daily limit: {daily_limit}, Sent today: {}", state.sent_count);
        println!("    Next available: {}", state.next_available_at.to_rfc3339());
        if let Some(locked_until) = state.locked_until {
            println!("    Locked until: {}", locked_until.to_rfc3339());
        }
        println!();
    }
    Ok(())
}

pub async fn debug_template(store: &MongoStore, campaign: &str, lead: Option<&str>) -> Result<(), CommandError> {
    let campaign_id = Id::from(campaign);
    let now_utc = Utc::now();

    let lead = match lead {
        Some(lead_id) => store.get_lead(&Id::from(lead_id)).await?,
        None => store.get_due_leads(&campaign_id, now_utc, 1).await?.into_iter().next(),
    };
    let Some(lead) = lead else {
        println!("No leads found for campaign {campaign}.");
        return Ok(());
    };

    println!("Lead ID: {}", lead.id);
    let Some(recipient) = lead.lead_data.get(0) else {
        println!("Lead has no recipients.");
        return Ok(());
    };
    println!("Available lead fields: {:?}", recipient.keys().collect::<Vec<_>>());

    let Some(sequence) = store.get_sequence(&campaign_id).await? else {
        println!("No sequence found.");
        return Ok(());
    };
    let order = lead.progress.as_ref().map(|p| p.current_step_order_or_default()).unwrap_or(1);
    let Some(step_ref) = sequence.step_at(order) else {
        println!("No step found for order {order}.");
        return Ok(());
    };
    let Some(step_doc) = store.get_sequence_step(&step_ref.step_ref).await? else {
        println!("Step document not found.");
        return Ok(());
    };
    let Some(template) = store.get_template(&step_doc.active_template_ref).await? else {
        println!("Template not found.");
        return Ok(());
    };

    println!("Template ID: {}", template.id);
    println!("Template subject: {}", template.subject);
    println!("Template body preview: {}", preview(template.body_source()));

    let options = store.get_campaign_options(&campaign_id).await?;
    let first_mailbox_id = options.as_ref().and_then(|o| o.mailbox_pool.first().cloned());
    let context = match first_mailbox_id {
        Some(mailbox_id) => {
            let mailbox = store.get_mailbox(&mailbox_id).await?;
            let general = store.get_mailbox_general_settings(&mailbox_id).await?.unwrap_or_default();
            match mailbox {
                Some(mailbox) => build_render_context(recipient, &general, &mailbox, &campaign_id, order),
                None => recipient.clone(),
            }
        }
        None => recipient.clone(),
    };

    let (subject, body) = render(&template.subject, template.body_source(), &context);
    println!();
    println!("Rendered subject: {subject}");
    println!("Rendered body preview: {}", preview(&body));
    Ok(())
}

fn preview(text: &str) -> String {
    let truncated: String = text.chars().take(200).collect();
    if text.chars().count() > 200 {
        format!("{truncated}...")
    } else {
        truncated
    }
}
