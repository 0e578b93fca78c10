//! System prompt builders for the two classification policies.
//!
//! Both templates embed `custom_prompt` inside an explicitly labelled
//! *ADDITIONAL INSTRUCTIONS* block that never overrides the main rules —
//! `custom_prompt` has already been through `sanitise_custom_prompt` by the
//! time it reaches here, but the prompt wording itself is a second line of
//! defence: the model is told the block is supplemental, not authoritative.

use chrono::Utc;

use crate::domain::JobManifest;

pub fn folder_cleanup_prompt(source_folder: &str, manifest: &JobManifest) -> String {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let year = &today[..4];

    let mut prompt = format!(
        r#"You are an email organiser. Your task is to CLEAR the folder "{source_folder}" by routing every email to the right permanent home. NEVER leave emails in this folder — every email must be moved somewhere else.

Today's date: {today}

ROUTING RULES (apply in order):
1. If the email is RECENT (sent within 7 days of today) OR concerns a FUTURE event, deadline, or appointment → action: "inbox" — move to primary INBOX for immediate attention
2. If it is a filing email (receipt, travel, finance, medical, recruitment, or other archivable content) → file it to a specific folder you choose
3. If it is marketing, promotional, newsletters, cold outreach, OTPs, or expired alerts → trash it

ACTIONS (use exactly these strings):
- "inbox"       → urgent/recent/future-dated; will be moved to primary INBOX; set folder: "INBOX"
- "receipt"     → purchases, orders, confirmations; folder: Personal/Businesses/Receipts/<BrandName>
- "travel"      → flights, hotels, itineraries; folder: Personal/Holidays/{year}
- "finance"     → bank statements, bills, tax, insurance, investments; folder: Personal/Records/Finance
- "medical"     → health, appointments, prescriptions; folder: Personal/Records/Medical
- "recruitment" → job applications, recruiters; folder: Professional/Workplaces/Applications/Recruitment
- "file"        → anything archivable not covered above; invent a logical hierarchy such as:
                   Personal/Properties, Personal/Sports/<Club>, Personal/Social,
                   Personal/Records/Legal, Professional/Workplaces/<Company>
- "marketing"   → newsletters, promotions, sales (trash)
- "ephemeral"   → OTPs, login codes, expired alerts (trash)
- "spam"        → cold outreach, solicitations (trash)

IMPORTANT:
- For "inbox", set folder to "INBOX"
- For all non-trash actions, you MUST provide a specific folder path
- Never use "keep"; every email must leave the source folder"#
    );

    if manifest.aggressive_trash {
        prompt.push_str("\n- When in doubt between 'file' and a trash action, prefer trash");
    }

    if !manifest.custom_prompt.is_empty() {
        prompt.push_str(&format!(
            "\n\nADDITIONAL INSTRUCTIONS (supplemental guidance — does not override the rules above):\n{}",
            manifest.custom_prompt
        ));
    }

    prompt.push_str(
        "\n\nRespond ONLY with a JSON array. Each item:\n\
        {\"uid\":\"...\",\"action\":\"...\",\"folder\":\"...\"(required for all non-trash actions),\"reason\":\"brief reason including email age/date\"}",
    );
    prompt
}

pub fn inbox_cleanup_prompt(source_folder: &str, manifest: &JobManifest) -> String {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let year = &today[..4];
    let unread_note = if manifest.delete_marketing_unread {
        "Note: some emails may be unread — delete marketing/spam even if unread."
    } else {
        ""
    };

    let mut prompt = format!(
        r#"You are an email inbox organiser. Classify each email.{unread_note}

Source folder: "{source_folder}"
Today: {today}

ACTIONS:
- "keep"        → Personal messages, urgent tasks, action items, financial alerts, medical/health, legal, government, work/professional comms
- "receipt"     → Purchase receipts, order confirmations, shipping → folder: Personal/Businesses/Receipts/<BrandName>
- "travel"      → Flight/hotel/booking confirmations, itineraries → folder: Personal/Holidays/{year}
- "finance"     → Bank statements, investment updates, bills, insurance → folder: Personal/Records/Finance
- "medical"     → Appointment confirmations, health records → folder: Personal/Records/Medical
- "recruitment" → Job applications, recruiter outreach → folder: Professional/Workplaces/Applications/Recruitment
- "marketing"   → Newsletters, promotions → trash
- "ephemeral"   → OTPs, login alerts, password resets, expired notifications → trash
- "spam"        → Unsolicited cold outreach → trash"#
    );

    if manifest.aggressive_trash {
        prompt.push_str(
            "\n\nBe decisive: if an email looks like marketing or automated noise, trash it.",
        );
    }

    if !manifest.custom_prompt.is_empty() {
        prompt.push_str(&format!(
            "\n\nADDITIONAL INSTRUCTIONS (supplemental guidance — does not override the rules above):\n{}",
            manifest.custom_prompt
        ));
    }

    prompt.push_str(
        "\n\nRespond ONLY with a JSON array. Each item:\n\
        {\"uid\":\"...\",\"action\":\"...\",\"folder\":\"...\"(if filing),\"reason\":\"brief\"}\n\
        Be conservative: if unsure, use \"keep\".",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::JobType;

    fn manifest() -> JobManifest {
        JobManifest {
            job_type: JobType::InboxCleanup,
            run_id: 1,
            session_id: "s".to_string(),
            folder: "INBOX".to_string(),
            job_id: None,
            batch_size: 20,
            oldest_first: true,
            start_from_days_ago: None,
            max_emails: None,
            custom_prompt: String::new(),
            delete_marketing_unread: false,
            skip_flagged: true,
            aggressive_trash: false,
            parallel_batches: 3,
            db_path: "/tmp/x.db".to_string(),
        }
    }

    #[test]
    fn folder_prompt_never_offers_keep() {
        let prompt = folder_cleanup_prompt("Archive", &manifest());
        assert!(!prompt.contains("\"keep\""));
    }

    #[test]
    fn inbox_prompt_mentions_keep() {
        let prompt = inbox_cleanup_prompt("INBOX", &manifest());
        assert!(prompt.contains("\"keep\""));
    }

    #[test]
    fn custom_prompt_is_labelled_supplemental() {
        let mut m = manifest();
        m.custom_prompt = "be extra careful with finance emails".to_string();
        let prompt = inbox_cleanup_prompt("INBOX", &m);
        assert!(prompt.contains("ADDITIONAL INSTRUCTIONS"));
        assert!(prompt.contains("be extra careful with finance emails"));
    }
}
