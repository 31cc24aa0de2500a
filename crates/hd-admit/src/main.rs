use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use hd_common::clock::{Clock, SystemClock};
use hd_common::config::DripConfig;
use hd_common::db::{create_pool_from_url_checked, run_migrations};
use hd_common::lead::LeadDraft;
use hd_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use hd_common::queue::PgQueue;
use hd_common::scheduler::schedule_lead;
use hd_common::store::{LeadStore, PgLeadStore, StoreError};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "hd-admit", about = "Admit a lead and schedule its drip campaign")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    db_url: String,

    /// Lead name
    #[arg(long)]
    name: String,

    /// Lead email (unique)
    #[arg(long)]
    email: String,

    /// Lead phone (unique)
    #[arg(long)]
    phone: String,

    /// Free-form notes carried through
    #[arg(long)]
    notes: Option<String>,

    /// Number of drip messages to schedule
    #[arg(long, default_value_t = 5)]
    max_messages: u32,

    /// Validate the draft and exit without touching the database
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

/// Front-end validation. The scheduler itself assumes a validated,
/// persisted lead; this is where that assumption is earned.
fn validate_draft(draft: &LeadDraft) -> Result<(), String> {
    if draft.name.trim().is_empty() {
        return Err("name must not be empty".into());
    }

    let email = draft.email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(format!("email {email:?} is missing '@'"));
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || email.contains(' ') {
        return Err(format!("email {email:?} is not well-formed"));
    }

    let digits: String = draft
        .phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    if digits.len() < 10 {
        return Err("phone must be at least 10 characters".into());
    }

    if draft.max_messages == 0 {
        return Err("max-messages must be positive".into());
    }

    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let args = Cli::parse();
    let config = DripConfig::from_env();

    let draft = LeadDraft {
        name: args.name,
        email: args.email,
        phone: args.phone,
        notes: args.notes,
        max_messages: args.max_messages,
    };
    validate_draft(&draft)?;

    if args.dry_run {
        info!(email = %draft.email, max_messages = draft.max_messages, "dry-run: draft is valid");
        return Ok(());
    }

    let pool = create_pool_from_url_checked(&args.db_url).await?;
    run_migrations(&pool).await?;

    let clock = SystemClock;
    let store = PgLeadStore::new(pool.clone());
    let queue = Arc::new(PgQueue::new(pool));

    let lead = match store.create(&draft, clock.now()).await {
        Ok(lead) => lead,
        Err(StoreError::DuplicateKey(detail)) => {
            return Err(format!("lead already exists: {detail}").into());
        }
        Err(err) => return Err(err.into()),
    };

    let planned = schedule_lead(queue.as_ref(), &store, &config, &clock, &lead).await?;
    let enqueued = planned.iter().filter(|entry| entry.msg_id.is_some()).count();

    info!(
        lead_id = %lead.id,
        email = %lead.email,
        enqueued,
        of = planned.len(),
        first_day = %planned.first().map(|p| p.day.to_string()).unwrap_or_default(),
        last_day = %planned.last().map(|p| p.day.to_string()).unwrap_or_default(),
        "lead admitted and scheduled"
    );

    println!("{}", lead.id);
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("hd-admit failed: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, email: &str, phone: &str, max_messages: u32) -> LeadDraft {
        LeadDraft {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
            notes: None,
            max_messages,
        }
    }

    #[test]
    fn accepts_a_reasonable_draft() {
        assert!(validate_draft(&draft("Ada", "ada@example.com", "0123456789", 5)).is_ok());
        assert!(validate_draft(&draft("Ada", "ada@example.com", "+44 (0)20-7946-0958", 1)).is_ok());
    }

    #[test]
    fn rejects_blank_names() {
        assert!(validate_draft(&draft("   ", "ada@example.com", "0123456789", 5)).is_err());
    }

    #[test]
    fn rejects_malformed_emails() {
        for email in ["ada", "@example.com", "ada@", "ada@nodot", "a da@example.com"] {
            assert!(
                validate_draft(&draft("Ada", email, "0123456789", 5)).is_err(),
                "{email} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_short_phones() {
        assert!(validate_draft(&draft("Ada", "ada@example.com", "12345", 5)).is_err());
        assert!(validate_draft(&draft("Ada", "ada@example.com", "1-2-3-4-5", 5)).is_err());
    }

    #[test]
    fn rejects_zero_message_campaigns() {
        assert!(validate_draft(&draft("Ada", "ada@example.com", "0123456789", 0)).is_err());
    }
}
