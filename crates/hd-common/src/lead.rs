use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Lead lifecycle. `Failed` is reserved for operator action; the scheduler
/// and worker only ever move a lead from `Active` to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Active,
    Completed,
    Failed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Active => "active",
            LeadStatus::Completed => "completed",
            LeadStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(LeadStatus::Active),
            "completed" => Some(LeadStatus::Completed),
            "failed" => Some(LeadStatus::Failed),
            _ => None,
        }
    }
}

/// Validated lead fields as handed over by the admission front-end.
#[derive(Debug, Clone)]
pub struct LeadDraft {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub notes: Option<String>,
    pub max_messages: u32,
}

/// One row in the lead store.
#[derive(Debug, Clone)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub notes: Option<String>,
    /// Total messages this lead will receive. Immutable after admission.
    pub max_messages: u32,
    /// Messages durably advanced so far. Monotonic, never exceeds `max_messages`.
    pub message_count: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub next_scheduled_for: Option<NaiveDate>,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Build the row for a freshly admitted lead with a new opaque id.
    pub fn admitted(draft: &LeadDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: new_lead_id(),
            name: draft.name.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            notes: draft.notes.clone(),
            max_messages: draft.max_messages,
            message_count: 0,
            last_sent_at: None,
            next_scheduled_for: None,
            status: LeadStatus::Active,
            created_at: now,
        }
    }
}

/// Lead ids are ULIDs: opaque, unique, time-ordered, 26 chars.
pub fn new_lead_id() -> String {
    Ulid::new().to_string()
}

/// Queue entry payload. Field names are fixed wire contract; `scheduled_date`
/// must equal the date of the queue the entry lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DripMessage {
    pub lead_id: String,
    pub email: String,
    pub message_number: u32,
    pub scheduled_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_draft() -> LeadDraft {
        LeadDraft {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "0123456789".into(),
            notes: None,
            max_messages: 5,
        }
    }

    #[test]
    fn admitted_lead_starts_active_with_zero_count() {
        let now = Utc::now();
        let lead = Lead::admitted(&sample_draft(), now);

        assert_eq!(lead.status, LeadStatus::Active);
        assert_eq!(lead.message_count, 0);
        assert_eq!(lead.max_messages, 5);
        assert!(lead.last_sent_at.is_none());
        assert!(lead.next_scheduled_for.is_none());
        assert_eq!(lead.created_at, now);
        assert_eq!(lead.id.len(), 26);
    }

    #[test]
    fn lead_ids_are_unique() {
        assert_ne!(new_lead_id(), new_lead_id());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [LeadStatus::Active, LeadStatus::Completed, LeadStatus::Failed] {
            assert_eq!(LeadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LeadStatus::parse("broken"), None);
    }

    #[test]
    fn drip_message_uses_camel_case_wire_names() {
        let message = DripMessage {
            lead_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
            email: "ada@example.com".into(),
            message_number: 3,
            scheduled_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "leadId": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
                "email": "ada@example.com",
                "messageNumber": 3,
                "scheduledDate": "2025-01-15",
            })
        );

        let parsed: DripMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, message);
    }
}
