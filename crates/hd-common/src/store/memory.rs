use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::lead::{Lead, LeadDraft, LeadStatus};
use crate::store::{LeadAdvance, LeadStore, StoreError};

/// In-memory lead store with the same uniqueness and compare-and-set
/// semantics as [`super::PgLeadStore`].
#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: Mutex<HashMap<String, Lead>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct insert bypassing uniqueness checks. Test hook for seeding
    /// leads in specific states.
    pub async fn insert_raw(&self, lead: Lead) {
        self.leads.lock().await.insert(lead.id.clone(), lead);
    }

    /// Remove a lead outright, as an operator might. Test hook.
    pub async fn delete(&self, id: &str) {
        self.leads.lock().await.remove(id);
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn create(&self, draft: &LeadDraft, now: DateTime<Utc>) -> Result<Lead, StoreError> {
        let mut leads = self.leads.lock().await;

        if leads.values().any(|lead| lead.email == draft.email) {
            return Err(StoreError::DuplicateKey(format!(
                "email {} already exists",
                draft.email
            )));
        }
        if leads.values().any(|lead| lead.phone == draft.phone) {
            return Err(StoreError::DuplicateKey(format!(
                "phone {} already exists",
                draft.phone
            )));
        }

        let lead = Lead::admitted(draft, now);
        leads.insert(lead.id.clone(), lead.clone());
        Ok(lead)
    }

    async fn get(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        Ok(self.leads.lock().await.get(id).cloned())
    }

    async fn advance(
        &self,
        id: &str,
        expected_count: u32,
        patch: &LeadAdvance,
    ) -> Result<bool, StoreError> {
        let mut leads = self.leads.lock().await;
        let Some(lead) = leads.get_mut(id) else {
            return Ok(false);
        };

        if lead.status != LeadStatus::Active || lead.message_count != expected_count {
            return Ok(false);
        }

        lead.message_count = patch.message_count;
        lead.last_sent_at = Some(patch.last_sent_at);
        lead.next_scheduled_for = patch.next_scheduled_for;
        lead.status = patch.status;
        Ok(true)
    }

    async fn set_next_scheduled(&self, id: &str, day: NaiveDate) -> Result<(), StoreError> {
        let mut leads = self.leads.lock().await;
        if let Some(lead) = leads.get_mut(id) {
            lead.next_scheduled_for = Some(day);
        }
        Ok(())
    }

    async fn sent_count_on(&self, day: NaiveDate) -> Result<u64, StoreError> {
        let leads = self.leads.lock().await;
        let count = leads
            .values()
            .filter(|lead| {
                lead.last_sent_at
                    .map(|sent| sent.date_naive() == day)
                    .unwrap_or(false)
            })
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(email: &str, phone: &str) -> LeadDraft {
        LeadDraft {
            name: "Ada Lovelace".into(),
            email: email.into(),
            phone: phone.into(),
            notes: Some("via landing page".into()),
            max_messages: 3,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn create_enforces_unique_email_and_phone() {
        let store = InMemoryLeadStore::new();
        store
            .create(&draft("ada@example.com", "0123456789"), now())
            .await
            .unwrap();

        let email_clash = store
            .create(&draft("ada@example.com", "9876543210"), now())
            .await
            .unwrap_err();
        assert!(matches!(email_clash, StoreError::DuplicateKey(_)));

        let phone_clash = store
            .create(&draft("other@example.com", "0123456789"), now())
            .await
            .unwrap_err();
        assert!(matches!(phone_clash, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn advance_commits_only_on_matching_count() {
        let store = InMemoryLeadStore::new();
        let lead = store
            .create(&draft("ada@example.com", "0123456789"), now())
            .await
            .unwrap();

        let patch = LeadAdvance {
            message_count: 1,
            last_sent_at: now(),
            next_scheduled_for: NaiveDate::from_ymd_opt(2025, 1, 16),
            status: LeadStatus::Active,
        };

        assert!(store.advance(&lead.id, 0, &patch).await.unwrap());
        // Second attempt with the stale expected count loses the race.
        assert!(!store.advance(&lead.id, 0, &patch).await.unwrap());

        let stored = store.get(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 1);
        assert_eq!(stored.last_sent_at, Some(now()));
        assert_eq!(
            stored.next_scheduled_for,
            NaiveDate::from_ymd_opt(2025, 1, 16)
        );
    }

    #[tokio::test]
    async fn advance_refuses_non_active_leads() {
        let store = InMemoryLeadStore::new();
        let mut lead = Lead::admitted(&draft("ada@example.com", "0123456789"), now());
        lead.status = LeadStatus::Failed;
        store.insert_raw(lead.clone()).await;

        let patch = LeadAdvance {
            message_count: 1,
            last_sent_at: now(),
            next_scheduled_for: None,
            status: LeadStatus::Active,
        };
        assert!(!store.advance(&lead.id, 0, &patch).await.unwrap());
    }

    #[tokio::test]
    async fn advance_on_missing_lead_is_a_lost_race() {
        let store = InMemoryLeadStore::new();
        let patch = LeadAdvance {
            message_count: 1,
            last_sent_at: now(),
            next_scheduled_for: None,
            status: LeadStatus::Completed,
        };
        assert!(!store.advance("nope", 0, &patch).await.unwrap());
    }

    #[tokio::test]
    async fn sent_count_groups_by_civil_day() {
        let store = InMemoryLeadStore::new();
        let day = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();

        let mut sent_today = Lead::admitted(&draft("a@example.com", "1111111111"), now());
        sent_today.last_sent_at = Some(Utc.with_ymd_and_hms(2025, 1, 15, 23, 59, 59).unwrap());
        store.insert_raw(sent_today).await;

        let mut sent_yesterday = Lead::admitted(&draft("b@example.com", "2222222222"), now());
        sent_yesterday.last_sent_at = Some(Utc.with_ymd_and_hms(2025, 1, 14, 0, 0, 0).unwrap());
        store.insert_raw(sent_yesterday).await;

        let never_sent = Lead::admitted(&draft("c@example.com", "3333333333"), now());
        store.insert_raw(never_sent).await;

        assert_eq!(store.sent_count_on(day).await.unwrap(), 1);
        assert_eq!(
            store
                .sent_count_on(NaiveDate::from_ymd_opt(2025, 1, 14).unwrap())
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .sent_count_on(NaiveDate::from_ymd_opt(2025, 1, 13).unwrap())
                .await
                .unwrap(),
            0
        );
    }
}
