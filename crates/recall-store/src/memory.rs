//! In-memory store for tests and ephemeral runs. Semantics match the
//! Postgres store: uniqueness on the ledger hash and the alias key, atomic
//! record-plus-event insertion.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use recall_core::{
    AliasProvenance, Category, EntityAlias, EntityKind, RawRecallRecord, RecallEvent, RunStatus,
    SourceAgency, SourceJobRun, MANUAL_ALIAS_CONFIDENCE,
};

use crate::{RecallStore, RunCounts, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, RawRecallRecord>,
    events: Vec<RecallEvent>,
    aliases: HashMap<(EntityKind, String), EntityAlias>,
    runs: Vec<SourceJobRun>,
}

impl MemoryStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl RecallStore for MemoryStore {
    async fn record_exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.records.contains_key(content_hash))
    }

    async fn insert_record_with_event(
        &self,
        record: &RawRecallRecord,
        event: &RecallEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.records.entry(record.content_hash.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate(record.content_hash.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        inner.events.push(event.clone());
        Ok(())
    }

    async fn lookup_alias(
        &self,
        kind: EntityKind,
        normalized_alias: &str,
    ) -> Result<Option<EntityAlias>, StoreError> {
        Ok(self
            .lock()?
            .aliases
            .get(&(kind, normalized_alias.to_string()))
            .cloned())
    }

    async fn create_alias_if_absent(
        &self,
        alias: &EntityAlias,
    ) -> Result<EntityAlias, StoreError> {
        let mut inner = self.lock()?;
        let key = (alias.entity_kind, alias.normalized_alias.clone());
        match inner.aliases.entry(key) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => Ok(slot.insert(alias.clone()).clone()),
        }
    }

    async fn upsert_manual_alias(
        &self,
        kind: EntityKind,
        normalized_alias: &str,
        canonical: &str,
        raw_alias: &str,
    ) -> Result<EntityAlias, StoreError> {
        let alias = EntityAlias {
            entity_kind: kind,
            canonical: canonical.to_string(),
            raw_alias: raw_alias.to_string(),
            normalized_alias: normalized_alias.to_string(),
            provenance: AliasProvenance::Manual,
            confidence: MANUAL_ALIAS_CONFIDENCE,
        };
        self.lock()?
            .aliases
            .insert((kind, normalized_alias.to_string()), alias.clone());
        Ok(alias)
    }

    async fn events_by_company(
        &self,
        normalized_name: &str,
    ) -> Result<Vec<RecallEvent>, StoreError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.normalized_company_name == normalized_name)
            .cloned()
            .collect())
    }

    async fn events_by_brand(&self, brand: &str) -> Result<Vec<RecallEvent>, StoreError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.brand_names.iter().any(|b| b == brand))
            .cloned()
            .collect())
    }

    async fn events_by_category(&self, category: Category) -> Result<Vec<RecallEvent>, StoreError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.category == category)
            .cloned()
            .collect())
    }

    async fn start_run(&self, source: SourceAgency) -> Result<Uuid, StoreError> {
        let run = SourceJobRun {
            id: Uuid::new_v4(),
            source,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            records_fetched: 0,
            records_new: 0,
            record_errors: 0,
            error: None,
        };
        let id = run.id;
        self.lock()?.runs.push(run);
        Ok(id)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown run id {run_id}")))?;
        run.finished_at = Some(Utc::now());
        run.status = status;
        run.records_fetched = counts.fetched;
        run.records_new = counts.new_records;
        run.record_errors = counts.record_errors;
        run.error = error.map(ToString::to_string);
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SourceJobRun>, StoreError> {
        let mut runs = self.lock()?.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::AUTOMATIC_ALIAS_CONFIDENCE;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(hash: &str) -> RawRecallRecord {
        RawRecallRecord {
            source: SourceAgency::Cpsc,
            source_record_id: "9001".to_string(),
            content_hash: hash.to_string(),
            fetched_at: Utc::now(),
            published_at: None,
            title: "Infant Swing Recall".to_string(),
            payload: json!({"RecallID": 9001}),
        }
    }

    fn event(hash: &str, company: &str) -> RecallEvent {
        RecallEvent {
            id: Uuid::new_v4(),
            title: "Infant Swing Recall".to_string(),
            summary: None,
            category: Category::Consumer,
            source: SourceAgency::Cpsc,
            raw_company_name: company.to_string(),
            normalized_company_name: company.to_string(),
            brand_names: vec!["SwingKing".to_string()],
            product_keywords: vec![],
            source_identifiers: BTreeMap::new(),
            slug: "infant-swing-recall".to_string(),
            search_text: String::new(),
            published_at: None,
            raw_record_hash: hash.to_string(),
        }
    }

    fn automatic_alias(normalized: &str) -> EntityAlias {
        EntityAlias {
            entity_kind: EntityKind::Company,
            canonical: normalized.to_string(),
            raw_alias: normalized.to_string(),
            normalized_alias: normalized.to_string(),
            provenance: AliasProvenance::Automatic,
            confidence: AUTOMATIC_ALIAS_CONFIDENCE,
        }
    }

    #[tokio::test]
    async fn duplicate_hash_rejects_second_insert() {
        let store = MemoryStore::default();
        store
            .insert_record_with_event(&record("h1"), &event("h1", "acme"))
            .await
            .unwrap();

        let err = store
            .insert_record_with_event(&record("h1"), &event("h1", "acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        // The failed insert must not have persisted a second event.
        assert_eq!(store.events_by_company("acme").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_if_absent_returns_existing_winner() {
        let store = MemoryStore::default();
        let first = store.create_alias_if_absent(&automatic_alias("acme")).await.unwrap();
        assert_eq!(first.provenance, AliasProvenance::Automatic);

        let mut rival = automatic_alias("acme");
        rival.canonical = "acme corp".to_string();
        let winner = store.create_alias_if_absent(&rival).await.unwrap();
        assert_eq!(winner.canonical, "acme");
    }

    #[tokio::test]
    async fn manual_upsert_survives_automatic_discovery() {
        let store = MemoryStore::default();
        store
            .upsert_manual_alias(EntityKind::Company, "acme", "Acme Corporation", "ACME INC")
            .await
            .unwrap();

        let after_auto = store.create_alias_if_absent(&automatic_alias("acme")).await.unwrap();
        assert_eq!(after_auto.provenance, AliasProvenance::Manual);
        assert_eq!(after_auto.canonical, "Acme Corporation");
        assert_eq!(after_auto.confidence, MANUAL_ALIAS_CONFIDENCE);
    }

    #[tokio::test]
    async fn brand_query_is_exact_and_case_sensitive() {
        let store = MemoryStore::default();
        store
            .insert_record_with_event(&record("h1"), &event("h1", "acme"))
            .await
            .unwrap();

        assert_eq!(store.events_by_brand("SwingKing").await.unwrap().len(), 1);
        assert!(store.events_by_brand("swingking").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_lifecycle_records_counts_and_status() {
        let store = MemoryStore::default();
        let run_id = store.start_run(SourceAgency::Nhtsa).await.unwrap();

        store
            .finish_run(
                run_id,
                RunStatus::Partial,
                RunCounts {
                    fetched: 5,
                    new_records: 3,
                    record_errors: 1,
                },
                Some("one record missing title"),
            )
            .await
            .unwrap();

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Partial);
        assert_eq!(runs[0].records_fetched, 5);
        assert_eq!(runs[0].records_new, 3);
        assert_eq!(runs[0].record_errors, 1);
        assert!(runs[0].finished_at.is_some());

        let err = store
            .finish_run(Uuid::new_v4(), RunStatus::Failed, RunCounts::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
