//! Introspection snapshot for one company: how many events resolve to it
//! and a bounded sample of what they are.

use std::collections::BTreeMap;

use serde::Serialize;

use recall_core::normalize::normalize_name;
use recall_core::{EntityKind, SourceAgency};
use recall_store::{RecallStore, StoreError};

#[derive(Debug, Clone, Serialize)]
pub struct CompanyDebug {
    pub canonical: String,
    pub event_count: usize,
    pub sample: Vec<CompanySampleEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanySampleEvent {
    pub title: String,
    pub source: SourceAgency,
    pub source_identifiers: BTreeMap<String, String>,
}

/// Resolve the queried identifier through the alias table and summarize the
/// events attached to its canonical. `None` when the identifier matches no
/// alias and no events.
pub async fn company_snapshot(
    store: &dyn RecallStore,
    company: &str,
    sample_limit: usize,
) -> Result<Option<CompanyDebug>, StoreError> {
    let normalized = normalize_name(company);
    let alias = store.lookup_alias(EntityKind::Company, &normalized).await?;
    let canonical = alias
        .as_ref()
        .map(|a| a.canonical.clone())
        .unwrap_or_else(|| normalized.clone());

    let events = store.events_by_company(&canonical).await?;
    if events.is_empty() && alias.is_none() {
        return Ok(None);
    }

    let sample = events
        .iter()
        .take(sample_limit)
        .map(|event| CompanySampleEvent {
            title: event.title.clone(),
            source: event.source,
            source_identifiers: event.source_identifiers.clone(),
        })
        .collect();

    Ok(Some(CompanyDebug {
        canonical,
        event_count: events.len(),
        sample,
    }))
}
