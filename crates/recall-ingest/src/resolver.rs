//! Deterministic entity resolution: normalized-name lookup against the
//! curated alias table, with create-if-absent for unseen names.

use recall_core::normalize::normalize_name;
use recall_core::{
    AliasProvenance, EntityAlias, EntityKind, AUTOMATIC_ALIAS_CONFIDENCE,
};
use recall_store::{RecallStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCompany {
    pub canonical: String,
    pub provenance: AliasProvenance,
}

/// Resolve a raw company name to its canonical identity.
///
/// A hit returns the stored canonical regardless of confidence. A miss
/// auto-creates a self-referential automatic alias so future curation can
/// redirect the key; concurrent discovery of the same key is arbitrated by
/// the store's uniqueness constraint, and the loser adopts the winning row.
pub async fn resolve_company(
    store: &dyn RecallStore,
    raw_name: &str,
) -> Result<ResolvedCompany, StoreError> {
    let normalized = normalize_name(raw_name);
    if let Some(existing) = store.lookup_alias(EntityKind::Company, &normalized).await? {
        return Ok(ResolvedCompany {
            canonical: existing.canonical,
            provenance: existing.provenance,
        });
    }

    let candidate = EntityAlias {
        entity_kind: EntityKind::Company,
        canonical: normalized.clone(),
        raw_alias: raw_name.to_string(),
        normalized_alias: normalized,
        provenance: AliasProvenance::Automatic,
        confidence: AUTOMATIC_ALIAS_CONFIDENCE,
    };
    let winner = store.create_alias_if_absent(&candidate).await?;
    Ok(ResolvedCompany {
        canonical: winner.canonical,
        provenance: winner.provenance,
    })
}

/// Curator-asserted alias mapping. Always wins over automatic discovery.
pub async fn curate_alias(
    store: &dyn RecallStore,
    kind: EntityKind,
    canonical: &str,
    raw_alias: &str,
) -> Result<EntityAlias, StoreError> {
    let normalized = normalize_name(raw_alias);
    store
        .upsert_manual_alias(kind, &normalized, canonical, raw_alias)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_store::MemoryStore;

    #[tokio::test]
    async fn variants_resolve_to_the_same_canonical_in_either_order() {
        let store = MemoryStore::default();
        let first = resolve_company(&store, "Acme Inc").await.unwrap();
        let second = resolve_company(&store, "Acme Incorporated").await.unwrap();
        assert_eq!(first.canonical, "acme");
        assert_eq!(first.canonical, second.canonical);

        let store = MemoryStore::default();
        let first = resolve_company(&store, "Acme Incorporated").await.unwrap();
        let second = resolve_company(&store, "Acme Inc").await.unwrap();
        assert_eq!(first.canonical, second.canonical);
    }

    #[tokio::test]
    async fn first_sighting_creates_an_automatic_alias() {
        let store = MemoryStore::default();
        let resolved = resolve_company(&store, "Big Wheel Co., Ltd.").await.unwrap();
        assert_eq!(resolved.canonical, "big wheel");
        assert_eq!(resolved.provenance, AliasProvenance::Automatic);

        let stored = store
            .lookup_alias(EntityKind::Company, "big wheel")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.raw_alias, "Big Wheel Co., Ltd.");
        assert_eq!(stored.confidence, AUTOMATIC_ALIAS_CONFIDENCE);
    }

    #[tokio::test]
    async fn manual_curation_wins_regardless_of_write_order() {
        // Curation before discovery.
        let store = MemoryStore::default();
        curate_alias(&store, EntityKind::Company, "Acme Corporation", "ACME INC")
            .await
            .unwrap();
        let resolved = resolve_company(&store, "Acme Inc").await.unwrap();
        assert_eq!(resolved.canonical, "Acme Corporation");
        assert_eq!(resolved.provenance, AliasProvenance::Manual);

        // Discovery before curation.
        let store = MemoryStore::default();
        resolve_company(&store, "Acme Inc").await.unwrap();
        curate_alias(&store, EntityKind::Company, "Acme Corporation", "ACME INC")
            .await
            .unwrap();
        let resolved = resolve_company(&store, "Acme Incorporated").await.unwrap();
        assert_eq!(resolved.canonical, "Acme Corporation");
        assert_eq!(resolved.provenance, AliasProvenance::Manual);
    }
}
