//! Datastore interfaces, content hashing, and HTTP fetch utilities for the
//! recall pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use recall_core::{
    Category, EntityAlias, EntityKind, RawAnnouncement, RawRecallRecord, RecallEvent, RunStatus,
    SourceAgency, SourceJobRun,
};

mod http;
mod memory;
mod postgres;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchClient, FetchClientConfig,
    FetchError, FetchedResponse, RetryDisposition, TokenBucket, TokenBucketConfig,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "recall-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no datastore configured")]
    Unavailable,
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("datastore failure: {0}")]
    Backend(String),
}

/// Dedup hash over the parts of a raw announcement that identify its
/// content: source, source-native id, and the serialized payload.
pub fn content_hash(announcement: &RawAnnouncement) -> String {
    let mut hasher = Sha256::new();
    hasher.update(announcement.source.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(announcement.source_record_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(announcement.payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub fetched: i64,
    pub new_records: i64,
    pub record_errors: i64,
}

/// The pipeline's entire persistence boundary: raw-record ledger, alias
/// table, event store, and job-run audit trail.
///
/// Uniqueness constraints are the only coordination mechanism the callers
/// rely on: the ledger rejects a known content hash, and the alias table
/// rejects a second row for the same `(kind, normalized_alias)` key.
#[async_trait]
pub trait RecallStore: Send + Sync {
    async fn record_exists(&self, content_hash: &str) -> Result<bool, StoreError>;

    /// Persist a ledger row and its recall event together. Both succeed or
    /// neither does; a known content hash yields `StoreError::Duplicate`.
    async fn insert_record_with_event(
        &self,
        record: &RawRecallRecord,
        event: &RecallEvent,
    ) -> Result<(), StoreError>;

    async fn lookup_alias(
        &self,
        kind: EntityKind,
        normalized_alias: &str,
    ) -> Result<Option<EntityAlias>, StoreError>;

    /// Create-if-absent on the alias key. Returns the winning row: the
    /// caller's on insert, the existing row when the key is already taken.
    /// Never replaces an existing row, so manual entries survive concurrent
    /// automatic discovery.
    async fn create_alias_if_absent(&self, alias: &EntityAlias)
        -> Result<EntityAlias, StoreError>;

    /// Curator write: unconditionally upserts with provenance manual and
    /// full confidence.
    async fn upsert_manual_alias(
        &self,
        kind: EntityKind,
        normalized_alias: &str,
        canonical: &str,
        raw_alias: &str,
    ) -> Result<EntityAlias, StoreError>;

    async fn events_by_company(&self, normalized_name: &str)
        -> Result<Vec<RecallEvent>, StoreError>;

    async fn events_by_brand(&self, brand: &str) -> Result<Vec<RecallEvent>, StoreError>;

    async fn events_by_category(&self, category: Category) -> Result<Vec<RecallEvent>, StoreError>;

    async fn start_run(&self, source: SourceAgency) -> Result<Uuid, StoreError>;

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SourceJobRun>, StoreError>;
}

/// Capability wrapper for a possibly-unconfigured datastore. The surrounding
/// application may run without persistence; every operation observed through
/// an unconfigured handle fails with `StoreError::Unavailable` instead of
/// each call site null-checking.
#[derive(Clone, Default)]
pub struct StoreHandle {
    inner: Option<Arc<dyn RecallStore>>,
}

impl StoreHandle {
    pub fn unconfigured() -> Self {
        Self { inner: None }
    }

    pub fn new(store: Arc<dyn RecallStore>) -> Self {
        Self { inner: Some(store) }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get(&self) -> Result<&dyn RecallStore, StoreError> {
        self.inner.as_deref().ok_or(StoreError::Unavailable)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("configured", &self.is_configured())
            .finish()
    }
}
