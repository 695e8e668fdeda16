//! Postgres-backed store. Runtime sqlx queries; uniqueness constraints in
//! the schema carry the dedup and alias-resolution guarantees.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use recall_core::{
    AliasProvenance, Category, EntityAlias, EntityKind, RawRecallRecord, RecallEvent, RunStatus,
    SourceAgency, SourceJobRun, MANUAL_ALIAS_CONFIDENCE,
};

use crate::{RecallStore, RunCounts, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

fn unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
    )
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn parse_source(raw: &str) -> Result<SourceAgency, StoreError> {
    SourceAgency::parse(raw)
        .ok_or_else(|| StoreError::Backend(format!("unknown source agency in row: {raw}")))
}

fn event_from_row(row: &PgRow) -> Result<RecallEvent, StoreError> {
    let source: String = row.try_get("source").map_err(backend)?;
    let category: String = row.try_get("category").map_err(backend)?;
    let identifiers: serde_json::Value = row.try_get("source_identifiers").map_err(backend)?;
    let identifiers: BTreeMap<String, String> =
        serde_json::from_value(identifiers).map_err(|err| StoreError::Backend(err.to_string()))?;

    Ok(RecallEvent {
        id: row.try_get("id").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        summary: row.try_get("summary").map_err(backend)?,
        category: Category::parse(&category)
            .ok_or_else(|| StoreError::Backend(format!("unknown category in row: {category}")))?,
        source: parse_source(&source)?,
        raw_company_name: row.try_get("raw_company_name").map_err(backend)?,
        normalized_company_name: row.try_get("normalized_company_name").map_err(backend)?,
        brand_names: row.try_get("brand_names").map_err(backend)?,
        product_keywords: row.try_get("product_keywords").map_err(backend)?,
        source_identifiers: identifiers,
        slug: row.try_get("slug").map_err(backend)?,
        search_text: row.try_get("search_text").map_err(backend)?,
        published_at: row.try_get("published_at").map_err(backend)?,
        raw_record_hash: row.try_get("raw_record_hash").map_err(backend)?,
    })
}

fn alias_from_row(row: &PgRow) -> Result<EntityAlias, StoreError> {
    let kind: String = row.try_get("entity_kind").map_err(backend)?;
    let provenance: String = row.try_get("provenance").map_err(backend)?;
    let confidence: i16 = row.try_get("confidence").map_err(backend)?;

    Ok(EntityAlias {
        entity_kind: EntityKind::parse(&kind)
            .ok_or_else(|| StoreError::Backend(format!("unknown entity kind in row: {kind}")))?,
        canonical: row.try_get("canonical").map_err(backend)?,
        raw_alias: row.try_get("raw_alias").map_err(backend)?,
        normalized_alias: row.try_get("normalized_alias").map_err(backend)?,
        provenance: AliasProvenance::parse(&provenance).ok_or_else(|| {
            StoreError::Backend(format!("unknown provenance in row: {provenance}"))
        })?,
        confidence: confidence.clamp(0, 100) as u8,
    })
}

fn run_from_row(row: &PgRow) -> Result<SourceJobRun, StoreError> {
    let source: String = row.try_get("source").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;

    Ok(SourceJobRun {
        id: row.try_get("id").map_err(backend)?,
        source: parse_source(&source)?,
        started_at: row.try_get("started_at").map_err(backend)?,
        finished_at: row.try_get("finished_at").map_err(backend)?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown run status in row: {status}")))?,
        records_fetched: row.try_get("records_fetched").map_err(backend)?,
        records_new: row.try_get("records_new").map_err(backend)?,
        record_errors: row.try_get("record_errors").map_err(backend)?,
        error: row.try_get("error").map_err(backend)?,
    })
}

const SELECT_EVENT: &str = r#"
SELECT id, title, summary, category, source, raw_company_name,
       normalized_company_name, brand_names, product_keywords,
       source_identifiers, slug, search_text, published_at, raw_record_hash
  FROM recall_events
"#;

#[async_trait]
impl RecallStore for PgStore {
    async fn record_exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM raw_recall_records WHERE content_hash = $1")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }

    async fn insert_record_with_event(
        &self,
        record: &RawRecallRecord,
        event: &RecallEvent,
    ) -> Result<(), StoreError> {
        let identifiers = serde_json::to_value(&event.source_identifiers)
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO raw_recall_records
                (content_hash, source, source_record_id, title, published_at, fetched_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.content_hash)
        .bind(record.source.as_str())
        .bind(&record.source_record_id)
        .bind(&record.title)
        .bind(record.published_at)
        .bind(record.fetched_at)
        .bind(&record.payload)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if unique_violation(&err) {
                StoreError::Duplicate(record.content_hash.clone())
            } else {
                backend(err)
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO recall_events
                (id, raw_record_hash, title, summary, category, source,
                 raw_company_name, normalized_company_name, brand_names,
                 product_keywords, source_identifiers, slug, search_text, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(event.id)
        .bind(&event.raw_record_hash)
        .bind(&event.title)
        .bind(&event.summary)
        .bind(event.category.as_str())
        .bind(event.source.as_str())
        .bind(&event.raw_company_name)
        .bind(&event.normalized_company_name)
        .bind(&event.brand_names)
        .bind(&event.product_keywords)
        .bind(identifiers)
        .bind(&event.slug)
        .bind(&event.search_text)
        .bind(event.published_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn lookup_alias(
        &self,
        kind: EntityKind,
        normalized_alias: &str,
    ) -> Result<Option<EntityAlias>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT entity_kind, canonical, raw_alias, normalized_alias, provenance, confidence
              FROM entity_aliases
             WHERE entity_kind = $1 AND normalized_alias = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(normalized_alias)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(alias_from_row).transpose()
    }

    async fn create_alias_if_absent(
        &self,
        alias: &EntityAlias,
    ) -> Result<EntityAlias, StoreError> {
        // ON CONFLICT DO NOTHING makes the uniqueness constraint, not the
        // application, arbitrate concurrent discovery of the same key.
        sqlx::query(
            r#"
            INSERT INTO entity_aliases
                (entity_kind, normalized_alias, canonical, raw_alias, provenance, confidence)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (entity_kind, normalized_alias) DO NOTHING
            "#,
        )
        .bind(alias.entity_kind.as_str())
        .bind(&alias.normalized_alias)
        .bind(&alias.canonical)
        .bind(&alias.raw_alias)
        .bind(alias.provenance.as_str())
        .bind(i16::from(alias.confidence))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        self.lookup_alias(alias.entity_kind, &alias.normalized_alias)
            .await?
            .ok_or_else(|| {
                StoreError::Backend(format!(
                    "alias row vanished after insert: {}",
                    alias.normalized_alias
                ))
            })
    }

    async fn upsert_manual_alias(
        &self,
        kind: EntityKind,
        normalized_alias: &str,
        canonical: &str,
        raw_alias: &str,
    ) -> Result<EntityAlias, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO entity_aliases
                (entity_kind, normalized_alias, canonical, raw_alias, provenance, confidence)
            VALUES ($1, $2, $3, $4, 'manual', $5)
            ON CONFLICT (entity_kind, normalized_alias) DO UPDATE
               SET canonical = EXCLUDED.canonical,
                   raw_alias = EXCLUDED.raw_alias,
                   provenance = 'manual',
                   confidence = EXCLUDED.confidence
            RETURNING entity_kind, canonical, raw_alias, normalized_alias, provenance, confidence
            "#,
        )
        .bind(kind.as_str())
        .bind(normalized_alias)
        .bind(canonical)
        .bind(raw_alias)
        .bind(i16::from(MANUAL_ALIAS_CONFIDENCE))
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        alias_from_row(&row)
    }

    async fn events_by_company(
        &self,
        normalized_name: &str,
    ) -> Result<Vec<RecallEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENT} WHERE normalized_company_name = $1 ORDER BY published_at DESC NULLS LAST"
        ))
        .bind(normalized_name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_by_brand(&self, brand: &str) -> Result<Vec<RecallEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENT} WHERE $1 = ANY(brand_names) ORDER BY published_at DESC NULLS LAST"
        ))
        .bind(brand)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_by_category(&self, category: Category) -> Result<Vec<RecallEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENT} WHERE category = $1 ORDER BY published_at DESC NULLS LAST"
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn start_run(&self, source: SourceAgency) -> Result<Uuid, StoreError> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO source_job_runs (id, source, started_at, status)
            VALUES ($1, $2, $3, 'running')
            "#,
        )
        .bind(run_id)
        .bind(source.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(run_id)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE source_job_runs
               SET finished_at = $2,
                   status = $3,
                   records_fetched = $4,
                   records_new = $5,
                   record_errors = $6,
                   error = $7
             WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(Utc::now())
        .bind(status.as_str())
        .bind(counts.fetched)
        .bind(counts.new_records)
        .bind(counts.record_errors)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("unknown run id {run_id}")));
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SourceJobRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, started_at, finished_at, status,
                   records_fetched, records_new, record_errors, error
              FROM source_job_runs
             ORDER BY started_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(run_from_row).collect()
    }
}
