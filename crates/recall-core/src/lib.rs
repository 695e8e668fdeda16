//! Core domain model for the recall aggregation pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub mod normalize;

pub const CRATE_NAME: &str = "recall-core";

/// Confidence assigned to aliases discovered by the pipeline itself.
pub const AUTOMATIC_ALIAS_CONFIDENCE: u8 = 50;
/// Confidence assigned to curator-asserted aliases.
pub const MANUAL_ALIAS_CONFIDENCE: u8 = 100;

/// Agencies the pipeline knows how to fetch. Fixed set, not pluggable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceAgency {
    Nhtsa,
    Cpsc,
    FdaFood,
    FdaDrug,
    FdaDevice,
    Epa,
    Uscg,
}

impl SourceAgency {
    pub const ALL: [SourceAgency; 7] = [
        SourceAgency::Nhtsa,
        SourceAgency::Cpsc,
        SourceAgency::FdaFood,
        SourceAgency::FdaDrug,
        SourceAgency::FdaDevice,
        SourceAgency::Epa,
        SourceAgency::Uscg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceAgency::Nhtsa => "nhtsa",
            SourceAgency::Cpsc => "cpsc",
            SourceAgency::FdaFood => "fda-food",
            SourceAgency::FdaDrug => "fda-drug",
            SourceAgency::FdaDevice => "fda-device",
            SourceAgency::Epa => "epa",
            SourceAgency::Uscg => "uscg",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == input.trim().to_ascii_lowercase())
    }

    /// Static source-to-category assignment. USCG boat recalls count as
    /// vehicles; EPA consumer-facing actions count as consumer products.
    pub fn category(&self) -> Category {
        match self {
            SourceAgency::Nhtsa | SourceAgency::Uscg => Category::Vehicle,
            SourceAgency::Cpsc | SourceAgency::Epa => Category::Consumer,
            SourceAgency::FdaFood => Category::Food,
            SourceAgency::FdaDrug => Category::Drug,
            SourceAgency::FdaDevice => Category::Device,
        }
    }
}

impl std::fmt::Display for SourceAgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vehicle,
    Consumer,
    Food,
    Drug,
    Device,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vehicle => "vehicle",
            Category::Consumer => "consumer",
            Category::Food => "food",
            Category::Drug => "drug",
            Category::Device => "device",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "vehicle" => Some(Category::Vehicle),
            "consumer" => Some(Category::Consumer),
            "food" => Some(Category::Food),
            "drug" => Some(Category::Drug),
            "device" => Some(Category::Device),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of entities the alias table can resolve. Companies only, today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Company,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "company" => Some(EntityKind::Company),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasProvenance {
    Manual,
    Automatic,
}

impl AliasProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasProvenance::Manual => "manual",
            AliasProvenance::Automatic => "automatic",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(AliasProvenance::Manual),
            "automatic" => Some(AliasProvenance::Automatic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Date-range selector accepted by the trigger surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSelector {
    Day,
    Week,
    Month,
    All,
    Between(DateTime<Utc>, DateTime<Utc>),
}

/// Concrete fetch bounds handed to source fetchers. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RangeSelector {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "day" => Some(RangeSelector::Day),
            "week" => Some(RangeSelector::Week),
            "month" => Some(RangeSelector::Month),
            "all" => Some(RangeSelector::All),
            _ => None,
        }
    }

    pub fn window_at(&self, now: DateTime<Utc>) -> FetchWindow {
        match self {
            RangeSelector::Day => FetchWindow {
                since: Some(now - Duration::days(1)),
                until: Some(now),
            },
            RangeSelector::Week => FetchWindow {
                since: Some(now - Duration::days(7)),
                until: Some(now),
            },
            RangeSelector::Month => FetchWindow {
                since: Some(now - Duration::days(30)),
                until: Some(now),
            },
            RangeSelector::All => FetchWindow {
                since: None,
                until: None,
            },
            RangeSelector::Between(start, end) => FetchWindow {
                since: Some(*start),
                until: Some(*end),
            },
        }
    }

    pub fn window(&self) -> FetchWindow {
        self.window_at(Utc::now())
    }
}

/// Common shape every fetcher maps its agency feed into. The payload stays
/// opaque here; source-specific fields are parsed behind per-source adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAnnouncement {
    pub source: SourceAgency,
    pub source_record_id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub payload: JsonValue,
}

/// Durable ledger row for a fetched announcement. Never mutated, never
/// deleted; a matching content hash means the record was already ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecallRecord {
    pub source: SourceAgency,
    pub source_record_id: String,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub title: String,
    pub payload: JsonValue,
}

/// Unified recall representation, one per ingested raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallEvent {
    pub id: Uuid,
    pub title: String,
    pub summary: Option<String>,
    pub category: Category,
    pub source: SourceAgency,
    pub raw_company_name: String,
    pub normalized_company_name: String,
    pub brand_names: Vec<String>,
    pub product_keywords: Vec<String>,
    pub source_identifiers: BTreeMap<String, String>,
    pub slug: String,
    pub search_text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_record_hash: String,
}

/// A `(kind, normalized_alias)` to canonical mapping. The pair is the
/// resolution key and must be unique in any backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAlias {
    pub entity_kind: EntityKind,
    pub canonical: String,
    pub raw_alias: String,
    pub normalized_alias: String,
    pub provenance: AliasProvenance,
    pub confidence: u8,
}

/// One audit row per pipeline execution per source. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceJobRun {
    pub id: Uuid,
    pub source: SourceAgency,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub records_fetched: i64,
    pub records_new: i64,
    pub record_errors: i64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn agency_string_round_trip() {
        for source in SourceAgency::ALL {
            assert_eq!(SourceAgency::parse(source.as_str()), Some(source));
        }
        assert_eq!(SourceAgency::parse("FDA-FOOD"), Some(SourceAgency::FdaFood));
        assert_eq!(SourceAgency::parse("usda"), None);
    }

    #[test]
    fn category_assignment_is_static() {
        assert_eq!(SourceAgency::Nhtsa.category(), Category::Vehicle);
        assert_eq!(SourceAgency::Uscg.category(), Category::Vehicle);
        assert_eq!(SourceAgency::Cpsc.category(), Category::Consumer);
        assert_eq!(SourceAgency::Epa.category(), Category::Consumer);
        assert_eq!(SourceAgency::FdaFood.category(), Category::Food);
        assert_eq!(SourceAgency::FdaDrug.category(), Category::Drug);
        assert_eq!(SourceAgency::FdaDevice.category(), Category::Device);
    }

    #[test]
    fn range_selector_windows() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().unwrap();

        let week = RangeSelector::Week.window_at(now);
        assert_eq!(week.since, Some(now - Duration::days(7)));
        assert_eq!(week.until, Some(now));

        let all = RangeSelector::All.window_at(now);
        assert_eq!(all.since, None);
        assert_eq!(all.until, None);

        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        let bounded = RangeSelector::Between(start, now).window_at(now);
        assert_eq!(bounded.since, Some(start));
    }

    #[test]
    fn range_selector_parses_known_names_only() {
        assert_eq!(RangeSelector::parse("week"), Some(RangeSelector::Week));
        assert_eq!(RangeSelector::parse(" DAY "), Some(RangeSelector::Day));
        assert_eq!(RangeSelector::parse("fortnight"), None);
    }
}
