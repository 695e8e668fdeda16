//! FDA enforcement reports (food, drug, device) via the openFDA API.
//! One fetcher covers the three agencies; only the endpoint differs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use recall_core::{FetchWindow, RawAnnouncement, SourceAgency};
use recall_store::FetchClient;

use crate::{json_str, json_string, required_string, AnnouncementDetails, SourceError, SourceFetcher};

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;

pub struct OpenFdaFetcher {
    source: SourceAgency,
    endpoint: String,
}

impl OpenFdaFetcher {
    pub fn food() -> Self {
        Self {
            source: SourceAgency::FdaFood,
            endpoint: "https://api.fda.gov/food/enforcement.json".to_string(),
        }
    }

    pub fn drug() -> Self {
        Self {
            source: SourceAgency::FdaDrug,
            endpoint: "https://api.fda.gov/drug/enforcement.json".to_string(),
        }
    }

    pub fn device() -> Self {
        Self {
            source: SourceAgency::FdaDevice,
            endpoint: "https://api.fda.gov/device/enforcement.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnforcementPage {
    #[serde(default)]
    results: Vec<JsonValue>,
    meta: Option<EnforcementMeta>,
}

#[derive(Debug, Deserialize)]
struct EnforcementMeta {
    results: Option<EnforcementMetaResults>,
}

#[derive(Debug, Deserialize)]
struct EnforcementMetaResults {
    total: Option<u64>,
}

fn parse_report_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn search_clause(window: &FetchWindow) -> String {
    let since = window
        .since
        .map(|t| t.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "19700101".to_string());
    let until = window
        .until
        .unwrap_or_else(Utc::now)
        .format("%Y%m%d")
        .to_string();
    format!("report_date:[{since}+TO+{until}]")
}

#[async_trait::async_trait]
impl SourceFetcher for OpenFdaFetcher {
    fn source(&self) -> SourceAgency {
        self.source
    }

    async fn fetch(
        &self,
        http: &FetchClient,
        window: &FetchWindow,
    ) -> Result<Vec<RawAnnouncement>, SourceError> {
        let search = search_clause(window);
        let mut announcements = Vec::new();
        let mut skip = 0usize;

        for page_index in 0..MAX_PAGES {
            let url = format!(
                "{}?search={}&limit={}&skip={}",
                self.endpoint, search, PAGE_SIZE, skip
            );
            let page: EnforcementPage = http.get_json(self.source, &url).await?;
            let total = page
                .meta
                .as_ref()
                .and_then(|m| m.results.as_ref())
                .and_then(|r| r.total)
                .unwrap_or(0) as usize;
            let fetched_this_page = page.results.len();

            for item in page.results {
                let Some(recall_number) = json_string(&item, "recall_number") else {
                    warn!(
                        source = self.source.as_str(),
                        "skipping record without recall_number"
                    );
                    continue;
                };
                announcements.push(RawAnnouncement {
                    source: self.source,
                    source_record_id: recall_number,
                    title: json_string(&item, "product_description").unwrap_or_default(),
                    published_at: json_str(&item, "report_date").and_then(parse_report_date),
                    payload: item,
                });
            }

            skip += fetched_this_page;
            if fetched_this_page < PAGE_SIZE || skip >= total {
                return Ok(announcements);
            }
            if page_index + 1 == MAX_PAGES {
                warn!(
                    source = self.source.as_str(),
                    fetched = skip,
                    total,
                    "stopping pagination at page cap; remaining records left for the next run"
                );
            }
        }
        Ok(announcements)
    }

    fn parse_payload(&self, payload: &JsonValue) -> Result<AnnouncementDetails, SourceError> {
        let company_name = required_string(self.source, payload, "recalling_firm")?;

        let brand_names = payload
            .get("openfda")
            .and_then(|v| v.get("brand_name"))
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut identifiers = std::collections::BTreeMap::new();
        if let Some(number) = json_string(payload, "recall_number") {
            identifiers.insert("recall_number".to_string(), number);
        }
        if let Some(event_id) = json_string(payload, "event_id") {
            identifiers.insert("event_id".to_string(), event_id);
        }
        if let Some(classification) = json_string(payload, "classification") {
            identifiers.insert("classification".to_string(), classification);
        }

        Ok(AnnouncementDetails {
            company_name,
            summary: json_string(payload, "reason_for_recall"),
            brand_names,
            identifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> JsonValue {
        json!({
            "recall_number": "F-1234-2026",
            "event_id": "88221",
            "classification": "Class I",
            "recalling_firm": "Acme Incorporated",
            "product_description": "Frozen berry mix, 16 oz bags",
            "reason_for_recall": "Potential Listeria contamination",
            "report_date": "20260302",
            "openfda": {"brand_name": ["BerryGood"]}
        })
    }

    #[test]
    fn maps_firm_brands_and_identifiers() {
        let details = OpenFdaFetcher::food().parse_payload(&fixture()).unwrap();
        assert_eq!(details.company_name, "Acme Incorporated");
        assert_eq!(details.brand_names, vec!["BerryGood".to_string()]);
        assert_eq!(
            details.identifiers.get("recall_number").map(String::as_str),
            Some("F-1234-2026")
        );
        assert_eq!(
            details.identifiers.get("classification").map(String::as_str),
            Some("Class I")
        );
        assert_eq!(
            details.summary.as_deref(),
            Some("Potential Listeria contamination")
        );
    }

    #[test]
    fn brands_default_to_empty_without_openfda_block() {
        let payload = json!({
            "recall_number": "D-2-2026",
            "recalling_firm": "Device Labs LLC",
            "product_description": "Infusion pump"
        });
        let details = OpenFdaFetcher::device().parse_payload(&payload).unwrap();
        assert!(details.brand_names.is_empty());
    }

    #[test]
    fn missing_recalling_firm_is_a_payload_error() {
        let err = OpenFdaFetcher::drug()
            .parse_payload(&json!({"recall_number": "D-3-2026"}))
            .unwrap_err();
        assert!(matches!(err, SourceError::Payload { .. }));
    }

    #[test]
    fn search_clause_covers_open_and_bounded_windows() {
        let open = search_clause(&FetchWindow {
            since: None,
            until: None,
        });
        assert!(open.starts_with("report_date:[19700101+TO+"));

        let since = parse_report_date("20260201").unwrap();
        let until = parse_report_date("20260302").unwrap();
        let bounded = search_clause(&FetchWindow {
            since: Some(since),
            until: Some(until),
        });
        assert_eq!(bounded, "report_date:[20260201+TO+20260302]");
    }

    #[test]
    fn report_date_parses_compact_form() {
        let parsed = parse_report_date("20260302").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-03-02");
        assert!(parse_report_date("2026-03-02").is_none());
    }
}
