//! EPA consumer-facing enforcement announcements.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::warn;

use recall_core::{FetchWindow, RawAnnouncement, SourceAgency};
use recall_store::FetchClient;

use crate::{json_str, json_string, required_string, AnnouncementDetails, SourceError, SourceFetcher};

const SOURCE: SourceAgency = SourceAgency::Epa;

pub struct EpaFetcher {
    endpoint: String,
}

impl Default for EpaFetcher {
    fn default() -> Self {
        Self {
            endpoint: "https://www.epa.gov/newsreleases/search/recalls.json".to_string(),
        }
    }
}

fn parse_published_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[async_trait::async_trait]
impl SourceFetcher for EpaFetcher {
    fn source(&self) -> SourceAgency {
        SOURCE
    }

    async fn fetch(
        &self,
        http: &FetchClient,
        window: &FetchWindow,
    ) -> Result<Vec<RawAnnouncement>, SourceError> {
        let mut params = Vec::new();
        if let Some(since) = window.since {
            params.push(format!("published_after={}", since.format("%Y-%m-%d")));
        }
        if let Some(until) = window.until {
            params.push(format!("published_before={}", until.format("%Y-%m-%d")));
        }
        let url = if params.is_empty() {
            self.endpoint.clone()
        } else {
            format!("{}?{}", self.endpoint, params.join("&"))
        };

        let items: Vec<JsonValue> = http.get_json(SOURCE, &url).await?;

        let mut announcements = Vec::with_capacity(items.len());
        for item in items {
            let Some(case_number) = json_string(&item, "caseNumber") else {
                warn!(source = SOURCE.as_str(), "skipping record without caseNumber");
                continue;
            };
            announcements.push(RawAnnouncement {
                source: SOURCE,
                source_record_id: case_number,
                title: json_string(&item, "title").unwrap_or_default(),
                published_at: json_str(&item, "publishedDate").and_then(parse_published_date),
                payload: item,
            });
        }
        Ok(announcements)
    }

    fn parse_payload(&self, payload: &JsonValue) -> Result<AnnouncementDetails, SourceError> {
        let company_name = required_string(SOURCE, payload, "respondentCompany")?;

        let mut identifiers = std::collections::BTreeMap::new();
        if let Some(case_number) = json_string(payload, "caseNumber") {
            identifiers.insert("case_number".to_string(), case_number);
        }

        Ok(AnnouncementDetails {
            company_name,
            summary: json_string(payload, "summary"),
            brand_names: Vec::new(),
            identifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_respondent_and_case_number() {
        let payload = json!({
            "caseNumber": "EPA-2026-0042",
            "title": "Misbranded pesticide sold for home use",
            "respondentCompany": "GreenGrow Ltd",
            "publishedDate": "2026-03-02",
            "summary": "Product labels omitted required hazard statements."
        });
        let details = EpaFetcher::default().parse_payload(&payload).unwrap();
        assert_eq!(details.company_name, "GreenGrow Ltd");
        assert_eq!(
            details.identifiers.get("case_number").map(String::as_str),
            Some("EPA-2026-0042")
        );
        assert!(details.brand_names.is_empty());
    }

    #[test]
    fn missing_respondent_is_a_payload_error() {
        let err = EpaFetcher::default()
            .parse_payload(&json!({"caseNumber": "EPA-2026-0043"}))
            .unwrap_err();
        assert!(matches!(err, SourceError::Payload { .. }));
    }
}
