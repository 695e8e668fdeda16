//! CPSC consumer-product recalls via the saferproducts.gov REST service.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::warn;

use recall_core::{FetchWindow, RawAnnouncement, SourceAgency};
use recall_store::FetchClient;

use crate::{json_str, json_string, AnnouncementDetails, SourceError, SourceFetcher};

const SOURCE: SourceAgency = SourceAgency::Cpsc;

pub struct CpscFetcher {
    endpoint: String,
}

impl Default for CpscFetcher {
    fn default() -> Self {
        Self {
            endpoint: "https://www.saferproducts.gov/RestWebServices/Recall".to_string(),
        }
    }
}

fn parse_recall_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn names_at(payload: &JsonValue, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| json_string(item, "Name"))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl SourceFetcher for CpscFetcher {
    fn source(&self) -> SourceAgency {
        SOURCE
    }

    async fn fetch(
        &self,
        http: &FetchClient,
        window: &FetchWindow,
    ) -> Result<Vec<RawAnnouncement>, SourceError> {
        let mut url = format!("{}?format=json", self.endpoint);
        if let Some(since) = window.since {
            url.push_str(&format!("&RecallDateStart={}", since.format("%Y-%m-%d")));
        }
        if let Some(until) = window.until {
            url.push_str(&format!("&RecallDateEnd={}", until.format("%Y-%m-%d")));
        }

        let items: Vec<JsonValue> = http.get_json(SOURCE, &url).await?;

        let mut announcements = Vec::with_capacity(items.len());
        for item in items {
            let Some(record_id) = item.get("RecallID").and_then(JsonValue::as_i64) else {
                warn!(source = SOURCE.as_str(), "skipping record without RecallID");
                continue;
            };
            announcements.push(RawAnnouncement {
                source: SOURCE,
                source_record_id: record_id.to_string(),
                title: json_string(&item, "Title").unwrap_or_default(),
                published_at: json_str(&item, "RecallDate").and_then(parse_recall_date),
                payload: item,
            });
        }
        Ok(announcements)
    }

    fn parse_payload(&self, payload: &JsonValue) -> Result<AnnouncementDetails, SourceError> {
        let manufacturers = names_at(payload, "Manufacturers");
        let company_name = manufacturers
            .first()
            .cloned()
            .or_else(|| names_at(payload, "Importers").first().cloned())
            .ok_or_else(|| SourceError::payload(SOURCE, "no manufacturer or importer"))?;

        let mut identifiers = std::collections::BTreeMap::new();
        if let Some(number) = json_string(payload, "RecallNumber") {
            identifiers.insert("recall_number".to_string(), number);
        }
        if let Some(id) = payload.get("RecallID").and_then(JsonValue::as_i64) {
            identifiers.insert("recall_id".to_string(), id.to_string());
        }

        Ok(AnnouncementDetails {
            company_name,
            summary: json_string(payload, "Description"),
            brand_names: names_at(payload, "Products"),
            identifiers,
        })
    }
}
