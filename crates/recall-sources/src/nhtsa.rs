//! NHTSA vehicle recall campaigns.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use recall_core::{FetchWindow, RawAnnouncement, SourceAgency};
use recall_store::FetchClient;

use crate::{json_str, json_string, required_string, AnnouncementDetails, SourceError, SourceFetcher};

const SOURCE: SourceAgency = SourceAgency::Nhtsa;

pub struct NhtsaFetcher {
    endpoint: String,
}

impl Default for NhtsaFetcher {
    fn default() -> Self {
        Self {
            endpoint: "https://api.nhtsa.gov/recalls/recallsByDateRange".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NhtsaResponse {
    #[serde(default)]
    results: Vec<JsonValue>,
}

fn parse_report_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[async_trait::async_trait]
impl SourceFetcher for NhtsaFetcher {
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
            url.push_str(&format!("&startDate={}", since.format("%Y-%m-%d")));
        }
        if let Some(until) = window.until {
            url.push_str(&format!("&endDate={}", until.format("%Y-%m-%d")));
        }

        let page: NhtsaResponse = http.get_json(SOURCE, &url).await?;

        let mut announcements = Vec::with_capacity(page.results.len());
        for item in page.results {
            let Some(campaign) = json_string(&item, "NHTSACampaignNumber") else {
                warn!(
                    source = SOURCE.as_str(),
                    "skipping record without NHTSACampaignNumber"
                );
                continue;
            };
            announcements.push(RawAnnouncement {
                source: SOURCE,
                source_record_id: campaign,
                title: json_string(&item, "Subject").unwrap_or_default(),
                published_at: json_str(&item, "ReportReceivedDate").and_then(parse_report_date),
                payload: item,
            });
        }
        Ok(announcements)
    }

    fn parse_payload(&self, payload: &JsonValue) -> Result<AnnouncementDetails, SourceError> {
        let company_name = required_string(SOURCE, payload, "Manufacturer")?;

        let mut brand_names = Vec::new();
        if let Some(make) = json_string(payload, "Make") {
            brand_names.push(make);
        }
        if let Some(model) = json_string(payload, "Model") {
            if !brand_names.contains(&model) {
                brand_names.push(model);
            }
        }

        let mut identifiers = std::collections::BTreeMap::new();
        if let Some(campaign) = json_string(payload, "NHTSACampaignNumber") {
            identifiers.insert("campaign_number".to_string(), campaign);
        }
        if let Some(component) = json_string(payload, "Component") {
            identifiers.insert("component".to_string(), component);
        }

        Ok(AnnouncementDetails {
            company_name,
            summary: json_string(payload, "Summary"),
            brand_names,
            identifiers,
        })
    }
}
