//! USCG boat recall bulletins. The agency publishes an HTML table rather
//! than a feed, so this fetcher scrapes the bulletin page and filters rows
//! to the requested window client-side.

use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use recall_core::{FetchWindow, RawAnnouncement, SourceAgency};
use recall_store::FetchClient;

use crate::{json_string, required_string, AnnouncementDetails, SourceError, SourceFetcher};

const SOURCE: SourceAgency = SourceAgency::Uscg;

pub struct UscgFetcher {
    endpoint: String,
}

impl Default for UscgFetcher {
    fn default() -> Self {
        Self {
            endpoint: "https://uscgboating.org/content/recalls.php".to_string(),
        }
    }
}

fn parse_bulletin_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw.trim(), "%m/%d/%Y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn cell_text(cell: scraper::ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn in_window(published: Option<DateTime<Utc>>, window: &FetchWindow) -> bool {
    let Some(published) = published else {
        // Undated rows only surface in unbounded fetches.
        return window.since.is_none() && window.until.is_none();
    };
    if let Some(since) = window.since {
        if published < since {
            return false;
        }
    }
    if let Some(until) = window.until {
        if published > until {
            return false;
        }
    }
    true
}

fn parse_bulletin(body: &str, window: &FetchWindow) -> Result<Vec<RawAnnouncement>, SourceError> {
    let document = Html::parse_document(body);
    let row_selector = Selector::parse("table tr")
        .map_err(|err| SourceError::payload(SOURCE, err.to_string()))?;
    let cell_selector = Selector::parse("td")
        .map_err(|err| SourceError::payload(SOURCE, err.to_string()))?;

    let mut announcements = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(cell_text).collect();
        // Header rows have th cells and produce an empty vec here.
        if cells.is_empty() {
            continue;
        }
        if cells.len() < 4 {
            warn!(
                source = SOURCE.as_str(),
                columns = cells.len(),
                "skipping bulletin row with missing columns"
            );
            continue;
        }

        let recall_number = cells[0].clone();
        if recall_number.is_empty() {
            warn!(source = SOURCE.as_str(), "skipping bulletin row without recall number");
            continue;
        }
        let manufacturer = cells[1].clone();
        let product = cells[2].clone();
        let published_at = parse_bulletin_date(&cells[3]);

        if !in_window(published_at, window) {
            continue;
        }

        announcements.push(RawAnnouncement {
            source: SOURCE,
            source_record_id: recall_number.clone(),
            title: product.clone(),
            published_at,
            payload: json!({
                "recall_number": recall_number,
                "manufacturer": manufacturer,
                "product": product,
                "date": cells[3],
            }),
        });
    }
    Ok(announcements)
}

#[async_trait::async_trait]
impl SourceFetcher for UscgFetcher {
    fn source(&self) -> SourceAgency {
        SOURCE
    }

    async fn fetch(
        &self,
        http: &FetchClient,
        window: &FetchWindow,
    ) -> Result<Vec<RawAnnouncement>, SourceError> {
        let body = http.get_text(SOURCE, &self.endpoint).await?;
        parse_bulletin(&body, window)
    }

    fn parse_payload(&self, payload: &JsonValue) -> Result<AnnouncementDetails, SourceError> {
        let company_name = required_string(SOURCE, payload, "manufacturer")?;

        let mut identifiers = std::collections::BTreeMap::new();
        if let Some(number) = json_string(payload, "recall_number") {
            identifiers.insert("recall_number".to_string(), number);
        }

        Ok(AnnouncementDetails {
            brand_names: vec![company_name.clone()],
            company_name,
            summary: json_string(payload, "product"),
            identifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BULLETIN: &str = r#"
    <html><body>
      <table>
        <tr><th>Recall</th><th>Manufacturer</th><th>Product</th><th>Date</th></tr>
        <tr><td>26-07</td><td>WaveRunner Boats Inc</td><td>Fuel hose may chafe</td><td>03/02/2026</td></tr>
        <tr><td>25-88</td><td>Old Tide Ltd</td><td>Bilge pump wiring</td><td>11/20/2025</td></tr>
        <tr><td></td><td>Nameless</td><td>Broken row</td><td>01/01/2026</td></tr>
      </table>
    </body></html>
    "#;

    fn unbounded() -> FetchWindow {
        FetchWindow {
            since: None,
            until: None,
        }
    }

    #[test]
    fn parses_rows_and_skips_incomplete_ones() {
        let announcements = parse_bulletin(BULLETIN, &unbounded()).unwrap();
        assert_eq!(announcements.len(), 2);
        assert_eq!(announcements[0].source_record_id, "26-07");
        assert_eq!(announcements[0].title, "Fuel hose may chafe");
        assert!(announcements[0].published_at.is_some());
    }

    #[test]
    fn window_filters_older_rows() {
        let since = parse_bulletin_date("01/01/2026").unwrap();
        let window = FetchWindow {
            since: Some(since),
            until: None,
        };
        let announcements = parse_bulletin(BULLETIN, &window).unwrap();
        assert_eq!(announcements.len(), 1);
        assert_eq!(announcements[0].source_record_id, "26-07");
    }

    #[test]
    fn payload_maps_manufacturer_as_company_and_brand() {
        let announcements = parse_bulletin(BULLETIN, &unbounded()).unwrap();
        let details = UscgFetcher::default()
            .parse_payload(&announcements[0].payload)
            .unwrap();
        assert_eq!(details.company_name, "WaveRunner Boats Inc");
        assert_eq!(details.brand_names, vec!["WaveRunner Boats Inc".to_string()]);
        assert_eq!(
            details.identifiers.get("recall_number").map(String::as_str),
            Some("26-07")
        );
    }
}
