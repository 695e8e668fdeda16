//! Per-agency source fetchers. Each fetcher retrieves raw announcements for
//! a date window and maps its agency's feed into the common raw shape; the
//! agency-specific payload fields stay behind the per-source
//! `parse_payload` adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use recall_core::{FetchWindow, RawAnnouncement, SourceAgency};
use recall_store::{FetchClient, FetchError};

mod cpsc;
mod epa;
mod nhtsa;
mod openfda;
mod uscg;

pub use cpsc::CpscFetcher;
pub use epa::EpaFetcher;
pub use nhtsa::NhtsaFetcher;
pub use openfda::OpenFdaFetcher;
pub use uscg::UscgFetcher;

pub const CRATE_NAME: &str = "recall-sources";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed {agency} payload: {message}")]
    Payload {
        agency: SourceAgency,
        message: String,
    },
}

impl SourceError {
    pub(crate) fn payload(source: SourceAgency, message: impl Into<String>) -> Self {
        SourceError::Payload {
            agency: source,
            message: message.into(),
        }
    }
}

/// Source-specific fields extracted from an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnouncementDetails {
    pub company_name: String,
    pub summary: Option<String>,
    pub brand_names: Vec<String>,
    pub identifiers: BTreeMap<String, String>,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> SourceAgency;

    /// Retrieve and materialize every announcement the agency published
    /// inside the window. Pagination and rate limiting are the fetcher's
    /// business; the shared client enforces timeouts and retries.
    async fn fetch(
        &self,
        http: &FetchClient,
        window: &FetchWindow,
    ) -> Result<Vec<RawAnnouncement>, SourceError>;

    /// Extract the source-specific detail fields from a raw payload.
    fn parse_payload(&self, payload: &JsonValue) -> Result<AnnouncementDetails, SourceError>;
}

pub fn fetcher_for(source: SourceAgency) -> Box<dyn SourceFetcher> {
    match source {
        SourceAgency::Nhtsa => Box::new(NhtsaFetcher::default()),
        SourceAgency::Cpsc => Box::new(CpscFetcher::default()),
        SourceAgency::FdaFood => Box::new(OpenFdaFetcher::food()),
        SourceAgency::FdaDrug => Box::new(OpenFdaFetcher::drug()),
        SourceAgency::FdaDevice => Box::new(OpenFdaFetcher::device()),
        SourceAgency::Epa => Box::new(EpaFetcher::default()),
        SourceAgency::Uscg => Box::new(UscgFetcher::default()),
    }
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value.get(key).and_then(JsonValue::as_str)
}

pub(crate) fn json_string(value: &JsonValue, key: &str) -> Option<String> {
    json_str(value, key)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

pub(crate) fn required_string(
    source: SourceAgency,
    value: &JsonValue,
    key: &str,
) -> Result<String, SourceError> {
    json_string(value, key).ok_or_else(|| SourceError::payload(source, format!("missing {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_agency() {
        for source in SourceAgency::ALL {
            assert_eq!(fetcher_for(source).source(), source);
        }
    }
}
