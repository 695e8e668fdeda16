//! JSON surface for the pipeline's operational boundaries: trigger, run
//! listing, event queries, the company debug snapshot, and alias curation.
//! Thin marshaling only; the surrounding application owns UI and auth.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;

use recall_core::{Category, EntityKind, RangeSelector, SourceAgency};
use recall_ingest::{debug::company_snapshot, resolver::curate_alias, IngestPipeline};
use recall_store::StoreError;

pub const CRATE_NAME: &str = "recall-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/runs/trigger", post(trigger_handler))
        .route("/runs", get(runs_handler))
        .route("/events", get(events_handler))
        .route("/debug/company", get(company_debug_handler))
        .route("/aliases", post(alias_upsert_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(pipeline: Arc<IngestPipeline>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState::new(pipeline))).await?;
    Ok(())
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

fn store_error(err: &StoreError) -> Response {
    let status = match err {
        StoreError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

#[derive(Debug, Deserialize)]
struct TriggerRequest {
    sources: Vec<String>,
    #[serde(default)]
    range: Option<String>,
}

async fn trigger_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerRequest>,
) -> Response {
    if request.sources.is_empty() {
        return bad_request("at least one source is required");
    }

    let mut sources = Vec::with_capacity(request.sources.len());
    for raw in &request.sources {
        match SourceAgency::parse(raw) {
            Some(source) => sources.push(source),
            None => return bad_request(&format!("unknown source: {raw}")),
        }
    }

    let range = match request.range.as_deref() {
        None => RangeSelector::Week,
        Some(raw) => match RangeSelector::parse(raw) {
            Some(range) => range,
            None => return bad_request(&format!("unknown range: {raw}")),
        },
    };

    let summaries = state.pipeline.run_sources(&sources, range).await;
    Json(summaries).into_response()
}

#[derive(Debug, Deserialize, Default)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn runs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Response {
    let backing = match state.pipeline.store().get() {
        Ok(backing) => backing,
        Err(err) => return store_error(&err),
    };
    match backing.recent_runs(query.limit.unwrap_or(20)).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => store_error(&err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct EventsQuery {
    company: Option<String>,
    brand: Option<String>,
    category: Option<String>,
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let backing = match state.pipeline.store().get() {
        Ok(backing) => backing,
        Err(err) => return store_error(&err),
    };

    let result = if let Some(company) = &query.company {
        backing.events_by_company(company).await
    } else if let Some(brand) = &query.brand {
        backing.events_by_brand(brand).await
    } else if let Some(category) = &query.category {
        match Category::parse(category) {
            Some(category) => backing.events_by_category(category).await,
            None => return bad_request(&format!("unknown category: {category}")),
        }
    } else {
        return bad_request("one of company, brand, or category is required");
    };

    match result {
        Ok(events) => Json(events).into_response(),
        Err(err) => store_error(&err),
    }
}

async fn company_debug_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(name) = params.get("name").map(String::as_str).filter(|s| !s.is_empty()) else {
        return bad_request("name parameter is required");
    };

    let backing = match state.pipeline.store().get() {
        Ok(backing) => backing,
        Err(err) => return store_error(&err),
    };

    let limit = state.pipeline.config().debug_sample_limit;
    match company_snapshot(backing, name, limit).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => not_found(&format!("unknown company: {name}")),
        Err(err) => store_error(&err),
    }
}

#[derive(Debug, Deserialize)]
struct CurationRequest {
    #[serde(default)]
    entity_type: Option<String>,
    canonical: String,
    alias: String,
}

async fn alias_upsert_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CurationRequest>,
) -> Response {
    let kind = match request.entity_type.as_deref() {
        None => EntityKind::Company,
        Some(raw) => match EntityKind::parse(raw) {
            Some(kind) => kind,
            None => return bad_request(&format!("unknown entity type: {raw}")),
        },
    };
    if request.canonical.trim().is_empty() || request.alias.trim().is_empty() {
        return bad_request("canonical and alias are required");
    }

    let backing = match state.pipeline.store().get() {
        Ok(backing) => backing,
        Err(err) => return store_error(&err),
    };
    match curate_alias(backing, kind, &request.canonical, &request.alias).await {
        Ok(alias) => Json(alias).into_response(),
        Err(err) => store_error(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use recall_ingest::PipelineConfig;
    use recall_store::StoreHandle;
    use tower::ServiceExt;

    fn test_app(store: StoreHandle) -> Router {
        let pipeline =
            Arc::new(IngestPipeline::new(PipelineConfig::from_env(), store).unwrap());
        app(AppState::new(pipeline))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn events_query_requires_a_filter() {
        let app = test_app(StoreHandle::in_memory());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_query_rejects_unknown_category() {
        let app = test_app(StoreHandle::in_memory());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/events?category=gadget")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn debug_company_requires_name_and_404s_unknown() {
        let app = test_app(StoreHandle::in_memory());

        let missing = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/debug/company")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let unknown = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/debug/company?name=Nobody%20Knows%20Inc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn curation_then_debug_round_trip() {
        let app = test_app(StoreHandle::in_memory());

        let body = serde_json::json!({
            "canonical": "Acme Corporation",
            "alias": "ACME INC"
        });
        let upsert = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/aliases")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(upsert.status(), StatusCode::OK);
        let alias = body_json(upsert).await;
        assert_eq!(alias["canonical"], "Acme Corporation");
        assert_eq!(alias["provenance"], "manual");
        assert_eq!(alias["normalized_alias"], "acme");

        let debug = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/debug/company?name=Acme%20Inc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(debug.status(), StatusCode::OK);
        let snapshot = body_json(debug).await;
        assert_eq!(snapshot["canonical"], "Acme Corporation");
        assert_eq!(snapshot["event_count"], 0);
    }

    #[tokio::test]
    async fn trigger_rejects_unknown_sources_and_empty_lists() {
        let app = test_app(StoreHandle::in_memory());

        let unknown = serde_json::json!({"sources": ["usda"], "range": "week"});
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/runs/trigger")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&unknown).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let empty = serde_json::json!({"sources": []});
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/runs/trigger")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&empty).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn runs_listing_works_and_unconfigured_store_is_503() {
        let app = test_app(StoreHandle::in_memory());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/runs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!([]));

        let app = test_app(StoreHandle::unconfigured());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/runs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
