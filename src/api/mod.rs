// HTTP routes: the war status page, its JSON twin, health and metrics.

pub mod page;

use askama::Template;
use axum::{
    extract::{rejection::FormRejection, Form, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use percent_encoding::percent_decode_str;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::coc::Connector;
use crate::league::{self, SnapshotError};
use crate::metrics;
use crate::snapshot::Snapshot;
use page::IndexPage;

// ── Request types ─────────────────────────────────────────────────────

/// Raw `key=value` pairs. Repeated keys are kept rather than rejected.
pub type ParamPairs = Vec<(String, String)>;

/// First value of `clan` among the pairs.
fn first_clan(pairs: &[(String, String)]) -> Option<&str> {
    pairs
        .iter()
        .find(|(key, _)| key == "clan")
        .map(|(_, value)| value.as_str())
}

/// The clan parameter: the query string wins, a submitted form field is the
/// fallback when the query value is absent or blank.
pub fn clan_param<'a>(
    query: &'a [(String, String)],
    form: Option<&'a [(String, String)]>,
) -> Option<&'a str> {
    first_clan(query)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| form.and_then(first_clan))
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<dyn Connector>,
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(connector: Arc<dyn Connector>) -> Router {
    let state = AppState { connector };

    Router::new()
        .route("/", get(index_get).post(index_post))
        .route("/api/war", get(war_json))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn the raw parameter into a clan tag.
///
/// Clients sometimes encode the leading `#` twice, so the already-decoded
/// value is percent-decoded once more. Tags are upper-cased and given a
/// leading `#` when missing. Blank input yields `None`.
pub fn normalize_clan_tag(raw: Option<&str>) -> Option<String> {
    let decoded = percent_decode_str(raw?.trim()).decode_utf8_lossy();
    let tag = decoded.trim().to_uppercase();
    if tag.is_empty() {
        return None;
    }
    if tag.starts_with('#') {
        Some(tag)
    } else {
        Some(format!("#{tag}"))
    }
}

async fn load_snapshot(state: &AppState, clan_tag: &str) -> Result<Snapshot, SnapshotError> {
    let mut api = state.connector.connect();
    league::fetch_snapshot(api.as_mut(), clan_tag, Utc::now()).await
}

fn record_outcome(surface: &str, outcome: &str) {
    metrics::SNAPSHOT_REQUESTS_TOTAL
        .with_label_values(&[surface, outcome])
        .inc();
}

// ── Page handlers ─────────────────────────────────────────────────────

async fn index_get(State(state): State<AppState>, Query(query): Query<ParamPairs>) -> Response {
    render_index(&state, clan_param(&query, None)).await
}

/// A missing or non-form body is not an error; the query string may carry
/// the clan on its own.
async fn index_post(
    State(state): State<AppState>,
    Query(query): Query<ParamPairs>,
    form: Result<Form<ParamPairs>, FormRejection>,
) -> Response {
    let form = form.ok().map(|Form(pairs)| pairs);
    render_index(&state, clan_param(&query, form.as_deref())).await
}

async fn render_index(state: &AppState, clan: Option<&str>) -> Response {
    tracing::debug!("Index request with clan parameter {:?}", clan);

    let Some(clan_tag) = normalize_clan_tag(clan) else {
        record_outcome("page", "empty");
        return render_page(IndexPage::empty());
    };

    let page = match load_snapshot(state, &clan_tag).await {
        Ok(snapshot) => {
            record_outcome("page", "ok");
            IndexPage {
                clan_tag,
                error: None,
                snapshot,
            }
        }
        Err(e) => {
            record_outcome("page", e.outcome());
            IndexPage {
                clan_tag,
                error: Some(e.to_string()),
                snapshot: Snapshot::default(),
            }
        }
    };
    render_page(page)
}

fn render_page(page: IndexPage) -> Response {
    match page.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("Template render failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

// ── JSON handler ──────────────────────────────────────────────────────

async fn war_json(State(state): State<AppState>, Query(query): Query<ParamPairs>) -> Response {
    let Some(clan_tag) = normalize_clan_tag(clan_param(&query, None)) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing clan parameter");
    };

    match load_snapshot(&state, &clan_tag).await {
        Ok(snapshot) => {
            record_outcome("api", "ok");
            (StatusCode::OK, Json(snapshot)).into_response()
        }
        Err(e) => {
            record_outcome("api", e.outcome());
            json_error(StatusCode::OK, &e.to_string())
        }
    }
}

// ── Service endpoints ─────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "cwl-status" }))
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}
