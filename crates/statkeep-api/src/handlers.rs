//! HTTP handlers.
//!
//! Path routes speak plain text, the JSON routes speak `Sample`. Metric
//! types are checked before signatures, and signatures before anything
//! reaches the service.

use std::collections::BTreeMap;

use askama::Template;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use serde::Deserialize;
use tracing::{debug, error};

use statkeep_service::UpdateError;
use statkeep_state::{MetricKind, MetricValue, Sample, Snapshot};

use crate::ApiState;
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

impl ApiState {
    fn verify(&self, sample: &Sample) -> ApiResult<()> {
        match &self.signer {
            Some(signer) => Ok(signer.verify(sample)?),
            None => Ok(()),
        }
    }

    /// Build the response sample for `value`, signed when keyed.
    fn reply(&self, id: &str, value: MetricValue) -> ApiResult<Json<Sample>> {
        let mut sample = Sample::from_value(id, value);
        if let Some(signer) = &self.signer {
            signer.sign_in_place(&mut sample)?;
        }
        Ok(Json(sample))
    }
}

// ── Path routes ────────────────────────────────────────────────

/// POST /update/{kind}/{name}/{value}
pub async fn update_from_path(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    state.service.update(&kind, &name, &value).await?;
    Ok(StatusCode::OK)
}

/// GET /value/{kind}/{name}
pub async fn value_from_path(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind = lookup_kind(&kind)?;
    let value = state.service.get(kind, &name).await?;
    Ok(value.to_string())
}

/// Reads treat an unknown type as a metric that cannot exist.
fn lookup_kind(raw: &str) -> ApiResult<MetricKind> {
    raw.parse().map_err(|_| ApiError::UnknownType(raw.to_string()))
}

// ── JSON routes ────────────────────────────────────────────────

/// A sample as decoded from a request body, before its type is checked.
///
/// `type` stays a string here so an unknown type surfaces as
/// `UnsupportedType` instead of failing the whole document.
#[derive(Debug, Deserialize)]
pub struct IncomingSample {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delta: Option<i64>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, rename = "hash")]
    pub signature: Option<String>,
}

impl TryFrom<IncomingSample> for Sample {
    type Error = UpdateError;

    fn try_from(raw: IncomingSample) -> Result<Self, Self::Error> {
        Ok(Sample {
            id: raw.id,
            kind: raw.kind.parse()?,
            delta: raw.delta,
            value: raw.value,
            signature: raw.signature,
        })
    }
}

/// POST /update/
pub async fn update_json(
    State(state): State<ApiState>,
    payload: Result<Json<IncomingSample>, JsonRejection>,
) -> ApiResult<Json<Sample>> {
    let Json(incoming) = payload?;
    let sample = Sample::try_from(incoming)?;
    state.verify(&sample)?;
    let stored = state.service.update_sample(&sample).await?;
    state.reply(&sample.id, stored)
}

/// POST /updates/
pub async fn update_batch(
    State(state): State<ApiState>,
    payload: Result<Json<Vec<IncomingSample>>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(incoming) = payload?;
    let samples = incoming
        .into_iter()
        .map(Sample::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    for sample in &samples {
        state.verify(sample)?;
    }
    let applied = state.service.update_batch(&samples).await?;
    debug!(applied, "batch accepted");
    Ok(StatusCode::OK)
}

/// Body of a JSON value query.
#[derive(Debug, Deserialize)]
pub struct ValueQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// POST /value/
pub async fn value_json(
    State(state): State<ApiState>,
    payload: Result<Json<ValueQuery>, JsonRejection>,
) -> ApiResult<Json<Sample>> {
    let Json(query) = payload?;
    let kind = lookup_kind(&query.kind)?;
    let value = state.service.get(kind, &query.id).await?;
    state.reply(&query.id, value)
}

// ── Listing and health ─────────────────────────────────────────

#[derive(Template)]
#[template(path = "metrics.html")]
struct MetricsPage {
    gauges: Vec<MetricRow>,
    counters: Vec<MetricRow>,
}

struct MetricRow {
    name: String,
    value: String,
}

impl MetricsPage {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        fn rows<V: ToString>(metrics: &BTreeMap<String, V>) -> Vec<MetricRow> {
            metrics
                .iter()
                .map(|(name, value)| MetricRow {
                    name: name.clone(),
                    value: value.to_string(),
                })
                .collect()
        }
        Self {
            gauges: rows(&snapshot.gauges),
            counters: rows(&snapshot.counters),
        }
    }
}

fn render_listing(snapshot: &Snapshot) -> ApiResult<Html<String>> {
    MetricsPage::from_snapshot(snapshot)
        .render()
        .map(Html)
        .map_err(|e| ApiError::Render(e.to_string()))
}

/// GET /
pub async fn list_metrics(State(state): State<ApiState>) -> ApiResult<Html<String>> {
    let snapshot = state.service.snapshot().await?;
    render_listing(&snapshot)
}

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> StatusCode {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(backend = state.service.backend_name(), error = %e, "ping failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
