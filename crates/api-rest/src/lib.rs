//! # API REST
//!
//! REST API for the TOSSE mobile shell.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, CORS, status codes)
//!
//! The API is stateless per request: there is no server-side session. A client runs the
//! registration and recording steps itself and posts the outcome to `/analyses`.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    routing::post,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use tosse_core::{
    export::{default_export_filename, render_history},
    AnalysisResult, Analyzer, AudioSample, HistoryRecord, PatientData, PatientDraft, ResultId,
    ResultStore, TriageError, TriageResult,
};

/// Application state shared across REST API handlers
#[derive(Clone)]
pub struct AppState {
    store: Arc<Mutex<ResultStore>>,
    analyzer: Arc<dyn Analyzer>,
}

impl AppState {
    pub fn new(store: ResultStore, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            analyzer,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientDto {
    pub name: String,
    /// YYYY-MM-DD
    pub birth_date: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub consent: bool,
}

impl From<&PatientData> for PatientDto {
    fn from(p: &PatientData) -> Self {
        Self {
            name: p.name.to_string(),
            birth_date: p.birth_date.format("%Y-%m-%d").to_string(),
            address: p.address.to_string(),
            phone: p.phone.clone(),
            consent: p.consent,
        }
    }
}

impl From<PatientDto> for PatientDraft {
    fn from(p: PatientDto) -> Self {
        Self {
            name: p.name,
            birth_date: p.birth_date,
            address: p.address,
            phone: p.phone.unwrap_or_default(),
            consent: p.consent,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProbabilitiesDto {
    pub pneumonia: f64,
    pub bronchite: f64,
    pub asma: f64,
    pub normal: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResultDto {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub probabilities: ProbabilitiesDto,
    pub risk_level: String,
    pub audio_duration: f64,
    pub clinical_note: String,
    pub top_diagnosis: String,
}

impl From<&AnalysisResult> for AnalysisResultDto {
    fn from(r: &AnalysisResult) -> Self {
        let p = r.probabilities();
        Self {
            id: r.id().to_string(),
            timestamp: r.timestamp().timestamp_millis(),
            probabilities: ProbabilitiesDto {
                pneumonia: p.pneumonia,
                bronchite: p.bronchitis,
                asma: p.asthma,
                normal: p.normal,
            },
            risk_level: r.risk_level().to_string(),
            audio_duration: r.audio_duration(),
            clinical_note: r.clinical_note().to_string(),
            top_diagnosis: p.top().0.label().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryRecordDto {
    pub patient: PatientDto,
    pub result: AnalysisResultDto,
}

impl From<&HistoryRecord> for HistoryRecordDto {
    fn from(r: &HistoryRecord) -> Self {
        Self {
            patient: PatientDto::from(&r.patient),
            result: AnalysisResultDto::from(&r.result),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListHistoryRes {
    pub records: Vec<HistoryRecordDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteRecordRes {
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnalyseReq {
    pub patient: PatientDto,
    /// Recorded audio length in seconds
    pub duration: f64,
    /// Identifier of an existing record to replace
    #[serde(default)]
    pub replaces: Option<String>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_history,
        get_record,
        delete_record,
        export_history,
        analyse,
    ),
    components(schemas(
        HealthRes,
        PatientDto,
        ProbabilitiesDto,
        AnalysisResultDto,
        HistoryRecordDto,
        ListHistoryRes,
        DeleteRecordRes,
        AnalyseReq,
    ))
)]
struct ApiDoc;

type ApiError = (StatusCode, String);

fn error_response(e: TriageError) -> ApiError {
    match e {
        TriageError::InvalidInput(_) | TriageError::Validation(_) => {
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        TriageError::RecordNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        TriageError::EmptyHistory => (StatusCode::NOT_FOUND, e.to_string()),
        other => {
            tracing::error!("request failed: {:?}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
        }
    }
}

/// Runs a store mutation on the blocking pool, since every write rewrites the history file.
async fn mutate_store<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut ResultStore) -> TriageResult<T> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || op(&mut store.blocking_lock()))
        .await
        .map_err(|e| {
            tracing::error!("store task failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
        })?
        .map_err(error_response)
}

/// Builds the REST router with OpenAPI docs and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/history", get(list_history))
        .route("/history/export", get(export_history))
        .route("/history/:id", get(get_record).delete(delete_record))
        .route("/analyses", post(analyse))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `addr` and serves the router until the server stops.
///
/// # Errors
/// Returns an error if the address cannot be bound or the server fails while running.
pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "TOSSE REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, description = "History records, newest first", body = ListHistoryRes)
    )
)]
/// List the history, newest first
#[axum::debug_handler]
async fn list_history(State(state): State<AppState>) -> Json<ListHistoryRes> {
    let store = state.store.lock().await;
    let records = store.list().iter().map(HistoryRecordDto::from).collect();
    Json(ListHistoryRes { records })
}

#[utoipa::path(
    get,
    path = "/history/{id}",
    params(("id" = String, Path, description = "Result identifier")),
    responses(
        (status = 200, description = "The record", body = HistoryRecordDto),
        (status = 404, description = "Record not found")
    )
)]
/// Fetch one record for the report view
#[axum::debug_handler]
async fn get_record(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<HistoryRecordDto>, ApiError> {
    let id = ResultId::parse(&id).map_err(error_response)?;
    let store = state.store.lock().await;
    store
        .get(&id)
        .map(|r| Json(HistoryRecordDto::from(r)))
        .ok_or_else(|| error_response(TriageError::RecordNotFound(id.to_string())))
}

#[utoipa::path(
    delete,
    path = "/history/{id}",
    params(("id" = String, Path, description = "Result identifier")),
    responses(
        (status = 200, description = "Whether a record was removed", body = DeleteRecordRes),
        (status = 500, description = "Internal server error")
    )
)]
/// Delete one record. Deleting an unknown identifier is not an error.
#[axum::debug_handler]
async fn delete_record(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<DeleteRecordRes>, ApiError> {
    let id = ResultId::parse(&id).map_err(error_response)?;
    let deleted = mutate_store(&state, move |store| store.delete(&id)).await?;
    Ok(Json(DeleteRecordRes { deleted }))
}

#[utoipa::path(
    get,
    path = "/history/export",
    responses(
        (status = 200, description = "Plain-text history export", body = String, content_type = "text/plain"),
        (status = 404, description = "No history to export")
    )
)]
/// Download the history as plain text (timestamps in UTC)
#[axum::debug_handler]
async fn export_history(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.lock().await;
    let text = render_history(store.list(), &Utc).map_err(error_response)?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        default_export_filename(Utc::now().date_naive())
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        text,
    ))
}

#[utoipa::path(
    post,
    path = "/analyses",
    request_body = AnalyseReq,
    responses(
        (status = 201, description = "Analysis completed and saved", body = HistoryRecordDto),
        (status = 400, description = "Invalid registration"),
        (status = 404, description = "Record to replace not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Run an analysis for a registered patient and save it to the history
///
/// When `replaces` names an existing record, the new analysis is filed under that identifier
/// and replaces the record in place. If that record is deleted before the analysis completes,
/// nothing is saved and 404 is returned.
#[axum::debug_handler]
async fn analyse(
    State(state): State<AppState>,
    Json(req): Json<AnalyseReq>,
) -> Result<(StatusCode, Json<HistoryRecordDto>), ApiError> {
    let patient = PatientDraft::from(req.patient)
        .validate()
        .map_err(|e| error_response(e.into()))?;
    if !(req.duration.is_finite() && req.duration >= 0.0) {
        return Err(error_response(TriageError::InvalidInput(
            "duration must be a non-negative number of seconds".into(),
        )));
    }

    let replaces = match req.replaces.as_deref() {
        Some(raw) => {
            let id = ResultId::parse(raw).map_err(error_response)?;
            if state.store.lock().await.get(&id).is_none() {
                return Err(error_response(TriageError::RecordNotFound(id.to_string())));
            }
            Some(id)
        }
        None => None,
    };

    // The store is not locked while the analyzer waits.
    let result = state
        .analyzer
        .analyze(&AudioSample::empty(), req.duration, None)
        .await
        .map_err(error_response)?;
    let editing = replaces.is_some();
    let result = match replaces {
        Some(id) => result.rekeyed(id),
        None => result,
    };

    let record = HistoryRecord::new(patient, result);
    let dto = HistoryRecordDto::from(&record);
    // The record may have been deleted while the analyzer ran; an edit never re-creates it.
    if editing {
        mutate_store(&state, move |store| store.replace(record)).await?;
    } else {
        mutate_store(&state, move |store| store.save(record)).await?;
    }

    Ok((StatusCode::CREATED, Json(dto)))
}
