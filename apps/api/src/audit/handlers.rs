use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::analysis::{analyze_session, AnalysisResponse};
use crate::audit::categories::{catalogue, CategoryInfo, FileCategory};
use crate::audit::files::{
    compute_progress, delete_file, list_files, store_parsed_file, StoredUpload, UploadProgress,
};
use crate::audit::report::{build_report, report_file_name, XLSX_CONTENT_TYPE};
use crate::audit::review::{
    answer_question, update_finding_status, FindingStatusUpdate, QuestionAnswer,
};
use crate::audit::sessions::{
    create_session, delete_session, fetch_session, list_sessions, session_detail, update_status,
    CreateSessionRequest, SessionDetail,
};
use crate::errors::AppError;
use crate::ingest::handlers::read_multipart_upload;
use crate::ingest::parse_file;
use crate::models::audit::{
    AuditFileRow, AuditFindingRow, AuditQuestionRow, AuditSessionRow, FindingStatus, SessionStatus,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CompanyQuery {
    pub company_id: Uuid,
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub file: AuditFileRow,
    pub summary: String,
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub files: Vec<AuditFileRow>,
    pub progress: UploadProgress,
}

/// GET /api/v1/audit/categories
pub async fn handle_list_categories() -> Json<Vec<CategoryInfo>> {
    Json(catalogue())
}

/// POST /api/v1/audit/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<AuditSessionRow>), AppError> {
    let new = req.validate()?;
    let session = create_session(&state.db, &new).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/v1/audit/sessions
pub async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(params): Query<CompanyQuery>,
) -> Result<Json<Vec<AuditSessionRow>>, AppError> {
    Ok(Json(list_sessions(&state.db, params.company_id).await?))
}

/// GET /api/v1/audit/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetail>, AppError> {
    Ok(Json(session_detail(&state.db, id).await?))
}

/// DELETE /api/v1/audit/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    delete_session(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/audit/sessions/:id/status
pub async fn handle_update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> Result<Json<AuditSessionRow>, AppError> {
    let status = req
        .status
        .parse::<SessionStatus>()
        .map_err(AppError::Validation)?;
    Ok(Json(update_status(&state.db, id, status).await?))
}

/// POST /api/v1/audit/sessions/:id/files
pub async fn handle_upload_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let upload = read_multipart_upload(multipart).await?;
    let category = upload
        .fields
        .get("category")
        .ok_or_else(|| AppError::Validation("Missing 'category' field".to_string()))?
        .parse::<FileCategory>()
        .map_err(AppError::Validation)?;

    fetch_session(&state.db, id).await?;

    let file_size = upload.file.bytes.len();
    let table = parse_file(upload.file).await?;
    let file = store_parsed_file(
        &state.db,
        StoredUpload {
            session_id: id,
            category,
            file_size,
            table: &table,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file,
            summary: table.summary().to_string(),
        }),
    ))
}

/// GET /api/v1/audit/sessions/:id/files
pub async fn handle_list_files(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileListResponse>, AppError> {
    fetch_session(&state.db, id).await?;
    let files = list_files(&state.db, id).await?;
    let progress = compute_progress(files.iter().map(|f| f.file_category.as_str()));
    Ok(Json(FileListResponse { files, progress }))
}

/// DELETE /api/v1/audit/sessions/:id/files/:file_id
pub async fn handle_delete_file(
    State(state): State<AppState>,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    delete_file(&state.db, id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/audit/sessions/:id/report.xlsx
pub async fn handle_export_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = session_detail(&state.db, id).await?;
    let today = Utc::now().date_naive();
    let bytes = build_report(&detail, today)?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        report_file_name(&detail.session.title, today)
    );

    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// POST /api/v1/audit/sessions/:id/analyze
pub async fn handle_analyze_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let response = analyze_session(&state.db, state.analyzer.as_ref(), id).await?;
    Ok(Json(response))
}

/// PATCH /api/v1/audit/findings/:id
pub async fn handle_update_finding(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FindingStatusUpdate>,
) -> Result<Json<AuditFindingRow>, AppError> {
    let status = req
        .status
        .parse::<FindingStatus>()
        .map_err(AppError::Validation)?;
    Ok(Json(update_finding_status(&state.db, id, status).await?))
}

/// PATCH /api/v1/audit/questions/:id
pub async fn handle_answer_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<QuestionAnswer>,
) -> Result<Json<AuditQuestionRow>, AppError> {
    Ok(Json(answer_question(&state.db, id, &req.answer).await?))
}
