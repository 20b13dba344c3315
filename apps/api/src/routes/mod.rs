pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Router,
};

use crate::audit::handlers as audit;
use crate::ingest::handlers as ingest;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_handler))
        // Generic ingestion
        .route("/api/v1/files/parse", post(ingest::handle_parse_file))
        // Audit workflow
        .route("/api/v1/audit/categories", get(audit::handle_list_categories))
        .route(
            "/api/v1/audit/sessions",
            get(audit::handle_list_sessions).post(audit::handle_create_session),
        )
        .route(
            "/api/v1/audit/sessions/:id",
            get(audit::handle_get_session).delete(audit::handle_delete_session),
        )
        .route(
            "/api/v1/audit/sessions/:id/status",
            patch(audit::handle_update_status),
        )
        .route(
            "/api/v1/audit/sessions/:id/files",
            get(audit::handle_list_files).post(audit::handle_upload_file),
        )
        .route(
            "/api/v1/audit/sessions/:id/files/:file_id",
            delete(audit::handle_delete_file),
        )
        .route(
            "/api/v1/audit/sessions/:id/report.xlsx",
            get(audit::handle_export_report),
        )
        .route(
            "/api/v1/audit/sessions/:id/analyze",
            post(audit::handle_analyze_session),
        )
        .route("/api/v1/audit/findings/:id", patch(audit::handle_update_finding))
        .route("/api/v1/audit/questions/:id", patch(audit::handle_answer_question))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
