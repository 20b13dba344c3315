use serde::Serialize;
use sqlx::{types::Json, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::audit::categories::FileCategory;
use crate::errors::AppError;
use crate::ingest::cell::Row;
use crate::ingest::{file_extension, ParsedTable};
use crate::models::audit::{AuditFileRow, FileStatus};

/// Rows persisted per file; analysis reads its sample from these.
pub const RAW_DATA_ROW_LIMIT: usize = 100;
/// Uploads at which the progress bar reads full.
pub const PROGRESS_TARGET_FILES: usize = 4;

/// Upload metadata that is not part of the parsed table.
#[derive(Debug, Clone)]
pub struct StoredUpload<'a> {
    pub session_id: Uuid,
    pub category: FileCategory,
    pub file_size: usize,
    pub table: &'a ParsedTable,
}

pub async fn store_parsed_file(db: &PgPool, upload: StoredUpload<'_>) -> Result<AuditFileRow, AppError> {
    let table = upload.table;
    let file_type = file_extension(table.source_file_name()).unwrap_or_else(|| "unknown".to_string());
    let raw_data: Json<&[Row]> = Json(table.sample_rows(RAW_DATA_ROW_LIMIT));

    let row: AuditFileRow = sqlx::query_as(
        r#"
        INSERT INTO audit_files
            (session_id, file_name, file_type, file_category, file_size,
             headers, row_count, raw_data, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, session_id, file_name, file_type, file_category, file_size,
                  headers, row_count, raw_data, status, created_at
        "#,
    )
    .bind(upload.session_id)
    .bind(table.source_file_name())
    .bind(&file_type)
    .bind(upload.category.id())
    .bind(i64::try_from(upload.file_size).unwrap_or(i64::MAX))
    .bind(table.headers())
    .bind(i32::try_from(table.row_count()).unwrap_or(i32::MAX))
    .bind(raw_data)
    .bind(FileStatus::Processed.as_str())
    .fetch_one(db)
    .await?;

    info!(
        session_id = %upload.session_id,
        file_id = %row.id,
        category = %upload.category,
        rows = table.row_count(),
        "Audit file stored"
    );
    Ok(row)
}

pub async fn list_files(db: &PgPool, session_id: Uuid) -> Result<Vec<AuditFileRow>, AppError> {
    let rows = sqlx::query_as(
        r#"
        SELECT id, session_id, file_name, file_type, file_category, file_size,
               headers, row_count, raw_data, status, created_at
        FROM audit_files
        WHERE session_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn delete_file(db: &PgPool, session_id: Uuid, file_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM audit_files WHERE id = $1 AND session_id = $2")
        .bind(file_id)
        .bind(session_id)
        .execute(db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Audit file {file_id} not found")));
    }
    info!(session_id = %session_id, file_id = %file_id, "Audit file deleted");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadProgress {
    pub total_files: usize,
    pub required_complete: bool,
    pub missing_required: Vec<FileCategory>,
    pub progress_pct: f64,
}

/// Progress over the stored category ids of a session's files. Unknown ids count
/// toward the total but satisfy no requirement.
pub fn compute_progress<'a>(categories: impl IntoIterator<Item = &'a str>) -> UploadProgress {
    let uploaded: Vec<&str> = categories.into_iter().collect();
    let missing_required: Vec<FileCategory> = FileCategory::required()
        .filter(|c| !uploaded.contains(&c.id()))
        .collect();
    let total_files = uploaded.len();
    let progress_pct = (total_files as f64 / PROGRESS_TARGET_FILES as f64 * 100.0).min(100.0);

    UploadProgress {
        total_files,
        required_complete: missing_required.is_empty(),
        missing_required,
        progress_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_empty_session() {
        let progress = compute_progress([]);
        assert_eq!(progress.total_files, 0);
        assert_eq!(progress.progress_pct, 0.0);
        assert!(!progress.required_complete);
        assert_eq!(progress.missing_required.len(), 4);
    }

    #[test]
    fn test_progress_counts_every_file() {
        let progress = compute_progress(["other", "expenses", "trial_balance"]);
        assert_eq!(progress.progress_pct, 75.0);
        assert!(!progress.required_complete);
        assert_eq!(
            progress.missing_required,
            vec![
                FileCategory::GeneralLedger,
                FileCategory::ProfitAndLoss,
                FileCategory::BalanceSheet
            ]
        );
    }

    #[test]
    fn test_progress_caps_at_full() {
        let progress = compute_progress([
            "trial_balance",
            "general_ledger",
            "pnl",
            "balance_sheet",
            "bank_statements",
            "pnl",
        ]);
        assert_eq!(progress.total_files, 6);
        assert_eq!(progress.progress_pct, 100.0);
        assert!(progress.required_complete);
        assert!(progress.missing_required.is_empty());
    }

    #[test]
    fn test_four_optional_files_fill_the_bar_but_not_requirements() {
        let progress = compute_progress(["other", "other", "expenses", "invoices_sales"]);
        assert_eq!(progress.progress_pct, 100.0);
        assert!(!progress.required_complete);
    }
}
