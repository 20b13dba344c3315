use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::{AuditFindingRow, AuditQuestionRow, FindingStatus};

#[derive(Debug, Deserialize)]
pub struct FindingStatusUpdate {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct QuestionAnswer {
    pub answer: String,
}

pub async fn update_finding_status(
    db: &PgPool,
    finding_id: Uuid,
    status: FindingStatus,
) -> Result<AuditFindingRow, AppError> {
    let row: Option<AuditFindingRow> =
        sqlx::query_as("UPDATE audit_findings SET status = $1 WHERE id = $2 RETURNING *")
            .bind(status.as_str())
            .bind(finding_id)
            .fetch_optional(db)
            .await?;

    let row = row.ok_or_else(|| AppError::NotFound(format!("Finding {finding_id} not found")))?;
    info!(finding_id = %finding_id, status = %status, "Finding status updated");
    Ok(row)
}

/// Records the client's answer and marks the question answered.
pub async fn answer_question(
    db: &PgPool,
    question_id: Uuid,
    answer: &str,
) -> Result<AuditQuestionRow, AppError> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(AppError::Validation("answer must not be empty".to_string()));
    }

    let row: Option<AuditQuestionRow> = sqlx::query_as(
        "UPDATE audit_questions SET answer = $1, is_answered = true WHERE id = $2 RETURNING *",
    )
    .bind(answer)
    .bind(question_id)
    .fetch_optional(db)
    .await?;

    let row = row.ok_or_else(|| AppError::NotFound(format!("Question {question_id} not found")))?;
    info!(question_id = %question_id, "Audit question answered");
    Ok(row)
}
